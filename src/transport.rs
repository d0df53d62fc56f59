use crate::error::{Result, WebOsError};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Stream type produced by [`open`]
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a WebSocket with a bounded connect timeout
///
/// Message size limits are lifted; picture uploads and channel lists can be
/// large.
pub(crate) async fn open(url: &str, connect_timeout: Duration) -> Result<WsStream> {
    tracing::info!("Connecting to {}", url);

    let mut config = WebSocketConfig::default();
    config.max_message_size = None;
    config.max_frame_size = None;

    let (ws, _) = timeout(connect_timeout, connect_async_with_config(url, Some(config), false))
        .await
        .map_err(|_| WebOsError::ConnectTimeout)??;
    Ok(ws)
}

/// A running WebSocket with a writer task and a reader task
///
/// Outgoing messages go through an unbounded queue to the writer. The reader
/// hands text frames to a callback in arrival order and records pong
/// acknowledgements for [`WsLink::ping`].
pub(crate) struct WsLink {
    label: &'static str,
    ws_tx: mpsc::UnboundedSender<Message>,
    closed: CancellationToken,
    pong_rx: watch::Receiver<u64>,
    ping_seq: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsLink {
    /// Split the stream and spawn the writer and reader tasks
    pub(crate) fn spawn<S, F>(ws: WebSocketStream<S>, label: &'static str, mut on_text: F) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnMut(String) + Send + 'static,
    {
        let (mut write, mut read) = ws.split();
        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (pong_tx, pong_rx) = watch::channel(0u64);
        let closed = CancellationToken::new();

        // Forward outgoing messages to the WebSocket
        let writer_closed = closed.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_closed.cancelled() => break,
                    msg = ws_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                tracing::error!("[{}] Failed to send message: {}", label, e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_closed.cancel();
            let _ = timeout(CLOSE_TIMEOUT, write.close()).await;
        });

        // Receive incoming messages strictly in arrival order
        let reader_closed = closed.clone();
        let reader = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = reader_closed.cancelled() => break,
                    msg = read.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => on_text(text),
                    Some(Ok(Message::Pong(data))) => {
                        if let Ok(bytes) = <[u8; 8]>::try_from(data.as_slice()) {
                            let seq = u64::from_be_bytes(bytes);
                            pong_tx.send_if_modified(|last| {
                                if seq > *last {
                                    *last = seq;
                                    true
                                } else {
                                    false
                                }
                            });
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("[{}] WebSocket connection closed", label);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("[{}] WebSocket error: {}", label, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            reader_closed.cancel();
        });

        Self {
            label,
            ws_tx,
            closed,
            pong_rx,
            ping_seq: AtomicU64::new(0),
            tasks: Mutex::new(vec![writer, reader]),
        }
    }

    /// Queue a text frame
    pub(crate) fn send_text(&self, text: String) -> Result<()> {
        tracing::debug!("[{}] Sending: {}", self.label, text);
        self.send(Message::Text(text))
    }

    fn send(&self, msg: Message) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(WebOsError::ConnectionClosed);
        }
        self.ws_tx
            .send(msg)
            .map_err(|_| WebOsError::ConnectionClosed)
    }

    /// Send a liveness probe and wait for its pong
    ///
    /// Each ping carries a sequence number so a late pong from an earlier
    /// probe never satisfies a newer one.
    pub(crate) async fn ping(&self) -> Result<()> {
        let seq = self.ping_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(Message::Ping(seq.to_be_bytes().to_vec()))?;

        let mut pong_rx = self.pong_rx.clone();
        tokio::select! {
            _ = self.closed.cancelled() => Err(WebOsError::ConnectionClosed),
            acked = pong_rx.wait_for(|last| *last >= seq) => {
                acked.map(|_| ()).map_err(|_| WebOsError::ConnectionClosed)
            }
        }
    }

    /// Resolves once either task has stopped
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop both tasks and wait for them to exit
    pub(crate) async fn close(&self) {
        self.closed.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if timeout(CLOSE_TIMEOUT, join_all(tasks)).await.is_err() {
            tracing::warn!("[{}] Transport tasks did not stop in time, aborting", self.label);
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
