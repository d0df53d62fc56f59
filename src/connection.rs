use crate::error::{Result, WebOsError};
use crate::protocol::{ExchangeKind, Request, Response};
use crate::subscription::{
    PendingSubscription, Subscription, SubscriptionEntry, SubscriptionHandler, SubscriptionId,
};
use crate::transport::WsLink;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;

/// A request waiting for its response
struct PendingRequest {
    kind: ExchangeKind,
    tx: oneshot::Sender<Result<Response>>,
}

/// Correlation maps, mutated only through [`Connection`]
pub(crate) struct ConnectionState {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
    pub(crate) subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    closed: bool,
}

impl ConnectionState {
    fn allocate_id(&mut self) -> Result<u64> {
        if self.closed {
            return Err(WebOsError::Cancelled);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }
}

/// Request/response correlator and subscription dispatcher over one link
pub(crate) struct Connection {
    link: WsLink,
    state: Arc<Mutex<ConnectionState>>,
    request_timeout: Option<Duration>,
}

fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl Connection {
    /// Start dispatching inbound frames from a registered WebSocket
    pub(crate) fn start<S>(ws: WebSocketStream<S>, request_timeout: Option<Duration>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ConnectionState {
            next_id: 1,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            closed: false,
        }));

        let dispatch_state = state.clone();
        let link = WsLink::spawn(ws, "main", move |text| {
            Self::handle_message(&dispatch_state, text);
        });

        Self {
            link,
            state,
            request_timeout,
        }
    }

    /// Route an inbound frame to its subscription pipe or waiting request
    fn handle_message(state: &Mutex<ConnectionState>, text: String) {
        tracing::debug!("Received: {}", text);

        let response = match Response::parse(&text) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Ignoring unparseable frame: {}", e);
                return;
            }
        };

        let Some(id) = response.numeric_id() else {
            tracing::debug!("Ignoring frame without numeric id: {:?}", response.id);
            return;
        };

        let mut state = lock(state);

        if let Some(entry) = state.subscriptions.get(&id) {
            if entry.pipe.send(response).is_err() {
                tracing::debug!("Subscription {} is closing, frame dropped", id);
            }
            return;
        }

        if let Some(pending) = state.pending.remove(&id) {
            tracing::trace!("Resolving {:?} {}", pending.kind, id);
            let _ = pending.tx.send(Ok(response));
            return;
        }

        tracing::debug!("Discarding late frame for id {}", id);
    }

    pub(crate) fn link(&self) -> &WsLink {
        &self.link
    }

    /// Send an exchange of the given kind
    ///
    /// Commands resolve as soon as the frame is queued and yield `Null`.
    pub(crate) async fn send(
        &self,
        kind: ExchangeKind,
        uri: &str,
        payload: Option<Value>,
    ) -> Result<Value> {
        match kind {
            ExchangeKind::Command => {
                let id = lock(&self.state).allocate_id()?;
                let request = Request::new(id, kind, uri, payload);
                self.link.send_text(request.to_text()?)?;
                Ok(Value::Null)
            }
            ExchangeKind::Request => self.request(uri, payload).await,
            ExchangeKind::Subscribe => Err(WebOsError::InvalidArgument(
                "subscribe exchanges need a handler".to_string(),
            )),
        }
    }

    /// Send a request and wait for the response
    pub(crate) async fn request(&self, uri: &str, payload: Option<Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();

        // Register the pending request
        let id = {
            let mut state = lock(&self.state);
            let id = state.allocate_id()?;
            state.pending.insert(
                id,
                PendingRequest {
                    kind: ExchangeKind::Request,
                    tx,
                },
            );
            id
        };
        let guard = PendingGuard {
            state: &*self.state,
            id,
        };

        let request = Request::new(id, ExchangeKind::Request, uri, payload);
        self.link.send_text(request.to_text()?)?;

        // Wait for response, optionally bounded
        let response = match self.request_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(response) => response,
                Err(_) => return Err(WebOsError::Timeout),
            },
            None => rx.await,
        };
        drop(guard);

        match response {
            Ok(Ok(response)) => response.into_payload(),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WebOsError::Cancelled),
        }
    }

    /// Register a subscription and send its frame without waiting
    ///
    /// Frames hit the wire in call order, so issuing several subscriptions
    /// back to back is deterministic.
    pub(crate) fn start_subscribe(
        &self,
        uri: &str,
        payload: Option<Value>,
        handler: SubscriptionHandler,
    ) -> Result<PendingSubscription> {
        let (first_tx, first_rx) = oneshot::channel();

        let id = {
            let mut state = lock(&self.state);
            let id = state.allocate_id()?;
            let entry = SubscriptionEntry::spawn(id, uri.to_string(), handler, first_tx);
            state.subscriptions.insert(id, entry);
            id
        };
        let pending =
            PendingSubscription::new(id, first_rx, self.state.clone(), self.request_timeout);

        let request = Request::new(id, ExchangeKind::Subscribe, uri, payload);
        self.link.send_text(request.to_text()?)?;

        Ok(pending)
    }

    /// Subscribe and wait for the first delivery
    pub(crate) async fn subscribe(
        &self,
        uri: &str,
        payload: Option<Value>,
        handler: SubscriptionHandler,
    ) -> Result<Subscription> {
        self.start_subscribe(uri, payload, handler)?.wait().await
    }

    /// Stop a subscription and wait for its in-flight handler
    ///
    /// Must not be awaited from inside the same subscription's handler.
    pub(crate) async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let entry = lock(&self.state).subscriptions.remove(&id);
        let Some(entry) = entry else {
            return Err(WebOsError::InvalidArgument(format!(
                "no active subscription {id}"
            )));
        };

        tracing::debug!("Unsubscribing {} from {}", id, entry.uri);
        entry.stop.cancel();
        drop(entry.pipe);

        // The TV keeps pushing otherwise; late frames are discarded anyway
        if let Err(e) = Request::unsubscribe(id)
            .to_text()
            .and_then(|text| self.link.send_text(text))
        {
            tracing::debug!("Unsubscribe frame for {} not sent: {}", id, e);
        }

        let _ = entry.consumer.await;
        Ok(())
    }

    /// Number of outstanding requests and active subscriptions
    pub(crate) fn outstanding(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.pending.len(), state.subscriptions.len())
    }

    /// Cancel every waiter and subscription, then close the link
    ///
    /// Subscription consumers get `grace` to finish their in-flight handler
    /// before they are aborted.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let (pending, subscriptions) = {
            let mut state = lock(&self.state);
            state.closed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.subscriptions),
            )
        };

        for (_, request) in pending {
            let _ = request.tx.send(Err(WebOsError::Cancelled));
        }

        let consumers: Vec<JoinHandle<()>> = subscriptions
            .into_values()
            .map(|entry| {
                entry.stop.cancel();
                entry.consumer
            })
            .collect();
        let aborts: Vec<_> = consumers.iter().map(JoinHandle::abort_handle).collect();

        if timeout(grace, join_all(consumers)).await.is_err() {
            tracing::warn!("Subscription handlers did not finish within {:?}", grace);
            for abort in aborts {
                abort.abort();
            }
        }

        self.link.close().await;
    }
}

/// Removes a pending request when its waiter goes away
struct PendingGuard<'a> {
    state: &'a Mutex<ConnectionState>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).pending.remove(&self.id);
    }
}
