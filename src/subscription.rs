use crate::connection::ConnectionState;
use crate::error::{Result, WebOsError};
use crate::protocol::Response;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Identifier of an active subscription
pub type SubscriptionId = u64;

/// Callback invoked with every payload pushed for a subscription
pub type SubscriptionHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`SubscriptionHandler`]
pub fn handler<F, Fut>(f: F) -> SubscriptionHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| -> BoxFuture<'static, ()> { Box::pin(f(payload)) })
}

/// An accepted subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Identifier to pass to `unsubscribe`
    pub id: SubscriptionId,
    /// First payload the TV delivered
    pub initial: Value,
}

/// Delivery pipe for one subscription, owned by the connection state
pub(crate) struct SubscriptionEntry {
    pub(crate) uri: String,
    pub(crate) pipe: mpsc::UnboundedSender<Response>,
    pub(crate) stop: CancellationToken,
    pub(crate) consumer: JoinHandle<()>,
}

impl SubscriptionEntry {
    /// Create the pipe and spawn its single consumer
    pub(crate) fn spawn(
        id: SubscriptionId,
        uri: String,
        handler: SubscriptionHandler,
        first: oneshot::Sender<Result<Value>>,
    ) -> Self {
        let (pipe, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let consumer = tokio::spawn(deliver(id, rx, handler, first, stop.clone()));
        Self {
            uri,
            pipe,
            stop,
            consumer,
        }
    }
}

/// Drain one subscription's pipe in order
///
/// The first frame decides the outcome of the subscribe call and is only
/// reported after the handler has seen it. A stop request takes effect
/// between invocations; a running handler is always allowed to finish.
async fn deliver(
    id: SubscriptionId,
    mut rx: mpsc::UnboundedReceiver<Response>,
    handler: SubscriptionHandler,
    first: oneshot::Sender<Result<Value>>,
    stop: CancellationToken,
) {
    let mut first = Some(first);

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Some(first) = first.take() {
            match frame.into_payload() {
                Ok(payload) => {
                    handler(payload.clone()).await;
                    let _ = first.send(Ok(payload));
                }
                Err(e) => {
                    let _ = first.send(Err(e));
                    break;
                }
            }
            continue;
        }

        if frame.is_error() {
            tracing::warn!("Subscription {} pushed an error: {:?}", id, frame.error);
            continue;
        }

        handler(frame.payload.unwrap_or(Value::Null)).await;
    }

    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!("Subscription {} discarded {} queued frames", id, dropped);
    }
}

/// A subscribe frame that has been sent but not yet answered
///
/// Dropping it before [`PendingSubscription::wait`] succeeds removes the
/// subscription from the connection.
pub(crate) struct PendingSubscription {
    id: SubscriptionId,
    first: oneshot::Receiver<Result<Value>>,
    state: Arc<Mutex<ConnectionState>>,
    request_timeout: Option<Duration>,
    armed: bool,
}

impl PendingSubscription {
    pub(crate) fn new(
        id: SubscriptionId,
        first: oneshot::Receiver<Result<Value>>,
        state: Arc<Mutex<ConnectionState>>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            first,
            state,
            request_timeout,
            armed: true,
        }
    }

    /// Wait for the first delivery
    pub(crate) async fn wait(mut self) -> Result<Subscription> {
        let outcome = match self.request_timeout {
            Some(limit) => match timeout(limit, &mut self.first).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(WebOsError::Timeout),
            },
            None => (&mut self.first).await,
        };

        match outcome {
            Ok(Ok(initial)) => {
                self.armed = false;
                Ok(Subscription {
                    id: self.id,
                    initial,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WebOsError::Cancelled),
        }
    }
}

impl Drop for PendingSubscription {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let entry = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscriptions
            .remove(&self.id);
        if let Some(entry) = entry {
            tracing::debug!("Dropping subscription {} to {}", self.id, entry.uri);
            entry.stop.cancel();
        }
    }
}
