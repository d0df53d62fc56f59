use crate::error::{Result, WebOsError};
use crate::transport::WsLink;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Source of the cached power state
pub(crate) trait PowerGate: Send + Sync {
    fn is_on(&self) -> bool;
}

/// Probe a link until it fails
///
/// Sleeps `interval` between probes and skips the probe while the TV is
/// believed off. Only returns with an error: `KeepaliveTimeout` when a pong
/// is late, `ConnectionClosed` when the link goes away.
pub(crate) async fn supervise(
    link: &WsLink,
    gate: &dyn PowerGate,
    interval: Duration,
    ping_timeout: Duration,
) -> WebOsError {
    loop {
        tokio::select! {
            _ = link.closed() => return WebOsError::ConnectionClosed,
            _ = sleep(interval) => {}
        }

        if !gate.is_on() {
            tracing::trace!("TV is off, skipping keepalive probe");
            continue;
        }

        if let Err(e) = probe(link, ping_timeout).await {
            tracing::warn!("Keepalive failed: {}", e);
            return e;
        }
    }
}

async fn probe(link: &WsLink, ping_timeout: Duration) -> Result<()> {
    match timeout(ping_timeout, link.ping()).await {
        Ok(acked) => acked,
        Err(_) => Err(WebOsError::KeepaliveTimeout),
    }
}
