use crate::connection::Connection;
use crate::endpoints as ep;
use crate::error::{Result, WebOsError};
use crate::keepalive::{self, PowerGate};
use crate::transport::{self, WsLink};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// `type:button` message for the pointer socket
pub(crate) fn button_message(name: &str) -> String {
    format!("type:button\nname:{name}\n\n")
}

/// `type:move` message; `down` reports a held button
pub(crate) fn move_message(dx: i32, dy: i32, down: bool) -> String {
    format!("type:move\ndx:{dx}\ndy:{dy}\ndown:{}\n\n", u8::from(down))
}

pub(crate) fn click_message() -> String {
    "type:click\n\n".to_string()
}

pub(crate) fn scroll_message(dx: i32, dy: i32) -> String {
    format!("type:scroll\ndx:{dx}\ndy:{dy}\n\n")
}

/// Called with the error when the socket cannot be opened
pub(crate) type OpenFailure = Box<dyn Fn(&WebOsError) + Send + Sync>;

#[derive(Default)]
struct Slot {
    path: Option<String>,
    link: Option<Arc<WsLink>>,
    keepalive: Option<JoinHandle<()>>,
}

/// Lazily opened pointer input socket
pub(crate) struct InputChannel {
    slot: Mutex<Slot>,
    connect_timeout: Duration,
    keepalive: Option<(Duration, Duration)>,
    gate: Arc<dyn PowerGate>,
    on_open_failure: OpenFailure,
}

impl InputChannel {
    pub(crate) fn new(
        connect_timeout: Duration,
        keepalive: Option<(Duration, Duration)>,
        gate: Arc<dyn PowerGate>,
        on_open_failure: OpenFailure,
    ) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            connect_timeout,
            keepalive,
            gate,
            on_open_failure,
        }
    }

    /// Send one message, opening the socket first if needed
    pub(crate) async fn send(&self, connection: &Connection, message: String) -> Result<()> {
        let link = match self.link(connection).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("Could not open input socket: {}", e);
                (self.on_open_failure)(&e);
                return Err(e);
            }
        };
        link.send_text(message)
    }

    async fn link(&self, connection: &Connection) -> Result<Arc<WsLink>> {
        let mut slot = self.slot.lock().await;

        if let Some(link) = slot.link.as_ref() {
            if !link.is_closed() {
                return Ok(link.clone());
            }
            tracing::info!("Input socket closed, reopening");
        }
        if let Some(task) = slot.keepalive.take() {
            task.abort();
        }
        slot.link = None;

        let path = match slot.path.clone() {
            Some(path) => path,
            None => {
                let payload = connection.request(ep::INPUT_SOCKET, None).await?;
                let path = payload
                    .get("socketPath")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        WebOsError::MalformedResponse(format!("no socketPath in {payload}"))
                    })?;
                slot.path = Some(path.clone());
                path
            }
        };

        let ws = transport::open(&path, self.connect_timeout).await?;
        let link = Arc::new(WsLink::spawn(ws, "input", |text| {
            tracing::debug!("[input] Received: {}", text);
        }));

        if let Some((interval, ping_timeout)) = self.keepalive {
            let watched = link.clone();
            let gate = self.gate.clone();
            slot.keepalive = Some(tokio::spawn(async move {
                let err =
                    keepalive::supervise(&watched, gate.as_ref(), interval, ping_timeout).await;
                tracing::info!("Input socket keepalive stopped: {}", err);
                watched.close().await;
            }));
        }

        slot.link = Some(link.clone());
        Ok(link)
    }

    /// Close the socket if it is open
    pub(crate) async fn close(&self) {
        let (link, keepalive) = {
            let mut slot = self.slot.lock().await;
            (slot.link.take(), slot.keepalive.take())
        };
        if let Some(task) = keepalive {
            task.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
    }
}
