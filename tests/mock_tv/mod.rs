#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code)]
//! Mock webOS TV for integration testing
//!
//! Speaks the JSON control protocol on one port and the plain-text pointer
//! protocol on a second one.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use webos_tv::{ClientConfig, LIVE_TV_APP_ID};

/// A frame the mock received
#[derive(Debug, Clone)]
pub struct Received {
    pub frame_type: String,
    pub id: Value,
    pub uri: String,
    pub payload: Value,
    pub at: Instant,
}

/// The connection currently attached to the mock
struct Attached {
    tx: mpsc::UnboundedSender<Message>,
    subscriptions: HashMap<String, u64>,
    freeze: CancellationToken,
}

/// Mock TV state
pub struct MockTvState {
    pub client_key: String,
    pub power: String,
    pub foreground_app: String,
    pub sound_output: String,
    /// Input socket address handed out instead of the mock's own
    pub input_socket_path: Option<String>,
    /// Targets answered with the not-found error
    pub not_found: HashSet<String>,
    /// Targets answered without `returnValue`
    pub malformed: HashSet<String>,
    pub received: Vec<Received>,
    pub registrations: Vec<Value>,
    pub connections: usize,
    pub input_messages: Vec<String>,
    attached: Option<Attached>,
}

impl Default for MockTvState {
    fn default() -> Self {
        Self {
            client_key: "abc".to_string(),
            power: "Active".to_string(),
            foreground_app: "netflix".to_string(),
            sound_output: "tv_speaker".to_string(),
            input_socket_path: None,
            not_found: HashSet::new(),
            malformed: HashSet::new(),
            received: Vec::new(),
            registrations: Vec::new(),
            connections: 0,
            input_messages: Vec::new(),
            attached: None,
        }
    }
}

/// Mock TV server
pub struct MockTv {
    addr: SocketAddr,
    state: Arc<Mutex<MockTvState>>,
    handles: Vec<JoinHandle<()>>,
}

impl MockTv {
    /// Start a mock TV on random ports
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockTvState::default()));

        let input_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let input_addr = input_listener.local_addr().unwrap();
        let input_state = state.clone();
        let input = tokio::spawn(async move {
            while let Ok((stream, _)) = input_listener.accept().await {
                tokio::spawn(handle_input(stream, input_state.clone()));
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let control_state = state.clone();
        let control = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let socket_path = format!("ws://{input_addr}");
                tokio::spawn(handle_connection(stream, control_state.clone(), socket_path));
            }
        });

        Self {
            addr,
            state,
            handles: vec![input, control],
        }
    }

    /// Host to give the client
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Client settings pointing at this mock, keepalive off
    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_port(self.addr.port())
            .with_keepalive(None, None)
            .with_teardown_grace(Duration::from_secs(2))
    }

    /// Inspect or change the mock state
    pub fn with<T>(&self, f: impl FnOnce(&mut MockTvState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Push a payload on the subscription to `uri`; false when there is none
    pub fn push(&self, uri: &str, payload: Value) -> bool {
        let state = self.state.lock().unwrap();
        let Some(attached) = state.attached.as_ref() else {
            return false;
        };
        let Some(id) = attached.subscriptions.get(uri) else {
            return false;
        };
        let frame = json!({"type": "response", "id": id, "payload": payload});
        attached.tx.send(Message::Text(frame.to_string())).is_ok()
    }

    /// Stop reading from the current connection, so pings go unanswered
    pub fn freeze(&self) {
        if let Some(attached) = self.state.lock().unwrap().attached.as_ref() {
            attached.freeze.cancel();
        }
    }

    /// Frames of the given type sent to `uri`
    pub fn frames(&self, frame_type: &str, uri: &str) -> Vec<Received> {
        self.with(|s| {
            s.received
                .iter()
                .filter(|r| r.frame_type == frame_type && r.uri == uri)
                .cloned()
                .collect()
        })
    }

    pub fn subscribe_count(&self, uri: &str) -> usize {
        self.frames("subscribe", uri).len()
    }

    pub fn stop(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Answer to a request or the first frame of a subscription
fn answer(uri: &str, payload: &Value, state: &MockTvState) -> Value {
    match uri {
        "com.webos.service.tvpower/power/getPowerState" => json!({"state": state.power}),
        "com.webos.applicationManager/getForegroundAppInfo" => {
            json!({"appId": state.foreground_app})
        }
        "audio/getStatus" => json!({"mute": false, "volume": 10}),
        "audio/getVolume" => json!({
            "volumeStatus": {"volume": 10, "soundOutput": state.sound_output}
        }),
        "com.webos.applicationManager/listLaunchPoints" => json!({
            "launchPoints": [
                {"id": "netflix", "title": "Netflix"},
                {"id": LIVE_TV_APP_ID, "title": "Live TV"},
            ]
        }),
        "tv/getExternalInputList" => json!({
            "devices": [{"appId": "com.webos.app.hdmi1", "label": "HDMI 1"}]
        }),
        "com.webos.service.apiadapter/audio/getSoundOutput" => {
            json!({"soundOutput": state.sound_output})
        }
        "settings/getSystemSettings" => json!({
            "settings": {"contrast": "80", "backlight": "50", "brightness": "50", "color": "50"}
        }),
        "system/getSystemInfo" => json!({"modelName": "OLED55C1"}),
        "com.webos.service.update/getCurrentSWInformation" => {
            json!({"product_name": "webOSTV 6.0"})
        }
        "tv/getChannelList" => json!({"channelList": [{"channelId": "1_1", "channelNumber": "1"}]}),
        "tv/getCurrentChannel" => json!({"channelId": "1_1", "channelNumber": "1"}),
        "tv/getChannelProgramInfo" => json!({"programList": []}),
        "system.notifications/createAlert" => json!({"alertId": "alert-1"}),
        "test/echo" => json!({"echo": payload}),
        "test/stream" => json!({"seq": 0}),
        _ => json!({}),
    }
}

fn with_flag(mut body: Value, subscribe: bool) -> Value {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("returnValue".to_string(), Value::Bool(true));
        if subscribe {
            obj.insert("subscribed".to_string(), Value::Bool(true));
        }
    }
    body
}

/// Handle a single control connection
async fn handle_connection(stream: TcpStream, state: Arc<Mutex<MockTvState>>, socket_path: String) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let freeze = CancellationToken::new();

    {
        let mut state = state.lock().unwrap();
        state.connections += 1;
        state.attached = Some(Attached {
            tx: tx.clone(),
            subscriptions: HashMap::new(),
            freeze: freeze.clone(),
        });
    }

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            _ = freeze.cancelled() => {
                // Hold the socket open without reading it
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            }
            msg = source.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        handle_frame(frame, &state, &tx, &socket_path);
    }

    let mut state = state.lock().unwrap();
    if state
        .attached
        .as_ref()
        .is_some_and(|attached| attached.tx.same_channel(&tx))
    {
        state.attached = None;
    }
}

fn handle_frame(
    frame: Value,
    state: &Arc<Mutex<MockTvState>>,
    tx: &mpsc::UnboundedSender<Message>,
    socket_path: &str,
) {
    let send = |value: Value| {
        let _ = tx.send(Message::Text(value.to_string()));
    };

    let frame_type = frame["type"].as_str().unwrap_or_default().to_string();
    let id = frame["id"].clone();
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
    let uri = frame["uri"]
        .as_str()
        .unwrap_or_default()
        .trim_start_matches("ssap://")
        .to_string();

    let mut state = state.lock().unwrap();
    state.received.push(Received {
        frame_type: frame_type.clone(),
        id: id.clone(),
        uri: uri.clone(),
        payload: payload.clone(),
        at: Instant::now(),
    });

    match frame_type.as_str() {
        "hello" => send(json!({
            "type": "hello",
            "id": "hello",
            "payload": {"protocolVersion": 1, "deviceOS": "webOS"}
        })),
        "register" => {
            state.registrations.push(payload.clone());
            let key = state.client_key.clone();
            if payload.get("client-key").and_then(Value::as_str) != Some(key.as_str()) {
                send(json!({
                    "type": "response",
                    "id": "register_0",
                    "payload": {"pairingType": "PROMPT", "returnValue": true}
                }));
            }
            send(json!({"type": "registered", "id": "register_0", "payload": {"client-key": key}}));
        }
        "request" | "subscribe" => {
            let subscribe = frame_type == "subscribe";
            if subscribe {
                if let (Some(attached), Some(n)) = (state.attached.as_mut(), id.as_u64()) {
                    attached.subscriptions.insert(uri.clone(), n);
                }
            }

            if state.not_found.contains(&uri) {
                send(json!({
                    "type": "error",
                    "id": id,
                    "error": "404 no such service or method",
                    "payload": {}
                }));
                return;
            }
            if state.malformed.contains(&uri) {
                send(json!({"type": "response", "id": id, "payload": {"x": 1}}));
                return;
            }

            let body = match uri.as_str() {
                "com.webos.service.networkinput/getPointerInputSocket" => {
                    let path = state.input_socket_path.as_deref().unwrap_or(socket_path);
                    json!({"socketPath": path})
                }
                _ => answer(&uri, &payload, &state),
            };
            let response =
                json!({"type": "response", "id": id, "payload": with_flag(body, subscribe)});

            let delay = payload.get("delayMs").and_then(Value::as_u64);
            match delay {
                Some(ms) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        let _ = tx.send(Message::Text(response.to_string()));
                    });
                }
                None => send(response),
            }

            if uri == "test/stream" {
                let count = payload.get("count").and_then(Value::as_u64).unwrap_or(0);
                for seq in 1..=count {
                    send(json!({"type": "response", "id": id, "payload": {"seq": seq}}));
                }
            }
        }
        _ => {}
    }
}

/// Handle a pointer input connection
async fn handle_input(stream: TcpStream, state: Arc<Mutex<MockTvState>>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            state.lock().unwrap().input_messages.push(text);
        }
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
