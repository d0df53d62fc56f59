use crate::error::{Result, WebOsError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheme prefix for regular API targets
pub const SSAP_SCHEME: &str = "ssap://";

/// Scheme prefix for internal Luna service targets
pub const LUNA_SCHEME: &str = "luna://";

/// Correlation identifier carried in the `id` field
///
/// The TV echoes whatever the client sent, so both numbers and strings
/// appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameId {
    Number(u64),
    Text(String),
}

impl FrameId {
    /// Numeric identifier, also accepting numeric strings
    pub fn as_number(&self) -> Option<u64> {
        match self {
            FrameId::Number(n) => Some(*n),
            FrameId::Text(s) => s.parse().ok(),
        }
    }
}

/// Outbound frame types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Hello,
    Register,
    Request,
    Subscribe,
    Unsubscribe,
}

/// The three exchange kinds the protocol supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Fire and forget, no response is awaited
    Command,
    /// Single correlated response
    Request,
    /// Open-ended stream of frames sharing the request id
    Subscribe,
}

impl ExchangeKind {
    fn frame_type(self) -> FrameType {
        match self {
            ExchangeKind::Command | ExchangeKind::Request => FrameType::Request,
            ExchangeKind::Subscribe => FrameType::Subscribe,
        }
    }
}

/// Outbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: FrameId,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Inbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<FrameId>,
    #[serde(rename = "type", default)]
    pub frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request {
    /// Build an exchange frame for an `ssap://` target
    ///
    /// Targets that already carry a scheme are sent as given.
    pub fn new(id: u64, kind: ExchangeKind, uri: &str, payload: Option<Value>) -> Self {
        let uri = if uri.contains("://") {
            uri.to_string()
        } else {
            format!("{SSAP_SCHEME}{uri}")
        };
        Self {
            id: FrameId::Number(id),
            frame_type: kind.frame_type(),
            uri: Some(uri),
            payload: Some(payload.unwrap_or_else(|| Value::Object(Default::default()))),
        }
    }

    /// Capability probe sent before registration
    pub fn hello() -> Self {
        Self {
            id: FrameId::Text("hello".to_string()),
            frame_type: FrameType::Hello,
            uri: None,
            payload: None,
        }
    }

    /// Registration frame carrying the permission manifest
    pub fn register(payload: Value) -> Self {
        Self {
            id: FrameId::Text("register_0".to_string()),
            frame_type: FrameType::Register,
            uri: None,
            payload: Some(payload),
        }
    }

    /// Stop a subscription on the TV side
    pub fn unsubscribe(id: u64) -> Self {
        Self {
            id: FrameId::Number(id),
            frame_type: FrameType::Unsubscribe,
            uri: None,
            payload: None,
        }
    }

    /// Serialize to the wire text
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Response {
    /// Parse a frame from wire text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check if this is an error frame
    pub fn is_error(&self) -> bool {
        self.frame_type == "error"
    }

    /// Numeric correlation id, if any
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(FrameId::as_number)
    }

    /// Resolve the frame into its payload
    ///
    /// Error frames become `ServiceNotFound` or `Device`. Otherwise the
    /// payload must carry `returnValue` or `subscribed`; neither is a
    /// malformed response and an explicit `false` is a failed request.
    pub fn into_payload(self) -> Result<Value> {
        if self.is_error() {
            let code = self
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(WebOsError::from_device(code));
        }

        let payload = match self.payload {
            Some(payload) => payload,
            None => {
                return Err(WebOsError::MalformedResponse(format!(
                    "no payload in {} frame",
                    self.frame_type
                )))
            }
        };

        let return_value = payload.get("returnValue").and_then(Value::as_bool);
        let subscribed = payload.get("subscribed").and_then(Value::as_bool);

        match (return_value, subscribed) {
            (Some(true), _) | (_, Some(true)) => Ok(payload),
            (Some(false), _) | (None, Some(false)) => {
                Err(WebOsError::RequestFailed(payload.to_string()))
            }
            (None, None) => Err(WebOsError::MalformedResponse(payload.to_string())),
        }
    }
}
