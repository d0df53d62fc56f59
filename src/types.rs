use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// App id of the built-in live TV app
pub const LIVE_TV_APP_ID: &str = "com.webos.app.livetv";

/// Power state string reported when the TV never sent one
pub const POWER_UNKNOWN: &str = "Unknown";

/// Power states that mean the TV is not usable
const OFF_STATES: [&str; 3] = ["Power Off", "Suspend", "Active Standby"];

/// App/launch point identifier
pub type AppId = String;

/// Power state as reported by the TV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerState {
    pub state: String,
}

/// Cached view of the TV's state
///
/// A field is `None` (or empty for the maps) until the TV has delivered a
/// value for it, and holds the latest delivered value afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub power: Option<PowerState>,
    pub current_app_id: Option<AppId>,
    pub muted: Option<bool>,
    pub volume: Option<i64>,
    pub current_channel: Option<Value>,
    pub channel_info: Option<Value>,
    pub channels: Option<Value>,
    /// Launch points keyed by app id
    pub apps: BTreeMap<AppId, Value>,
    /// External inputs keyed by app id
    pub inputs: BTreeMap<AppId, Value>,
    pub sound_output: Option<String>,
    pub picture_settings: Option<Value>,
    pub system_info: Option<Value>,
    pub software_info: Option<Value>,
    pub hello_info: Option<Value>,
}

impl DeviceState {
    /// Whether the TV is powered on
    ///
    /// Older firmware has no power state; for those the TV counts as on when
    /// a foreground app is known.
    pub fn is_on(&self) -> bool {
        match self.power.as_ref().map(|p| p.state.as_str()) {
            Some(POWER_UNKNOWN) => self
                .current_app_id
                .as_deref()
                .is_some_and(|app| !app.is_empty()),
            None => false,
            Some(state) => !OFF_STATES.contains(&state),
        }
    }

    /// Whether the TV is on with the screen lit
    pub fn is_screen_on(&self) -> bool {
        self.is_on() && self.power.as_ref().map(|p| p.state.as_str()) != Some("Screen Off")
    }

    pub(crate) fn apply_power(&mut self, payload: &Value) {
        let state = payload
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or(POWER_UNKNOWN)
            .to_string();
        self.power = Some(PowerState { state });
    }

    pub(crate) fn apply_current_app(&mut self, payload: &Value) {
        self.current_app_id = payload
            .get("appId")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    pub(crate) fn apply_muted(&mut self, payload: &Value) {
        self.muted = payload.get("mute").and_then(Value::as_bool);
    }

    pub(crate) fn apply_volume(&mut self, payload: &Value) {
        let status = payload.get("volumeStatus").unwrap_or(payload);
        self.volume = status.get("volume").and_then(Value::as_i64);
    }

    /// Full list in `launchPoints`, otherwise a single-app delta
    pub(crate) fn apply_apps(&mut self, payload: &Value) {
        if let Some(apps) = payload.get("launchPoints").and_then(Value::as_array) {
            self.apps = apps
                .iter()
                .filter_map(|app| {
                    let id = app.get("id").and_then(Value::as_str)?;
                    Some((id.to_string(), app.clone()))
                })
                .collect();
            return;
        }

        let Some(id) = payload.get("id").and_then(Value::as_str) else {
            tracing::warn!("App update without id: {}", payload);
            return;
        };
        match payload.get("change").and_then(Value::as_str) {
            Some("removed") => {
                self.apps.remove(id);
            }
            _ => {
                self.apps.insert(id.to_string(), payload.clone());
            }
        }
    }

    pub(crate) fn apply_inputs(&mut self, payload: &Value) {
        let devices = payload
            .get("devices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.inputs = devices
            .into_iter()
            .filter_map(|device| {
                let id = device.get("appId").and_then(Value::as_str)?.to_string();
                Some((id, device))
            })
            .collect();
    }

    pub(crate) fn apply_sound_output(&mut self, payload: &Value) {
        self.sound_output = payload
            .get("soundOutput")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    /// Merge changed keys into the previous settings object
    pub(crate) fn apply_picture_settings(&mut self, payload: &Value) {
        let Some(settings) = payload.get("settings").cloned() else {
            return;
        };
        match (self.picture_settings.as_mut(), settings) {
            (Some(Value::Object(current)), Value::Object(update)) => {
                current.extend(update);
            }
            (_, settings) => self.picture_settings = Some(settings),
        }
    }

    pub(crate) fn apply_channels(&mut self, payload: &Value) {
        self.channels = payload.get("channelList").cloned();
    }
}

/// Picture settings keys fetched by default
pub const DEFAULT_PICTURE_KEYS: [&str; 4] = ["contrast", "backlight", "brightness", "color"];

/// Build a `{"category": .., "keys": [..]}` settings query
pub(crate) fn settings_query(category: &str, keys: &[&str]) -> Value {
    let mut query = Map::new();
    query.insert("category".to_string(), Value::from(category));
    query.insert(
        "keys".to_string(),
        Value::Array(keys.iter().map(|k| Value::from(*k)).collect()),
    );
    Value::Object(query)
}
