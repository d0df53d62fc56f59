use crate::buttons;
use crate::client::WebOsClient;
use crate::endpoints as ep;
use crate::error::{Result, WebOsError};
use crate::input::{button_message, click_message, move_message, scroll_message};
use crate::protocol::LUNA_SCHEME;
use crate::types::{settings_query, DeviceState, DEFAULT_PICTURE_KEYS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::path::Path;

/// Which screen power endpoint to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenApi {
    #[default]
    Current,
    /// The `com.webos.service.tv.power` service of webOS 4.x
    WebOs4,
}

/// Pull a field out of a response payload
fn field(mut payload: Value, key: &str) -> Result<Value> {
    payload
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| WebOsError::MalformedResponse(format!("no {key} in {payload}")))
}

/// Alert payload whose every exit path calls `uri` with `params`
fn luna_alert(uri: &str, params: &Value) -> Value {
    let target = format!("{LUNA_SCHEME}{uri}");
    json!({
        "message": " ",
        "buttons": [{"label": "", "onClick": target, "params": params}],
        "onclose": {"uri": target, "params": params},
        "onfail": {"uri": target, "params": params},
    })
}

/// Icon file as base64 data and extension
async fn encode_icon(path: &Path) -> Result<(String, String)> {
    let bytes = tokio::fs::read(path).await?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    Ok((STANDARD.encode(bytes), extension))
}

impl WebOsClient {
    // Power

    /// Turn the TV off
    ///
    /// The power state is read first so an already sleeping TV is not woken.
    /// The TV may drop the connection before answering, so no response is
    /// awaited.
    pub async fn power_off(&self) -> Result<()> {
        let payload = self.request(ep::GET_POWER_STATE, None).await?;
        let mut probe = self.state();
        probe.apply_power(&payload);
        if !probe.is_on() {
            tracing::debug!("TV already off, not sending power off");
            return Ok(());
        }
        self.command(ep::POWER_OFF, None).await
    }

    /// Turn the TV on, where the firmware supports it
    pub async fn power_on(&self) -> Result<Value> {
        self.request(ep::POWER_ON, None).await
    }

    /// Read the power state
    pub async fn get_power_state(&self) -> Result<Value> {
        self.request(ep::GET_POWER_STATE, None).await
    }

    /// Turn the screen off while leaving the TV on
    pub async fn turn_screen_off(&self, api: ScreenApi) -> Result<Value> {
        let uri = match api {
            ScreenApi::Current => ep::TURN_OFF_SCREEN,
            ScreenApi::WebOs4 => ep::TURN_OFF_SCREEN_WO4,
        };
        self.request(uri, Some(json!({"standbyMode": "active"}))).await
    }

    /// Turn the screen back on
    pub async fn turn_screen_on(&self, api: ScreenApi) -> Result<Value> {
        let uri = match api {
            ScreenApi::Current => ep::TURN_ON_SCREEN,
            ScreenApi::WebOs4 => ep::TURN_ON_SCREEN_WO4,
        };
        self.request(uri, Some(json!({"standbyMode": "active"}))).await
    }

    // Apps

    /// Launch points
    pub async fn get_apps(&self) -> Result<Value> {
        field(self.request(ep::GET_APPS, None).await?, "launchPoints")
    }

    /// All apps, including hidden ones
    pub async fn get_apps_all(&self) -> Result<Value> {
        field(self.request(ep::GET_APPS_ALL, None).await?, "apps")
    }

    /// Foreground app id
    pub async fn get_current_app(&self) -> Result<Option<String>> {
        let payload = self.request(ep::GET_CURRENT_APP_INFO, None).await?;
        Ok(payload
            .get("appId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Launch an app by id
    pub async fn launch_app(&self, app_id: &str) -> Result<Value> {
        self.request(ep::LAUNCH, Some(json!({"id": app_id}))).await
    }

    /// Launch an app with launch parameters
    pub async fn launch_app_with_params(&self, app_id: &str, params: Value) -> Result<Value> {
        self.request(ep::LAUNCH, Some(json!({"id": app_id, "params": params})))
            .await
    }

    /// Launch an app straight into a piece of content
    pub async fn launch_app_with_content_id(
        &self,
        app_id: &str,
        content_id: &str,
    ) -> Result<Value> {
        self.request(ep::LAUNCH, Some(json!({"id": app_id, "contentId": content_id})))
            .await
    }

    /// Close a running app
    pub async fn close_app(&self, app_id: &str) -> Result<Value> {
        self.request(ep::LAUNCHER_CLOSE, Some(json!({"id": app_id})))
            .await
    }

    // System

    /// List the services the TV exposes
    pub async fn get_services(&self) -> Result<Value> {
        field(self.request(ep::GET_SERVICES, None).await?, "services")
    }

    /// Read software version info
    pub async fn get_software_info(&self) -> Result<Value> {
        self.request(ep::GET_SOFTWARE_INFO, None).await
    }

    /// Read model and system info
    pub async fn get_system_info(&self) -> Result<Value> {
        self.request(ep::GET_SYSTEM_INFO, None).await
    }

    /// Read system settings of one category
    pub async fn get_system_settings(&self, category: &str, keys: &[&str]) -> Result<Value> {
        self.request(ep::GET_SYSTEM_SETTINGS, Some(settings_query(category, keys)))
            .await
    }

    /// Read picture settings; defaults to contrast, backlight, brightness
    /// and color when `keys` is empty
    pub async fn get_picture_settings(&self, keys: &[&str]) -> Result<Value> {
        let keys = if keys.is_empty() {
            &DEFAULT_PICTURE_KEYS[..]
        } else {
            keys
        };
        field(self.get_system_settings("picture", keys).await?, "settings")
    }

    /// Read config values by key
    pub async fn get_configs(&self, keys: &[&str]) -> Result<Value> {
        self.request(ep::GET_CONFIGS, Some(json!({"configNames": keys})))
            .await
    }

    // Inputs

    /// List external inputs
    pub async fn get_inputs(&self) -> Result<Value> {
        field(self.request(ep::GET_INPUTS, None).await?, "devices")
    }

    /// Switch to an external input
    pub async fn set_input(&self, input_id: &str) -> Result<Value> {
        self.request(ep::SET_INPUT, Some(json!({"inputId": input_id})))
            .await
    }

    // Audio

    /// Read mute and volume status
    pub async fn get_audio_status(&self) -> Result<Value> {
        self.request(ep::GET_AUDIO_STATUS, None).await
    }

    /// Read the mute state
    pub async fn get_muted(&self) -> Result<Option<bool>> {
        let status = self.get_audio_status().await?;
        Ok(status.get("mute").and_then(Value::as_bool))
    }

    /// Mute or unmute
    pub async fn set_mute(&self, mute: bool) -> Result<Value> {
        self.request(ep::SET_MUTE, Some(json!({"mute": mute}))).await
    }

    /// Read the volume level
    pub async fn get_volume(&self) -> Result<Option<i64>> {
        let payload = self.request(ep::GET_VOLUME, None).await?;
        let mut probe = DeviceState::default();
        probe.apply_volume(&payload);
        Ok(probe.volume)
    }

    /// Set the volume; negative values are clamped to zero
    pub async fn set_volume(&self, volume: i64) -> Result<Value> {
        self.request(ep::SET_VOLUME, Some(json!({"volume": volume.max(0)})))
            .await
    }

    /// Step the volume up, paced on outputs that need it
    pub async fn volume_up(&self) -> Result<Value> {
        self.volume_step(ep::VOLUME_UP).await
    }

    /// Step the volume down, paced on outputs that need it
    pub async fn volume_down(&self) -> Result<Value> {
        self.volume_step(ep::VOLUME_DOWN).await
    }

    /// Read the active sound output
    pub async fn get_sound_output(&self) -> Result<Option<String>> {
        let payload = self.request(ep::GET_SOUND_OUTPUT, None).await?;
        Ok(payload
            .get("soundOutput")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Switch the sound output
    pub async fn change_sound_output(&self, output: &str) -> Result<Value> {
        self.request(ep::CHANGE_SOUND_OUTPUT, Some(json!({"output": output})))
            .await
    }

    // TV channels

    /// Next channel
    pub async fn channel_up(&self) -> Result<Value> {
        self.request(ep::TV_CHANNEL_UP, None).await
    }

    /// Previous channel
    pub async fn channel_down(&self) -> Result<Value> {
        self.request(ep::TV_CHANNEL_DOWN, None).await
    }

    /// List live TV channels
    pub async fn get_channels(&self) -> Result<Value> {
        field(self.request(ep::GET_TV_CHANNELS, None).await?, "channelList")
    }

    /// Read the current channel
    pub async fn get_current_channel(&self) -> Result<Value> {
        self.request(ep::GET_CURRENT_CHANNEL, None).await
    }

    /// Read program info for the current channel
    pub async fn get_channel_info(&self) -> Result<Value> {
        self.request(ep::GET_CHANNEL_INFO, None).await
    }

    /// Tune to a channel by id
    pub async fn set_channel(&self, channel_id: &str) -> Result<Value> {
        self.request(ep::SET_CHANNEL, Some(json!({"channelId": channel_id})))
            .await
    }

    // Media

    /// Resume media playback
    pub async fn play(&self) -> Result<Value> {
        self.request(ep::MEDIA_PLAY, None).await
    }

    /// Pause media playback
    pub async fn pause(&self) -> Result<Value> {
        self.request(ep::MEDIA_PAUSE, None).await
    }

    /// Stop media playback
    pub async fn stop(&self) -> Result<Value> {
        self.request(ep::MEDIA_STOP, None).await
    }

    /// Close the media viewer
    pub async fn close_media(&self) -> Result<Value> {
        self.request(ep::MEDIA_CLOSE, None).await
    }

    /// Rewind media
    pub async fn rewind(&self) -> Result<Value> {
        self.request(ep::MEDIA_REWIND, None).await
    }

    /// Fast forward media
    pub async fn fast_forward(&self) -> Result<Value> {
        self.request(ep::MEDIA_FAST_FORWARD, None).await
    }

    // Keyboard

    /// Press enter in the on-screen keyboard
    pub async fn send_enter_key(&self) -> Result<Value> {
        self.request(ep::SEND_ENTER, None).await
    }

    /// Delete the last character in the on-screen keyboard
    pub async fn send_delete_key(&self) -> Result<Value> {
        self.request(ep::SEND_DELETE, None).await
    }

    /// Type text into the focused field, optionally replacing its content
    pub async fn insert_text(&self, text: &str, replace: bool) -> Result<Value> {
        self.request(ep::INSERT_TEXT, Some(json!({"text": text, "replace": replace})))
            .await
    }

    // Web

    /// Open a URL in the browser
    pub async fn open_url(&self, url: &str) -> Result<Value> {
        self.request(ep::OPEN, Some(json!({"target": url}))).await
    }

    /// Close the browser
    pub async fn close_web(&self) -> Result<Value> {
        self.request(ep::CLOSE_WEB_APP, None).await
    }

    // Notifications

    /// Show a toast, optionally with an icon read from disk
    pub async fn send_message(&self, message: &str, icon: Option<&Path>) -> Result<Value> {
        let (icon_data, icon_extension) = match icon {
            Some(path) => encode_icon(path).await?,
            None => (String::new(), String::new()),
        };
        self.request(
            ep::SHOW_MESSAGE,
            Some(json!({
                "message": message,
                "iconData": icon_data,
                "iconExtension": icon_extension,
            })),
        )
        .await
    }

    /// Call an internal `luna://` service
    ///
    /// Luna targets are not reachable directly. This opens an alert whose
    /// button and close handlers call the target, then closes it. The
    /// target's own response is not available.
    pub async fn luna_request(&self, uri: &str, params: Value) -> Result<Value> {
        let alert = self
            .request(ep::CREATE_ALERT, Some(luna_alert(uri, &params)))
            .await?;
        let alert_id = alert
            .get("alertId")
            .cloned()
            .ok_or_else(|| WebOsError::MalformedResponse(format!("no alertId in {alert}")))?;
        self.request(ep::CLOSE_ALERT, Some(json!({"alertId": alert_id})))
            .await
    }

    /// Open the input picker
    pub async fn input_button(&self) -> Result<Value> {
        self.luna_request(ep::LUNA_SHOW_INPUT_PICKER, json!({})).await
    }

    /// Start the screen saver
    pub async fn show_screen_saver(&self) -> Result<Value> {
        self.luna_request(ep::LUNA_TURN_ON_SCREEN_SAVER, json!({})).await
    }

    /// Set the picture mode of the current input
    pub async fn set_current_picture_mode(&self, mode: &str) -> Result<Value> {
        self.luna_request(
            ep::LUNA_SET_SYSTEM_SETTINGS,
            json!({"category": "picture", "settings": {"pictureMode": mode}}),
        )
        .await
    }

    /// Set the picture mode for one input, dynamic range and 3D mode
    ///
    /// Typical values: `tv_input` `hdmi1`, `dynamic_range` `sdr` or
    /// `dolbyHdr`, `stereoscopic` `2d`.
    pub async fn set_picture_mode(
        &self,
        mode: &str,
        tv_input: &str,
        dynamic_range: &str,
        stereoscopic: &str,
    ) -> Result<Value> {
        self.luna_request(
            ep::LUNA_SET_SYSTEM_SETTINGS,
            json!({
                "category": format!("picture${tv_input}.x.{stereoscopic}.{dynamic_range}"),
                "settings": {"pictureMode": mode},
            }),
        )
        .await
    }

    /// Write picture settings of the current mode
    pub async fn set_current_picture_settings(&self, settings: Value) -> Result<Value> {
        self.luna_request(
            ep::LUNA_SET_SYSTEM_SETTINGS,
            json!({"category": "picture", "settings": settings}),
        )
        .await
    }

    /// Write picture settings of one picture mode and input
    pub async fn set_picture_settings(
        &self,
        settings: Value,
        mode: &str,
        tv_input: &str,
        stereoscopic: &str,
    ) -> Result<Value> {
        self.luna_request(
            ep::LUNA_SET_SYSTEM_SETTINGS,
            json!({
                "category": format!("picture${tv_input}.{mode}.{stereoscopic}.x"),
                "settings": settings,
            }),
        )
        .await
    }

    /// Write `option` category settings
    pub async fn set_other_settings(&self, settings: Value) -> Result<Value> {
        self.luna_request(
            ep::LUNA_SET_SYSTEM_SETTINGS,
            json!({"category": "option", "settings": settings}),
        )
        .await
    }

    /// Write config values
    pub async fn set_configs(&self, configs: Value) -> Result<Value> {
        self.luna_request(ep::LUNA_SET_CONFIGS, json!({"configs": configs}))
            .await
    }

    // Pointer input socket

    /// Press a remote button
    ///
    /// Names outside [`buttons::BUTTONS`] are rejected unless `check_valid`
    /// is false.
    pub async fn button(&self, name: &str, check_valid: bool) -> Result<()> {
        if check_valid && !buttons::is_known(name) {
            return Err(WebOsError::InvalidArgument(format!(
                "button {name} is not known, pass check_valid = false to send it anyway"
            )));
        }
        self.send_input(button_message(name)).await
    }

    /// Move the pointer
    pub async fn move_pointer(&self, dx: i32, dy: i32, down: bool) -> Result<()> {
        self.send_input(move_message(dx, dy, down)).await
    }

    /// Click at the pointer position
    pub async fn click(&self) -> Result<()> {
        self.send_input(click_message()).await
    }

    /// Scroll by the given offsets
    pub async fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.send_input(scroll_message(dx, dy)).await
    }
}
