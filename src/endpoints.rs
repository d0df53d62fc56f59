//! `ssap://` targets used by the client
//!
//! Targets are given without their scheme; the frame codec adds it.

// Power
pub const GET_POWER_STATE: &str = "com.webos.service.tvpower/power/getPowerState";
pub const POWER_OFF: &str = "system/turnOff";
pub const POWER_ON: &str = "system/turnOn";
pub const TURN_OFF_SCREEN: &str = "com.webos.service.tvpower/power/turnOffScreen";
pub const TURN_ON_SCREEN: &str = "com.webos.service.tvpower/power/turnOnScreen";
pub const TURN_OFF_SCREEN_WO4: &str = "com.webos.service.tv.power/turnOffScreen";
pub const TURN_ON_SCREEN_WO4: &str = "com.webos.service.tv.power/turnOnScreen";

// Apps
pub const GET_APPS: &str = "com.webos.applicationManager/listLaunchPoints";
pub const GET_APPS_ALL: &str = "com.webos.applicationManager/listApps";
pub const GET_CURRENT_APP_INFO: &str = "com.webos.applicationManager/getForegroundAppInfo";
pub const LAUNCH: &str = "system.launcher/launch";
pub const LAUNCHER_CLOSE: &str = "system.launcher/close";
pub const OPEN: &str = "system.launcher/open";
pub const CLOSE_WEB_APP: &str = "webapp/closeWebApp";

// System
pub const GET_SERVICES: &str = "api/getServiceList";
pub const GET_SOFTWARE_INFO: &str = "com.webos.service.update/getCurrentSWInformation";
pub const GET_SYSTEM_INFO: &str = "system/getSystemInfo";
pub const GET_SYSTEM_SETTINGS: &str = "settings/getSystemSettings";
pub const GET_CONFIGS: &str = "config/getConfigs";

// Inputs
pub const GET_INPUTS: &str = "tv/getExternalInputList";
pub const SET_INPUT: &str = "tv/switchInput";
pub const INPUT_SOCKET: &str = "com.webos.service.networkinput/getPointerInputSocket";

// Audio
pub const GET_AUDIO_STATUS: &str = "audio/getStatus";
pub const SET_MUTE: &str = "audio/setMute";
pub const GET_VOLUME: &str = "audio/getVolume";
pub const SET_VOLUME: &str = "audio/setVolume";
pub const VOLUME_UP: &str = "audio/volumeUp";
pub const VOLUME_DOWN: &str = "audio/volumeDown";
pub const GET_SOUND_OUTPUT: &str = "com.webos.service.apiadapter/audio/getSoundOutput";
pub const CHANGE_SOUND_OUTPUT: &str = "com.webos.service.apiadapter/audio/changeSoundOutput";

// TV channels
pub const TV_CHANNEL_UP: &str = "tv/channelUp";
pub const TV_CHANNEL_DOWN: &str = "tv/channelDown";
pub const GET_TV_CHANNELS: &str = "tv/getChannelList";
pub const GET_CURRENT_CHANNEL: &str = "tv/getCurrentChannel";
pub const GET_CHANNEL_INFO: &str = "tv/getChannelProgramInfo";
pub const SET_CHANNEL: &str = "tv/openChannel";

// Media
pub const MEDIA_PLAY: &str = "media.controls/play";
pub const MEDIA_PAUSE: &str = "media.controls/pause";
pub const MEDIA_STOP: &str = "media.controls/stop";
pub const MEDIA_CLOSE: &str = "media.viewer/close";
pub const MEDIA_REWIND: &str = "media.controls/rewind";
pub const MEDIA_FAST_FORWARD: &str = "media.controls/fastForward";

// IME
pub const SEND_ENTER: &str = "com.webos.service.ime/sendEnterKey";
pub const SEND_DELETE: &str = "com.webos.service.ime/deleteCharacters";
pub const INSERT_TEXT: &str = "com.webos.service.ime/insertText";

// Notifications
pub const SHOW_MESSAGE: &str = "system.notifications/createToast";
pub const CREATE_ALERT: &str = "system.notifications/createAlert";
pub const CLOSE_ALERT: &str = "system.notifications/closeAlert";

// Luna targets, reached through the alert workaround
pub const LUNA_SHOW_INPUT_PICKER: &str = "com.webos.surfacemanager/showInputPicker";
pub const LUNA_SET_SYSTEM_SETTINGS: &str = "com.webos.settingsservice/setSystemSettings";
pub const LUNA_SET_CONFIGS: &str = "com.webos.service.config/setConfigs";
pub const LUNA_TURN_ON_SCREEN_SAVER: &str = "com.webos.service.tvpower/power/turnOnScreenSaver";
