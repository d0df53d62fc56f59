/// Button names the pointer input socket is known to accept
pub const BUTTONS: &[&str] = &[
    "LEFT",
    "RIGHT",
    "UP",
    "DOWN",
    "RED",
    "GREEN",
    "YELLOW",
    "BLUE",
    "CHANNELUP",
    "CHANNELDOWN",
    "VOLUMEUP",
    "VOLUMEDOWN",
    "PLAY",
    "PAUSE",
    "STOP",
    "REWIND",
    "FASTFORWARD",
    "ASTERISK",
    "BACK",
    "EXIT",
    "ENTER",
    "3D_MODE",
    "AD",
    "ADVANCE_SETTING",
    "ALEXA",
    "AMAZON",
    "ASPECT_RATIO",
    "CC",
    "DASH",
    "EMANUAL",
    "EZPIC",
    "EZ_ADJUST",
    "EYE_Q",
    "GUIDE",
    "HCEC",
    "HOME",
    "INFO",
    "IN_START",
    "INPUT_HUB",
    "IVI",
    "LIST",
    "LIVE_ZOOM",
    "MAGNIFIER_ZOOM",
    "MENU",
    "MUTE",
    "MYAPPS",
    "NETFLIX",
    "POWER",
    "PROGRAM",
    "QMENU",
    "RECENT",
    "RECLIST",
    "RECORD",
    "SAP",
    "SCREEN_REMOTE",
    "SEARCH",
    "SOCCER",
    "TELETEXT",
    "TEXTOPTION",
    "TIMER",
    "TV",
    "TWIN",
    "UPDOWN",
    "USP",
    "YANDEX",
    "0",
    "1",
    "2",
    "3",
    "4",
    "5",
    "6",
    "7",
    "8",
    "9",
];

/// Check a button name against [`BUTTONS`]
pub fn is_known(name: &str) -> bool {
    BUTTONS.contains(&name)
}
