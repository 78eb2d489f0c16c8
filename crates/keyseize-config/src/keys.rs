//! Logical key code names
//!
//! Logical key codes are HID keyboard-page usages (`0x04..0xFFFF`) plus a
//! small synthetic range starting at `0x1_0000` for keys that live on other
//! usage pages (currently only the `fn` modifier).

/// Logical key code of the synthetic `fn` modifier.
pub const FN_MODIFIER_CODE: u32 = 0x1_0000;

/// Canonical names, in usage order.
const KEY_NAMES: &[(&str, u32)] = &[
    ("a", 0x04),
    ("b", 0x05),
    ("c", 0x06),
    ("d", 0x07),
    ("e", 0x08),
    ("f", 0x09),
    ("g", 0x0A),
    ("h", 0x0B),
    ("i", 0x0C),
    ("j", 0x0D),
    ("k", 0x0E),
    ("l", 0x0F),
    ("m", 0x10),
    ("n", 0x11),
    ("o", 0x12),
    ("p", 0x13),
    ("q", 0x14),
    ("r", 0x15),
    ("s", 0x16),
    ("t", 0x17),
    ("u", 0x18),
    ("v", 0x19),
    ("w", 0x1A),
    ("x", 0x1B),
    ("y", 0x1C),
    ("z", 0x1D),
    ("1", 0x1E),
    ("2", 0x1F),
    ("3", 0x20),
    ("4", 0x21),
    ("5", 0x22),
    ("6", 0x23),
    ("7", 0x24),
    ("8", 0x25),
    ("9", 0x26),
    ("0", 0x27),
    ("return_or_enter", 0x28),
    ("escape", 0x29),
    ("delete_or_backspace", 0x2A),
    ("tab", 0x2B),
    ("spacebar", 0x2C),
    ("hyphen", 0x2D),
    ("equal_sign", 0x2E),
    ("open_bracket", 0x2F),
    ("close_bracket", 0x30),
    ("backslash", 0x31),
    ("non_us_pound", 0x32),
    ("semicolon", 0x33),
    ("quote", 0x34),
    ("grave_accent_and_tilde", 0x35),
    ("comma", 0x36),
    ("period", 0x37),
    ("slash", 0x38),
    ("caps_lock", 0x39),
    ("f1", 0x3A),
    ("f2", 0x3B),
    ("f3", 0x3C),
    ("f4", 0x3D),
    ("f5", 0x3E),
    ("f6", 0x3F),
    ("f7", 0x40),
    ("f8", 0x41),
    ("f9", 0x42),
    ("f10", 0x43),
    ("f11", 0x44),
    ("f12", 0x45),
    ("print_screen", 0x46),
    ("scroll_lock", 0x47),
    ("pause", 0x48),
    ("insert", 0x49),
    ("home", 0x4A),
    ("page_up", 0x4B),
    ("delete_forward", 0x4C),
    ("end", 0x4D),
    ("page_down", 0x4E),
    ("right_arrow", 0x4F),
    ("left_arrow", 0x50),
    ("down_arrow", 0x51),
    ("up_arrow", 0x52),
    ("keypad_num_lock", 0x53),
    ("keypad_slash", 0x54),
    ("keypad_asterisk", 0x55),
    ("keypad_hyphen", 0x56),
    ("keypad_plus", 0x57),
    ("keypad_enter", 0x58),
    ("keypad_1", 0x59),
    ("keypad_2", 0x5A),
    ("keypad_3", 0x5B),
    ("keypad_4", 0x5C),
    ("keypad_5", 0x5D),
    ("keypad_6", 0x5E),
    ("keypad_7", 0x5F),
    ("keypad_8", 0x60),
    ("keypad_9", 0x61),
    ("keypad_0", 0x62),
    ("keypad_period", 0x63),
    ("non_us_backslash", 0x64),
    ("application", 0x65),
    ("power", 0x66),
    ("keypad_equal_sign", 0x67),
    ("f13", 0x68),
    ("f14", 0x69),
    ("f15", 0x6A),
    ("f16", 0x6B),
    ("f17", 0x6C),
    ("f18", 0x6D),
    ("f19", 0x6E),
    ("f20", 0x6F),
    ("f21", 0x70),
    ("f22", 0x71),
    ("f23", 0x72),
    ("f24", 0x73),
    ("help", 0x75),
    ("mute", 0x7F),
    ("volume_increment", 0x80),
    ("volume_decrement", 0x81),
    ("keypad_comma", 0x85),
    ("international1", 0x87),
    ("international3", 0x89),
    ("lang1", 0x90),
    ("lang2", 0x91),
    ("left_control", 0xE0),
    ("left_shift", 0xE1),
    ("left_option", 0xE2),
    ("left_command", 0xE3),
    ("right_control", 0xE4),
    ("right_shift", 0xE5),
    ("right_option", 0xE6),
    ("right_command", 0xE7),
    ("fn", FN_MODIFIER_CODE),
];

/// Alternative spellings accepted in configuration files.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("enter", "return_or_enter"),
    ("return", "return_or_enter"),
    ("esc", "escape"),
    ("backspace", "delete_or_backspace"),
    ("space", "spacebar"),
    ("minus", "hyphen"),
    ("equal", "equal_sign"),
    ("grave", "grave_accent_and_tilde"),
    ("capslock", "caps_lock"),
    ("delete", "delete_forward"),
    ("up", "up_arrow"),
    ("down", "down_arrow"),
    ("left", "left_arrow"),
    ("right", "right_arrow"),
    ("ctrl", "left_control"),
    ("shift", "left_shift"),
    ("alt", "left_option"),
    ("left_alt", "left_option"),
    ("right_alt", "right_option"),
    ("super", "left_command"),
    ("meta", "left_command"),
    ("left_gui", "left_command"),
    ("right_gui", "right_command"),
];

/// Look up the logical key code for a key name (case-insensitive).
///
/// Accepts canonical names, the aliases above, and raw hexadecimal codes
/// written as `0x..`.
pub fn key_code_for_name(name: &str) -> Option<u32> {
    let lower = name.trim().to_ascii_lowercase();

    if let Some(hex) = lower.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).ok();
    }

    let canonical = KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, target)| *target)
        .unwrap_or(lower.as_str());

    KEY_NAMES
        .iter()
        .find(|(key_name, _)| *key_name == canonical)
        .map(|(_, code)| *code)
}

/// Canonical name of a logical key code, if it has one.
pub fn name_for_key_code(code: u32) -> Option<&'static str> {
    KEY_NAMES
        .iter()
        .find(|(_, key_code)| *key_code == code)
        .map(|(name, _)| *name)
}

/// Check if a key name is valid
pub fn is_valid_key(name: &str) -> bool {
    key_code_for_name(name).is_some()
}
