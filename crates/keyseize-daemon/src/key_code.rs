//! Logical key codes and the HID usage constants the classifier relies on

use std::fmt;
use std::str::FromStr;

use keyseize_config::keys::{key_code_for_name, name_for_key_code, FN_MODIFIER_CODE};

/// HID usage pages and usages seen by the device-capture core.
pub mod hid {
    pub const PAGE_GENERIC_DESKTOP: u32 = 0x01;
    pub const PAGE_KEYBOARD_OR_KEYPAD: u32 = 0x07;
    pub const PAGE_CONSUMER: u32 = 0x0C;
    /// Apple vendor "top case" page carrying the fn key
    pub const PAGE_APPLE_VENDOR_TOP_CASE: u32 = 0xFF;

    /// Keyboard page: "ErrorUndefined", the last reserved no-event usage
    pub const USAGE_KEYBOARD_ERROR_UNDEFINED: u32 = 0x03;
    /// Keyboard page: reserved upper bound
    pub const USAGE_KEYBOARD_RESERVED: u32 = 0xFFFF;
    /// Top-case page: the fn key
    pub const USAGE_TOP_CASE_KEYBOARD_FN: u32 = 0x03;
}

/// Identity of a device as reported by the platform; used as the device
/// reference on every key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryEntryId(pub u64);

impl fmt::Display for RegistryEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical key code: keyboard-page usages plus the synthetic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u32);

impl KeyCode {
    pub const A: KeyCode = KeyCode(0x04);
    pub const ESCAPE: KeyCode = KeyCode(0x29);
    pub const CAPS_LOCK: KeyCode = KeyCode(0x39);
    pub const LEFT_CONTROL: KeyCode = KeyCode(0xE0);
    pub const LEFT_SHIFT: KeyCode = KeyCode(0xE1);
    pub const LEFT_OPTION: KeyCode = KeyCode(0xE2);
    pub const LEFT_COMMAND: KeyCode = KeyCode(0xE3);
    pub const RIGHT_CONTROL: KeyCode = KeyCode(0xE4);
    pub const RIGHT_SHIFT: KeyCode = KeyCode(0xE5);
    pub const RIGHT_OPTION: KeyCode = KeyCode(0xE6);
    pub const RIGHT_COMMAND: KeyCode = KeyCode(0xE7);
    /// Synthetic code for the top-case fn key
    pub const FN_MODIFIER: KeyCode = KeyCode(FN_MODIFIER_CODE);

    /// Key code for a keyboard-page usage, one-to-one.
    pub fn from_keyboard_usage(usage: u32) -> Self {
        KeyCode(usage)
    }

    /// The keyboard-page usage behind this code, if it has one.
    pub fn keyboard_usage(&self) -> Option<u32> {
        (self.0 > hid::USAGE_KEYBOARD_ERROR_UNDEFINED && self.0 < hid::USAGE_KEYBOARD_RESERVED)
            .then_some(self.0)
    }

    pub fn name(&self) -> Option<&'static str> {
        name_for_key_code(self.0)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

impl FromStr for KeyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_code_for_name(s)
            .map(KeyCode)
            .ok_or_else(|| format!("Unknown key: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_names() {
        assert_eq!("a".parse::<KeyCode>().unwrap(), KeyCode::A);
        assert_eq!("CapsLock".parse::<KeyCode>().unwrap(), KeyCode::CAPS_LOCK);
        assert_eq!("fn".parse::<KeyCode>().unwrap(), KeyCode::FN_MODIFIER);
        assert!("nope".parse::<KeyCode>().is_err());
    }

    #[test]
    fn test_display_uses_name_or_hex() {
        assert_eq!(KeyCode::ESCAPE.to_string(), "escape");
        assert_eq!(KeyCode(0xABCD).to_string(), "0xabcd");
    }

    #[test]
    fn test_keyboard_usage_excludes_synthetic_codes() {
        assert_eq!(KeyCode::A.keyboard_usage(), Some(0x04));
        assert_eq!(KeyCode::FN_MODIFIER.keyboard_usage(), None);
        assert_eq!(KeyCode(0x03).keyboard_usage(), None);
    }
}
