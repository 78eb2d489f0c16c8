//! Raw value classification
//!
//! Maps a raw (usage page, usage, value) change to a logical key event. Only
//! two sources produce keys:
//!
//! - the keyboard page, for usages strictly between "ErrorUndefined" and the
//!   reserved upper bound, one-to-one onto [`KeyCode`]
//! - the vendor top-case page's fn usage, onto [`KeyCode::FN_MODIFIER`]
//!
//! Everything else is ignored.

use crate::clients::KeyEvent;
use crate::device::HidValue;
use crate::key_code::{hid, KeyCode};

/// Classify a raw value. Returns `None` for values that carry no key.
pub fn classify(value: &HidValue) -> Option<KeyEvent> {
    let pressed = value.integer_value != 0;

    let key_code = match value.usage_page {
        hid::PAGE_KEYBOARD_OR_KEYPAD => {
            if hid::USAGE_KEYBOARD_ERROR_UNDEFINED < value.usage
                && value.usage < hid::USAGE_KEYBOARD_RESERVED
            {
                KeyCode::from_keyboard_usage(value.usage)
            } else {
                return None;
            }
        }
        hid::PAGE_APPLE_VENDOR_TOP_CASE if value.usage == hid::USAGE_TOP_CASE_KEYBOARD_FN => {
            KeyCode::FN_MODIFIER
        }
        _ => return None,
    };

    Some(KeyEvent {
        device: value.device,
        key_code,
        pressed,
    })
}
