//! Device handle capability contract
//!
//! The core never talks to a platform input API directly. Everything it needs
//! from a physical device is expressed by [`HidDevice`]; the Linux evdev
//! implementation lives in [`crate::platform::evdev_device`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::key_code::RegistryEntryId;

/// Identifying attributes of a device; every field but the identity is
/// optional because platforms report them inconsistently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub registry_entry_id: u64,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vendor_id: Option<u32>,
    pub product_id: Option<u32>,
    pub location_id: Option<u32>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    pub fn new(id: RegistryEntryId) -> Self {
        Self {
            registry_entry_id: id.0,
            ..Self::default()
        }
    }
}

/// Diagnostic rendering; absent attributes print as neutral placeholders.
impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "manufacturer:{}, product:{}, vendor_id:{:#x}, product_id:{:#x}, \
             location_id:{:#x}, serial_number:{} registry_entry_id:{}",
            self.manufacturer.as_deref().unwrap_or(""),
            self.product.as_deref().unwrap_or(""),
            self.vendor_id.unwrap_or(0),
            self.product_id.unwrap_or(0),
            self.location_id.unwrap_or(0),
            self.serial_number.as_deref().unwrap_or(""),
            self.registry_entry_id,
        )
    }
}

/// Keyboard LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedState {
    On,
    Off,
}

impl From<bool> for LedState {
    fn from(on: bool) -> Self {
        if on {
            LedState::On
        } else {
            LedState::Off
        }
    }
}

/// Mode of a tracked device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    Unobserved,
    Observing,
    Grabbed,
}

/// One raw value change delivered by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidValue {
    pub device: RegistryEntryId,
    pub usage_page: u32,
    pub usage: u32,
    pub integer_value: i64,
}

/// Callback a device invokes for every raw value change.
///
/// The grabber binds it to its own command channel, so calling it from any
/// thread enqueues the value on the serialization context.
#[derive(Clone)]
pub struct ValueCallback(Arc<dyn Fn(HidValue) + Send + Sync>);

impl ValueCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(HidValue) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Callback that discards every value (passive observation).
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    pub fn call(&self, value: HidValue) {
        (self.0)(value)
    }
}

impl fmt::Debug for ValueCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueCallback")
    }
}

/// Caps-lock indicator push handed to the remapping engine.
///
/// Bound to the grabber's command channel like [`ValueCallback`]; the state
/// reaches every device once the current command has been applied.
#[derive(Clone)]
pub struct LedCallback(Arc<dyn Fn(LedState) + Send + Sync>);

impl LedCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(LedState) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, state: LedState) {
        (self.0)(state)
    }
}

impl fmt::Debug for LedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LedCallback")
    }
}

/// Capability set of a single HID device handle.
pub trait HidDevice: Send + 'static {
    fn registry_entry_id(&self) -> RegistryEntryId;
    fn manufacturer(&self) -> Option<String>;
    fn product(&self) -> Option<String>;
    fn vendor_id(&self) -> Option<u32>;
    fn product_id(&self) -> Option<u32>;
    fn location_id(&self) -> Option<u32>;
    fn serial_number(&self) -> Option<String>;

    /// Number of keys currently held down on this device.
    fn pressed_keys_count(&self) -> usize;

    /// Start passive monitoring; values are still tracked for key state.
    fn observe(&mut self, callback: ValueCallback);
    fn unobserve(&mut self);

    /// Seize the device exclusively; raw values go to `callback` only.
    fn grab(&mut self, callback: ValueCallback) -> Result<(), DeviceError>;
    fn ungrab(&mut self);

    fn set_caps_lock_led_state(&mut self, state: LedState);
    fn clear_changed_keys(&mut self);
    fn clear_pressed_keys(&mut self);

    /// Snapshot of every identifying attribute.
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            registry_entry_id: self.registry_entry_id().0,
            manufacturer: self.manufacturer(),
            product: self.product(),
            vendor_id: self.vendor_id(),
            product_id: self.product_id(),
            location_id: self.location_id(),
            serial_number: self.serial_number(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_substitutes_placeholders() {
        let info = DeviceInfo::new(RegistryEntryId(42));
        let text = info.to_string();
        assert!(text.contains("manufacturer:,"));
        assert!(text.contains("vendor_id:0x0"));
        assert!(text.contains("registry_entry_id:42"));
    }

    #[test]
    fn test_display_with_attributes() {
        let info = DeviceInfo {
            manufacturer: Some("Keychron".to_string()),
            vendor_id: Some(0x3434),
            ..DeviceInfo::new(RegistryEntryId(7))
        };
        let text = info.to_string();
        assert!(text.contains("manufacturer:Keychron"));
        assert!(text.contains("vendor_id:0x3434"));
    }

    #[test]
    fn test_led_state_from_bool() {
        assert_eq!(LedState::from(true), LedState::On);
        assert_eq!(LedState::from(false), LedState::Off);
    }

    #[test]
    fn test_value_callback_invokes_closure() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = ValueCallback::new(move |value| sink.lock().push(value.usage));

        callback.call(HidValue {
            device: RegistryEntryId(1),
            usage_page: 0x07,
            usage: 0x04,
            integer_value: 1,
        });
        ValueCallback::ignore().call(HidValue {
            device: RegistryEntryId(1),
            usage_page: 0x07,
            usage: 0x05,
            integer_value: 1,
        });

        assert_eq!(*seen.lock(), vec![0x04]);
    }
}
