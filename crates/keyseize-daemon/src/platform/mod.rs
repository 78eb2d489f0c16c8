//! Linux platform layer: udev hot-plug discovery and evdev device handles

pub mod evdev_device;
pub mod hotplug;
pub mod keymap;

use evdev::{Device, Key};
use keyseize_config::DeviceClass;

pub use evdev_device::EvdevDevice;
pub use hotplug::{watch_devices, HotplugOptions};

/// Whether an opened device belongs to `class`, judged by the keys it
/// advertises.
pub fn matches_class(device: &Device, class: DeviceClass) -> bool {
    let Some(keys) = device.supported_keys() else {
        return false;
    };
    match class {
        DeviceClass::Keyboard => keys.contains(Key::KEY_A),
        DeviceClass::Keypad => keys.contains(Key::KEY_KP0),
        DeviceClass::ConsumerControl => keys.contains(Key::KEY_VOLUMEUP),
    }
}
