//! evdev-backed device handle
//!
//! The opened [`Device`] is shared between the handle and a reader task. The
//! reader waits for the fd to become readable, drains it with
//! `fetch_events`, keeps the pressed and changed key sets up to date and
//! hands every key change, translated to a HID (page, usage) pair, to
//! whichever callback is currently installed.
//!
//! Grabs and LED writes go through the same `Device`, so `EVIOCGRAB` applies
//! to the client the reader drains and events keep flowing to it alone.

use std::collections::HashSet;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use evdev::{Device, EventType, InputEvent, InputEventKind, Key, LedType};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use parking_lot::{Mutex, MutexGuard};
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;

use crate::device::{HidDevice, HidValue, LedState, ValueCallback};
use crate::error::DeviceError;
use crate::key_code::RegistryEntryId;
use crate::platform::keymap;

/// Kernel autorepeat value; HID reports never repeat, so it is dropped.
const KEY_REPEAT: i32 = 2;

#[derive(Default)]
struct KeyState {
    pressed: HashSet<u16>,
    changed: HashSet<u16>,
    callback: Option<ValueCallback>,
}

/// Identifying attributes read before the device is opened for streaming.
#[derive(Debug, Clone, Default)]
pub struct EvdevAttributes {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vendor_id: Option<u32>,
    pub product_id: Option<u32>,
    pub serial_number: Option<String>,
}

impl EvdevAttributes {
    /// Attributes the kernel reports for `device`; the manufacturer comes
    /// from udev and is filled in by the caller.
    pub fn from_device(device: &Device) -> Self {
        let input_id = device.input_id();
        Self {
            manufacturer: None,
            product: device.name().map(str::to_string),
            vendor_id: Some(u32::from(input_id.vendor())),
            product_id: Some(u32::from(input_id.product())),
            serial_number: device
                .unique_name()
                .filter(|uniq| !uniq.is_empty())
                .map(str::to_string),
        }
    }
}

/// An opened device shared by the handle and its reader task.
///
/// The fd is captured once at construction; it stays valid for as long as
/// any clone holds the `Arc`.
#[derive(Clone)]
struct SharedDevice {
    device: Arc<Mutex<Device>>,
    fd: RawFd,
}

impl SharedDevice {
    fn new(device: Device) -> Self {
        let fd = device.as_raw_fd();
        Self {
            device: Arc::new(Mutex::new(device)),
            fd,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Device> {
        self.device.lock()
    }
}

impl AsRawFd for SharedDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

pub struct EvdevDevice {
    id: RegistryEntryId,
    path: PathBuf,
    attributes: EvdevAttributes,
    device: SharedDevice,
    state: Arc<Mutex<KeyState>>,
    reader: JoinHandle<()>,
}

impl EvdevDevice {
    /// Take ownership of an opened device and start its reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        device: Device,
        path: &Path,
        id: RegistryEntryId,
        attributes: EvdevAttributes,
    ) -> Result<Self, DeviceError> {
        let open_failed = |source| DeviceError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let device = SharedDevice::new(device);
        set_nonblocking(device.as_raw_fd()).map_err(open_failed)?;
        let readable = AsyncFd::new(device.clone()).map_err(open_failed)?;

        let state = Arc::new(Mutex::new(KeyState::default()));
        let reader = tokio::spawn(read_events(readable, id, state.clone()));

        tracing::debug!(registry_entry_id = id.0, "Opened {}", path.display());

        Ok(Self {
            id,
            path: path.to_path_buf(),
            attributes,
            device,
            state,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_events(
    readable: AsyncFd<SharedDevice>,
    id: RegistryEntryId,
    state: Arc<Mutex<KeyState>>,
) {
    loop {
        let mut guard = match readable.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::debug!(registry_entry_id = id.0, "Device poll failed: {}", e);
                break;
            }
        };

        let fetched: io::Result<Vec<InputEvent>> = guard
            .get_inner()
            .lock()
            .fetch_events()
            .map(|events| events.collect());

        match fetched {
            Ok(events) => {
                for event in events {
                    if let InputEventKind::Key(key) = event.kind() {
                        on_key(id, &state, key, event.value());
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => guard.clear_ready(),
            Err(e) => {
                tracing::debug!(registry_entry_id = id.0, "Event stream ended: {}", e);
                break;
            }
        }
    }
}

fn on_key(id: RegistryEntryId, state: &Mutex<KeyState>, key: Key, value: i32) {
    if value == KEY_REPEAT {
        return;
    }

    let callback = {
        let mut state = state.lock();
        if value != 0 {
            state.pressed.insert(key.code());
        } else {
            state.pressed.remove(&key.code());
        }
        state.changed.insert(key.code());
        state.callback.clone()
    };

    let (Some(callback), Some((usage_page, usage))) = (callback, keymap::hid_usage_for_key(key))
    else {
        return;
    };
    callback.call(HidValue {
        device: id,
        usage_page,
        usage,
        integer_value: i64::from(value),
    });
}

impl HidDevice for EvdevDevice {
    fn registry_entry_id(&self) -> RegistryEntryId {
        self.id
    }

    fn manufacturer(&self) -> Option<String> {
        self.attributes.manufacturer.clone()
    }

    fn product(&self) -> Option<String> {
        self.attributes.product.clone()
    }

    fn vendor_id(&self) -> Option<u32> {
        self.attributes.vendor_id
    }

    fn product_id(&self) -> Option<u32> {
        self.attributes.product_id
    }

    fn location_id(&self) -> Option<u32> {
        None
    }

    fn serial_number(&self) -> Option<String> {
        self.attributes.serial_number.clone()
    }

    fn pressed_keys_count(&self) -> usize {
        self.state.lock().pressed.len()
    }

    fn observe(&mut self, callback: ValueCallback) {
        self.state.lock().callback = Some(callback);
    }

    fn unobserve(&mut self) {
        self.state.lock().callback = None;
    }

    fn grab(&mut self, callback: ValueCallback) -> Result<(), DeviceError> {
        self.device
            .lock()
            .grab()
            .map_err(|source| DeviceError::SeizeFailed {
                id: self.id.0,
                source,
            })?;
        self.state.lock().callback = Some(callback);
        tracing::debug!(registry_entry_id = self.id.0, "Grabbed {}", self.path.display());
        Ok(())
    }

    fn ungrab(&mut self) {
        self.state.lock().callback = None;
        if let Err(e) = self.device.lock().ungrab() {
            tracing::debug!(registry_entry_id = self.id.0, "Failed to release grab: {}", e);
        }
    }

    fn set_caps_lock_led_state(&mut self, state: LedState) {
        let events = caps_lock_led_events(state);
        if let Err(e) = self.device.lock().send_events(&events) {
            tracing::debug!(registry_entry_id = self.id.0, "Failed to set caps lock LED: {}", e);
        }
    }

    fn clear_changed_keys(&mut self) {
        self.state.lock().changed.clear();
    }

    fn clear_pressed_keys(&mut self) {
        self.state.lock().pressed.clear();
    }
}

/// LED write for the caps-lock indicator, followed by a sync report.
fn caps_lock_led_events(state: LedState) -> [InputEvent; 2] {
    [
        InputEvent::new(
            EventType::LED,
            LedType::LED_CAPSL.0,
            i32::from(state == LedState::On),
        ),
        InputEvent::new(EventType::SYNCHRONIZATION, 0, 0),
    ]
}

impl Drop for EvdevDevice {
    fn drop(&mut self) {
        // The aborted reader may keep the device open a little longer, so the
        // grab is released here rather than when the fd closes.
        if let Err(e) = self.device.lock().ungrab() {
            tracing::debug!(registry_entry_id = self.id.0, "Failed to release grab: {}", e);
        }
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_state() -> (Arc<Mutex<KeyState>>, Arc<Mutex<Vec<HidValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let state = Arc::new(Mutex::new(KeyState {
            callback: Some(ValueCallback::new(move |value| sink.lock().push(value))),
            ..KeyState::default()
        }));
        (state, seen)
    }

    #[test]
    fn test_press_and_release_track_pressed_set() {
        let (state, _) = recording_state();
        on_key(RegistryEntryId(3), &state, Key::KEY_A, 1);
        on_key(RegistryEntryId(3), &state, Key::KEY_B, 1);
        assert_eq!(state.lock().pressed.len(), 2);

        on_key(RegistryEntryId(3), &state, Key::KEY_A, 0);
        assert_eq!(state.lock().pressed.len(), 1);
        assert_eq!(state.lock().changed.len(), 2);
    }

    #[test]
    fn test_key_values_are_translated() {
        let (state, seen) = recording_state();
        on_key(RegistryEntryId(3), &state, Key::KEY_A, 1);

        assert_eq!(
            *seen.lock(),
            vec![HidValue {
                device: RegistryEntryId(3),
                usage_page: 0x07,
                usage: 0x04,
                integer_value: 1,
            }]
        );
    }

    #[test]
    fn test_autorepeat_is_dropped() {
        let (state, seen) = recording_state();
        on_key(RegistryEntryId(3), &state, Key::KEY_A, KEY_REPEAT);
        assert!(seen.lock().is_empty());
        assert!(state.lock().changed.is_empty());
    }

    #[test]
    fn test_unmapped_key_still_counts_as_pressed() {
        let (state, seen) = recording_state();
        on_key(RegistryEntryId(3), &state, Key::BTN_LEFT, 1);
        assert!(seen.lock().is_empty());
        assert_eq!(state.lock().pressed.len(), 1);
    }

    #[test]
    fn test_caps_lock_led_events() {
        let [led, syn] = caps_lock_led_events(LedState::On);
        assert_eq!(led.event_type(), EventType::LED);
        assert_eq!(led.code(), LedType::LED_CAPSL.0);
        assert_eq!(led.value(), 1);
        assert_eq!(syn.event_type(), EventType::SYNCHRONIZATION);

        let [led, _] = caps_lock_led_events(LedState::Off);
        assert_eq!(led.value(), 0);
    }

    #[test]
    fn test_without_callback_state_is_still_tracked() {
        let state = Mutex::new(KeyState::default());
        on_key(RegistryEntryId(3), &state, Key::KEY_LEFTSHIFT, 1);
        assert_eq!(state.lock().pressed.len(), 1);
    }
}
