//! In-memory device handle and collaborators used by unit tests

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clients::{
    Clients, ConsoleUserClient, EventManipulator, HidSystemClient, KeyEvent,
};
use crate::device::{HidDevice, HidValue, LedState, ValueCallback};
use crate::error::DeviceError;
use crate::key_code::RegistryEntryId;
use crate::modifier::ModifierFlagManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeDeviceCall {
    Observe,
    Unobserve,
    Grab,
    Ungrab,
    SetLed(LedState),
    ClearChangedKeys,
    ClearPressedKeys,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<FakeDeviceCall>,
    callback: Option<ValueCallback>,
    pressed_keys: usize,
    fail_grab: bool,
    dropped: bool,
}

/// Shared view of a [`FakeDevice`] that outlives the handle.
#[derive(Clone, Default)]
pub struct FakeDeviceLog(Arc<Mutex<FakeState>>);

impl FakeDeviceLog {
    pub fn calls(&self) -> Vec<FakeDeviceCall> {
        self.0.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    pub fn fail_grab(&self, fail: bool) {
        self.0.lock().fail_grab = fail;
    }

    pub fn set_pressed_keys(&self, count: usize) {
        self.0.lock().pressed_keys = count;
    }

    pub fn is_dropped(&self) -> bool {
        self.0.lock().dropped
    }

    /// Deliver a raw value through whatever callback is installed.
    pub fn emit(&self, usage_page: u32, usage: u32, integer_value: i64, id: u64) {
        let callback = self.0.lock().callback.clone();
        if let Some(callback) = callback {
            callback.call(HidValue {
                device: RegistryEntryId(id),
                usage_page,
                usage,
                integer_value,
            });
        }
    }
}

pub struct FakeDevice {
    id: RegistryEntryId,
    manufacturer: Option<String>,
    log: FakeDeviceLog,
}

impl FakeDevice {
    pub fn new(id: u64) -> (Self, FakeDeviceLog) {
        let log = FakeDeviceLog::default();
        let device = Self {
            id: RegistryEntryId(id),
            manufacturer: Some("Acme".to_string()),
            log: log.clone(),
        };
        (device, log)
    }

    pub fn with_manufacturer(id: u64, manufacturer: &str) -> (Self, FakeDeviceLog) {
        let (mut device, log) = Self::new(id);
        device.manufacturer = Some(manufacturer.to_string());
        (device, log)
    }

    fn record(&self, call: FakeDeviceCall) {
        self.log.0.lock().calls.push(call);
    }
}

impl HidDevice for FakeDevice {
    fn registry_entry_id(&self) -> RegistryEntryId {
        self.id
    }

    fn manufacturer(&self) -> Option<String> {
        self.manufacturer.clone()
    }

    fn product(&self) -> Option<String> {
        Some("Fake Keyboard".to_string())
    }

    fn vendor_id(&self) -> Option<u32> {
        Some(0x1234)
    }

    fn product_id(&self) -> Option<u32> {
        Some(0x5678)
    }

    fn location_id(&self) -> Option<u32> {
        None
    }

    fn serial_number(&self) -> Option<String> {
        None
    }

    fn pressed_keys_count(&self) -> usize {
        self.log.0.lock().pressed_keys
    }

    fn observe(&mut self, callback: ValueCallback) {
        self.record(FakeDeviceCall::Observe);
        self.log.0.lock().callback = Some(callback);
    }

    fn unobserve(&mut self) {
        self.record(FakeDeviceCall::Unobserve);
        self.log.0.lock().callback = None;
    }

    fn grab(&mut self, callback: ValueCallback) -> Result<(), DeviceError> {
        self.record(FakeDeviceCall::Grab);
        let mut state = self.log.0.lock();
        if state.fail_grab {
            return Err(DeviceError::SeizeFailed {
                id: self.id.0,
                source: std::io::Error::new(std::io::ErrorKind::Other, "device busy"),
            });
        }
        state.callback = Some(callback);
        Ok(())
    }

    fn ungrab(&mut self) {
        self.record(FakeDeviceCall::Ungrab);
        self.log.0.lock().callback = None;
    }

    fn set_caps_lock_led_state(&mut self, state: LedState) {
        self.record(FakeDeviceCall::SetLed(state));
    }

    fn clear_changed_keys(&mut self) {
        self.record(FakeDeviceCall::ClearChangedKeys);
    }

    fn clear_pressed_keys(&mut self) {
        self.record(FakeDeviceCall::ClearPressedKeys);
        self.log.0.lock().pressed_keys = 0;
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.log.0.lock().dropped = true;
    }
}

#[derive(Default)]
struct ClientState {
    ready: bool,
    events: Vec<KeyEvent>,
    caps_lock: Option<bool>,
    caps_lock_writes: Vec<bool>,
    connect_acks: usize,
    key_repeat_stops: usize,
}

/// Shared view of the fake collaborators built by [`fake_clients`].
#[derive(Clone, Default)]
pub struct ClientLog(Arc<Mutex<ClientState>>);

impl ClientLog {
    fn state(&self) -> parking_lot::MutexGuard<'_, ClientState> {
        self.0.lock()
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.lock().ready = ready;
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        self.0.lock().events.clone()
    }

    pub fn set_caps_lock(&self, state: Option<bool>) {
        self.0.lock().caps_lock = state;
    }

    pub fn caps_lock(&self) -> Option<bool> {
        self.0.lock().caps_lock
    }

    pub fn caps_lock_writes(&self) -> Vec<bool> {
        self.0.lock().caps_lock_writes.clone()
    }

    pub fn connect_acks(&self) -> usize {
        self.0.lock().connect_acks
    }

    pub fn key_repeat_stops(&self) -> usize {
        self.0.lock().key_repeat_stops
    }
}

struct FakeEngine(ClientLog);

impl EventManipulator for FakeEngine {
    fn is_ready(&self) -> bool {
        self.0.state().ready
    }

    fn handle_keyboard_event(&mut self, event: KeyEvent, modifiers: &mut ModifierFlagManager) {
        modifiers.apply_key(event.key_code, event.pressed);
        self.0.state().events.push(event);
    }
}

struct FakeHidSystem(ClientLog);

impl HidSystemClient for FakeHidSystem {
    fn caps_lock_state(&self) -> Option<bool> {
        self.0.state().caps_lock
    }

    fn set_caps_lock_state(&mut self, state: bool) {
        let mut inner = self.0.state();
        inner.caps_lock = Some(state);
        inner.caps_lock_writes.push(state);
    }
}

struct FakeConsoleUser(ClientLog);

impl ConsoleUserClient for FakeConsoleUser {
    fn connect_ack(&mut self) {
        self.0.state().connect_acks += 1;
    }

    fn stop_key_repeat(&mut self) {
        self.0.state().key_repeat_stops += 1;
    }
}

/// Collaborators backed by one [`ClientLog`]; the engine starts ready.
pub fn fake_clients() -> (Clients, ClientLog) {
    let log = ClientLog::default();
    log.set_ready(true);
    let clients = Clients {
        engine: Box::new(FakeEngine(log.clone())),
        hid_system: Box::new(FakeHidSystem(log.clone())),
        console_user: Box::new(FakeConsoleUser(log.clone())),
    };
    (clients, log)
}
