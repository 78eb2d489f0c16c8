//! Collaborators the grabber drives but does not implement
//!
//! - [`EventManipulator`]: the remapping engine receiving classified key events
//! - [`HidSystemClient`]: the host caps-lock oracle
//! - [`ConsoleUserClient`]: the user-session notifier (acks, key repeat)

use crate::device::LedCallback;
use crate::key_code::{KeyCode, RegistryEntryId};
use crate::modifier::ModifierFlagManager;

/// A classified key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub device: RegistryEntryId,
    pub key_code: KeyCode,
    pub pressed: bool,
}

/// The remapping engine.
pub trait EventManipulator: Send + 'static {
    /// Whether the engine can accept events (rules loaded, output ready).
    fn is_ready(&self) -> bool;

    /// Handle one key event. The grabber lends its modifier tracker for the
    /// duration of the call.
    fn handle_keyboard_event(&mut self, event: KeyEvent, modifiers: &mut ModifierFlagManager);

    /// Receive the push used to update the caps-lock LED of every captured
    /// device. Called once, when the grabber is created.
    fn attach_caps_lock_led(&mut self, _led: LedCallback) {}
}

/// Host caps-lock state.
pub trait HidSystemClient: Send + 'static {
    /// Current host caps-lock state, `None` when unknown.
    fn caps_lock_state(&self) -> Option<bool>;
    fn set_caps_lock_state(&mut self, state: bool);
}

/// User-session notifier.
pub trait ConsoleUserClient: Send + 'static {
    fn connect_ack(&mut self);
    fn stop_key_repeat(&mut self);
}

/// The three collaborators, boxed so the grabber is generic over the device
/// type only.
pub struct Clients {
    pub engine: Box<dyn EventManipulator>,
    pub hid_system: Box<dyn HidSystemClient>,
    pub console_user: Box<dyn ConsoleUserClient>,
}
