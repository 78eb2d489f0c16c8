//! Simple remapping engine and its session-side collaborators
//!
//! [`SimpleRemapEngine`] applies the 1:1 simple modification table to every
//! key the grabber forwards and emits the result on a [`KeyOutput`]. The
//! replacement chosen at press time is remembered until the matching
//! release, so editing the table while a key is held never leaves the output
//! key stuck.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clients::{ConsoleUserClient, EventManipulator, HidSystemClient, KeyEvent};
use crate::device::{LedCallback, LedState};
use crate::injector::KeyOutput;
use crate::key_code::{KeyCode, RegistryEntryId};
use crate::modifier::ModifierFlagManager;
use crate::simple_modifications::SimpleModifications;

/// Host caps-lock state, shared between the engine (which toggles it) and
/// the grabber (which reads and clears it).
#[derive(Debug, Clone, Default)]
pub struct HostCapsLock(Arc<Mutex<Option<bool>>>);

impl HostCapsLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<bool> {
        *self.0.lock()
    }

    /// Flip the state; unknown counts as off.
    pub fn toggle(&self) -> bool {
        let mut state = self.0.lock();
        let next = !state.unwrap_or(false);
        *state = Some(next);
        next
    }
}

impl HidSystemClient for HostCapsLock {
    fn caps_lock_state(&self) -> Option<bool> {
        self.get()
    }

    fn set_caps_lock_state(&mut self, state: bool) {
        *self.0.lock() = Some(state);
    }
}

pub struct SimpleRemapEngine<O> {
    simple_modifications: SimpleModifications,
    caps_lock: HostCapsLock,
    output: O,
    active: HashMap<(RegistryEntryId, KeyCode), KeyCode>,
    caps_lock_led: Option<LedCallback>,
}

impl<O: KeyOutput> SimpleRemapEngine<O> {
    pub fn new(simple_modifications: SimpleModifications, caps_lock: HostCapsLock, output: O) -> Self {
        Self {
            simple_modifications,
            caps_lock,
            output,
            active: HashMap::new(),
            caps_lock_led: None,
        }
    }

    fn target_for(&mut self, event: &KeyEvent) -> KeyCode {
        let source = (event.device, event.key_code);
        if event.pressed {
            let target = self.simple_modifications.apply(event.key_code);
            self.active.insert(source, target);
            target
        } else {
            self.active
                .remove(&source)
                .unwrap_or_else(|| self.simple_modifications.apply(event.key_code))
        }
    }
}

impl<O: KeyOutput> EventManipulator for SimpleRemapEngine<O> {
    fn is_ready(&self) -> bool {
        true
    }

    fn handle_keyboard_event(&mut self, event: KeyEvent, modifiers: &mut ModifierFlagManager) {
        let target = self.target_for(&event);
        if target != event.key_code {
            tracing::trace!("Remapped {} -> {}", event.key_code, target);
        }

        if let Some(flag) = modifiers.apply_key(target, event.pressed) {
            tracing::trace!(flag = %flag, pressed = event.pressed, "Modifier changed");
        }

        if target == KeyCode::CAPS_LOCK && event.pressed {
            let state = self.caps_lock.toggle();
            tracing::debug!(caps_lock = state, "Caps lock toggled");
            // Seized keyboards only see LED writes made through their grab.
            if let Some(led) = &self.caps_lock_led {
                led.call(LedState::from(state));
            }
        }

        if let Err(e) = self.output.emit_key(target, event.pressed) {
            tracing::warn!("Failed to emit {}: {}", target, e);
        }
    }

    fn attach_caps_lock_led(&mut self, led: LedCallback) {
        self.caps_lock_led = Some(led);
    }
}

/// Session notifier backed by the virtual keyboard.
pub struct VirtualKeyRepeat<O> {
    output: O,
}

impl<O: KeyOutput> VirtualKeyRepeat<O> {
    pub fn new(output: O) -> Self {
        Self { output }
    }
}

impl<O: KeyOutput> ConsoleUserClient for VirtualKeyRepeat<O> {
    fn connect_ack(&mut self) {
        tracing::info!("Session client acknowledged connection");
    }

    fn stop_key_repeat(&mut self) {
        if let Err(e) = self.output.release_all() {
            tracing::warn!("Failed to release held keys: {}", e);
        }
    }
}
