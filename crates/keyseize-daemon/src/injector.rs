//! Virtual keyboard output via uinput
//!
//! Remapped keys leave the daemon through a single virtual keyboard. It sits
//! on the virtual bus with a fixed vendor id so hot-plug discovery can
//! recognise it and never capture it.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, BusType, EventType, InputEvent, InputId, Key};
use parking_lot::Mutex;

use crate::key_code::KeyCode;
use crate::platform::keymap;

/// Vendor id of the daemon's virtual keyboard ("KS").
pub const SYNTHETIC_VENDOR_ID: u16 = 0x4b53;
pub const SYNTHETIC_PRODUCT_ID: u16 = 0x0001;

/// Sink for remapped key presses.
pub trait KeyOutput: Send + 'static {
    fn emit_key(&mut self, key: KeyCode, pressed: bool) -> Result<()>;

    /// Release every key this output still holds down.
    fn release_all(&mut self) -> Result<()>;
}

/// A virtual keyboard shared between the engine and the session notifier.
pub type SharedVirtualKeyboard = Arc<Mutex<VirtualKeyboard>>;

/// Create the shared virtual keyboard.
///
/// # Errors
///
/// Fails if `/dev/uinput` cannot be opened (usually missing permissions).
pub fn create_shared_virtual_keyboard(name: &str) -> Result<SharedVirtualKeyboard> {
    let keyboard = VirtualKeyboard::new(name)?;
    Ok(Arc::new(Mutex::new(keyboard)))
}

/// Linux key emitted for a logical key code.
pub fn linux_key(key: KeyCode) -> Option<Key> {
    if key == KeyCode::FN_MODIFIER {
        return Some(Key::KEY_FN);
    }
    key.keyboard_usage().and_then(keymap::key_for_keyboard_usage)
}

pub struct VirtualKeyboard {
    device: evdev::uinput::VirtualDevice,
    held: BTreeSet<u16>,
}

impl VirtualKeyboard {
    pub fn new(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for key in keymap::emittable_keys() {
            keys.insert(key);
        }
        keys.insert(Key::KEY_FN);

        let device = VirtualDeviceBuilder::new()
            .context("Failed to open /dev/uinput")?
            .name(name)
            .input_id(InputId::new(
                BusType::BUS_VIRTUAL,
                SYNTHETIC_VENDOR_ID,
                SYNTHETIC_PRODUCT_ID,
                1,
            ))
            .with_keys(&keys)?
            .build()
            .context("Failed to create virtual keyboard")?;

        tracing::info!("Created virtual keyboard '{}'", name);
        Ok(Self {
            device,
            held: BTreeSet::new(),
        })
    }

    pub fn press_key(&mut self, key: Key) -> Result<()> {
        self.send(key, 1)?;
        self.held.insert(key.code());
        Ok(())
    }

    pub fn release_key(&mut self, key: Key) -> Result<()> {
        self.send(key, 0)?;
        self.held.remove(&key.code());
        Ok(())
    }

    fn send(&mut self, key: Key, value: i32) -> Result<()> {
        let event = InputEvent::new(EventType::KEY, key.code(), value);
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device.emit(&[event, syn])?;
        Ok(())
    }
}

impl KeyOutput for VirtualKeyboard {
    fn emit_key(&mut self, key: KeyCode, pressed: bool) -> Result<()> {
        let Some(linux) = linux_key(key) else {
            tracing::debug!("No Linux key for {}, dropping", key);
            return Ok(());
        };
        if pressed {
            self.press_key(linux)
        } else {
            self.release_key(linux)
        }
    }

    fn release_all(&mut self) -> Result<()> {
        let held: Vec<u16> = self.held.iter().copied().collect();
        for code in held {
            self.release_key(Key::new(code))?;
        }
        Ok(())
    }
}

impl<O: KeyOutput> KeyOutput for Arc<Mutex<O>> {
    fn emit_key(&mut self, key: KeyCode, pressed: bool) -> Result<()> {
        self.lock().emit_key(key, pressed)
    }

    fn release_all(&mut self) -> Result<()> {
        self.lock().release_all()
    }
}
