//! Modifier flag tracking
//!
//! The [`ModifierFlagManager`] aggregates, across every captured device, which
//! modifier keys are logically held. Each flag carries a press counter (two
//! keyboards holding left shift count twice) and a lock bit for toggling
//! modifiers such as caps lock.
//!
//! The device-capture core only ever calls [`ModifierFlagManager::reset`], on
//! every grab and ungrab transition. Accumulation is the remapping engine's
//! business: it receives the manager by `&mut` with every key event.

use std::collections::BTreeMap;
use std::fmt;

use crate::key_code::KeyCode;

/// Logical modifier keys, left and right variants kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModifierFlag {
    CapsLock,
    LeftControl,
    LeftShift,
    LeftOption,
    LeftCommand,
    RightControl,
    RightShift,
    RightOption,
    RightCommand,
    Fn,
}

impl ModifierFlag {
    /// Check if a key code is a modifier and return its flag.
    pub fn from_key_code(key: KeyCode) -> Option<Self> {
        match key {
            KeyCode::CAPS_LOCK => Some(ModifierFlag::CapsLock),
            KeyCode::LEFT_CONTROL => Some(ModifierFlag::LeftControl),
            KeyCode::LEFT_SHIFT => Some(ModifierFlag::LeftShift),
            KeyCode::LEFT_OPTION => Some(ModifierFlag::LeftOption),
            KeyCode::LEFT_COMMAND => Some(ModifierFlag::LeftCommand),
            KeyCode::RIGHT_CONTROL => Some(ModifierFlag::RightControl),
            KeyCode::RIGHT_SHIFT => Some(ModifierFlag::RightShift),
            KeyCode::RIGHT_OPTION => Some(ModifierFlag::RightOption),
            KeyCode::RIGHT_COMMAND => Some(ModifierFlag::RightCommand),
            KeyCode::FN_MODIFIER => Some(ModifierFlag::Fn),
            _ => None,
        }
    }
}

impl fmt::Display for ModifierFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModifierFlag::CapsLock => "caps_lock",
            ModifierFlag::LeftControl => "left_control",
            ModifierFlag::LeftShift => "left_shift",
            ModifierFlag::LeftOption => "left_option",
            ModifierFlag::LeftCommand => "left_command",
            ModifierFlag::RightControl => "right_control",
            ModifierFlag::RightShift => "right_shift",
            ModifierFlag::RightOption => "right_option",
            ModifierFlag::RightCommand => "right_command",
            ModifierFlag::Fn => "fn",
        };
        f.write_str(name)
    }
}

/// How a key event changes a modifier flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierOperation {
    Increase,
    Decrease,
    Lock,
    Unlock,
    ToggleLock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FlagState {
    count: u32,
    locked: bool,
}

impl FlagState {
    fn is_active(&self) -> bool {
        self.count > 0 || self.locked
    }
}

/// Process-wide logical modifier state.
#[derive(Debug, Default)]
pub struct ModifierFlagManager {
    states: BTreeMap<ModifierFlag, FlagState>,
}

impl ModifierFlagManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an operation to a flag.
    ///
    /// Decrease saturates at zero: a release whose press happened before the
    /// last reset must not drive the counter negative.
    pub fn manipulate(&mut self, flag: ModifierFlag, operation: ModifierOperation) {
        let state = self.states.entry(flag).or_default();
        match operation {
            ModifierOperation::Increase => state.count += 1,
            ModifierOperation::Decrease => state.count = state.count.saturating_sub(1),
            ModifierOperation::Lock => state.locked = true,
            ModifierOperation::Unlock => state.locked = false,
            ModifierOperation::ToggleLock => state.locked = !state.locked,
        }
    }

    /// Apply a press or release of `key` if it is a modifier. Returns the
    /// flag that changed.
    pub fn apply_key(&mut self, key: KeyCode, pressed: bool) -> Option<ModifierFlag> {
        let flag = ModifierFlag::from_key_code(key)?;
        let operation = if pressed {
            ModifierOperation::Increase
        } else {
            ModifierOperation::Decrease
        };
        self.manipulate(flag, operation);
        Some(flag)
    }

    pub fn is_pressed(&self, flag: ModifierFlag) -> bool {
        self.states.get(&flag).is_some_and(FlagState::is_active)
    }

    pub fn is_locked(&self, flag: ModifierFlag) -> bool {
        self.states.get(&flag).is_some_and(|s| s.locked)
    }

    /// Flags currently active, in a stable order.
    pub fn active_flags(&self) -> Vec<ModifierFlag> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_active())
            .map(|(flag, _)| *flag)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.states.values().any(FlagState::is_active)
    }

    /// Forget every held and locked modifier.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}
