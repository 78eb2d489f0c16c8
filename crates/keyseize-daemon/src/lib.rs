//! keyseize daemon library
//!
//! The device-capture core (registry, grab state machine, classifier,
//! modifier tracking) plus the Linux platform layer, remapping engine and
//! control socket that the `keyseized` binary wires together.

pub mod classifier;
pub mod clients;
pub mod device;
pub mod engine;
pub mod error;
pub mod grabber;
pub mod injector;
pub mod ipc;
pub mod key_code;
pub mod modifier;
pub mod platform;
pub mod registry;
pub mod service;
pub mod simple_modifications;

#[cfg(test)]
mod testing;

pub use clients::{Clients, ConsoleUserClient, EventManipulator, HidSystemClient, KeyEvent};
pub use device::{DeviceInfo, DeviceMode, HidDevice, HidValue, LedCallback, LedState, ValueCallback};
pub use error::{DeviceError, GrabberError};
pub use grabber::{GrabberOptions, GrabberStatus};
pub use key_code::{KeyCode, RegistryEntryId};
pub use modifier::{ModifierFlag, ModifierFlagManager, ModifierOperation};
pub use service::DeviceGrabberHandle;
pub use simple_modifications::SimpleModifications;
