//! Cloneable front end of the device grabber
//!
//! [`DeviceGrabberHandle`] is what the rest of the daemon holds. Every method
//! except `status` only enqueues a command and returns; the grabber task
//! applies them in order.

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::clients::Clients;
use crate::device::{HidDevice, LedState};
use crate::error::GrabberError;
use crate::grabber::{Command, DeviceGrabber, GrabberOptions, GrabberStatus};
use crate::key_code::{KeyCode, RegistryEntryId};
use crate::simple_modifications::SimpleModifications;

pub struct DeviceGrabberHandle<D> {
    sender: UnboundedSender<Command<D>>,
    simple_modifications: SimpleModifications,
}

impl<D> Clone for DeviceGrabberHandle<D> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            simple_modifications: self.simple_modifications.clone(),
        }
    }
}

impl<D: HidDevice> DeviceGrabberHandle<D> {
    /// Spawn the grabber task and return a handle to it.
    ///
    /// The grabber starts ungrabbed with an empty registry. Nothing is
    /// seized until [`grab_devices`](Self::grab_devices) is called and the
    /// readiness checks pass.
    ///
    /// # Arguments
    ///
    /// * `clients` - Engine, caps-lock oracle and session notifier driven by the grabber
    /// * `options` - Retry period, synthetic-device marker and clock
    /// * `simple_modifications` - The table the engine inside `clients` reads; the handle only mutates it
    ///
    /// # Returns
    ///
    /// The handle and the task's `JoinHandle`. The task ends after
    /// [`shutdown`](Self::shutdown) or once every handle is dropped.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (handle, task) = DeviceGrabberHandle::<EvdevDevice>::spawn(
    ///     clients,
    ///     GrabberOptions::from_config(&config.global),
    ///     simple_modifications,
    /// );
    /// handle.grab_devices();
    /// ```
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        clients: Clients,
        options: GrabberOptions,
        simple_modifications: SimpleModifications,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let grabber = DeviceGrabber::new(sender.downgrade(), clients, options);
        let task = tokio::spawn(grabber.run(receiver));

        let handle = Self {
            sender,
            simple_modifications,
        };
        (handle, task)
    }

    /// Start the readiness-gated grab protocol.
    pub fn grab_devices(&self) {
        self.send(Command::Grab);
    }

    pub fn ungrab_devices(&self) {
        self.send(Command::Ungrab);
    }

    pub fn post_connect_ack(&self) {
        self.send(Command::ConnectAck);
    }

    pub fn set_caps_lock_led_state(&self, state: LedState) {
        self.send(Command::SetCapsLockLed(state));
    }

    pub fn clear_simple_modifications(&self) {
        self.simple_modifications.clear();
    }

    pub fn add_simple_modification(&self, from: KeyCode, to: KeyCode) {
        self.simple_modifications.set(from, to);
    }

    pub fn simple_modifications(&self) -> &SimpleModifications {
        &self.simple_modifications
    }

    pub fn device_arrived(&self, device: D) {
        self.send(Command::DeviceArrived(device));
    }

    pub fn device_removed(&self, id: RegistryEntryId) {
        self.send(Command::DeviceRemoved(id));
    }

    /// Report that the platform notification subsystem could not start.
    pub fn mark_unavailable(&self) {
        self.send(Command::MarkUnavailable);
    }

    /// Query the session state once every earlier command has been applied.
    pub async fn status(&self) -> Result<GrabberStatus, GrabberError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Status(reply))
            .map_err(|_| GrabberError::ContextClosed)?;
        response.await.map_err(|_| GrabberError::ContextClosed)
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command<D>) {
        if self.sender.send(command).is_err() {
            tracing::debug!("Device grabber is gone, dropping command");
        }
    }
}
