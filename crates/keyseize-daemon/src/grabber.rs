//! Grab state machine
//!
//! [`DeviceGrabber`] is the single source of truth for whether devices are
//! seized. It runs as one tokio task: every request, hot-plug notification,
//! raw value and timer tick arrives as a [`Command`] on one unbounded
//! channel, so transitions never interleave.
//!
//! # Grab protocol
//!
//! `Grab` restarts the [`GrabTimer`]. On each tick the grabber checks that
//! the engine is ready and that no key is held on any device. While either
//! check fails it retries on the next tick, warning at most once per
//! calendar second. Once both pass, every non-exempt device is seized in one
//! step and the timer is dropped.
//!
//! Each restart bumps a generation counter carried by the ticks, so a tick
//! queued by an older timer is ignored and the most recent request wins.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use keyseize_config::GlobalConfig;

use crate::classifier::classify;
use crate::clients::Clients;
use crate::device::{HidDevice, HidValue, LedCallback, LedState, ValueCallback};
use crate::key_code::RegistryEntryId;
use crate::modifier::ModifierFlagManager;
use crate::registry::{DeviceRegistry, DeviceStatus};

const ENGINE_NOT_READY: &str = "event manipulator is not ready, please wait for a while";
const KEYS_PRESSED: &str = "there are pressed down keys in some devices, please release them";

/// Work item for the serialization context.
pub enum Command<D> {
    Grab,
    Ungrab,
    GrabTick { generation: u64 },
    DeviceArrived(D),
    DeviceRemoved(RegistryEntryId),
    ValueChanged(HidValue),
    ConnectAck,
    SetCapsLockLed(LedState),
    Status(oneshot::Sender<GrabberStatus>),
    /// The platform notification subsystem failed to start
    MarkUnavailable,
    Shutdown,
}

/// Snapshot of the grab session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabberStatus {
    pub grabbed: bool,
    pub available: bool,
    pub retry_count: u64,
    pub retry_warnings: u64,
    pub devices: Vec<DeviceStatus>,
}

/// Source of the current calendar second used to throttle warnings.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall clock in whole seconds since the Unix epoch.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    })
}

/// Grabber settings.
#[derive(Clone)]
pub struct GrabberOptions {
    pub retry_interval: Duration,
    pub synthetic_manufacturer: String,
    pub clock: Clock,
}

impl GrabberOptions {
    pub fn from_config(global: &GlobalConfig) -> Self {
        Self {
            retry_interval: Duration::from_millis(global.grab_retry_interval_ms),
            synthetic_manufacturer: global.synthetic_manufacturer.clone(),
            clock: system_clock(),
        }
    }
}

impl Default for GrabberOptions {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// Recurring retry timer. Dropping it stops the ticks.
pub struct GrabTimer {
    task: JoinHandle<()>,
}

impl GrabTimer {
    /// Send `GrabTick { generation }` every `period`, first after one period.
    pub fn start<D: Send + 'static>(
        sender: WeakUnboundedSender<Command<D>>,
        period: Duration,
        generation: u64,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(sender) = sender.upgrade() else {
                    break;
                };
                if sender.send(Command::GrabTick { generation }).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for GrabTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the registry, the session state and the retry timer.
pub struct DeviceGrabber<D> {
    timer: Option<GrabTimer>,
    generation: u64,

    registry: DeviceRegistry<D>,
    clients: Clients,
    modifiers: ModifierFlagManager,

    grabbed: bool,
    available: bool,
    retry_count: u64,
    retry_warnings: u64,
    last_warning_second: Option<u64>,

    retry_interval: Duration,
    clock: Clock,
    sender: WeakUnboundedSender<Command<D>>,
    callback: ValueCallback,
}

impl<D: HidDevice> DeviceGrabber<D> {
    /// Build a grabber whose devices report raw values back through `sender`.
    pub fn new(
        sender: WeakUnboundedSender<Command<D>>,
        mut clients: Clients,
        options: GrabberOptions,
    ) -> Self {
        let callback = {
            let sender = sender.clone();
            ValueCallback::new(move |value| {
                if let Some(sender) = sender.upgrade() {
                    let _ = sender.send(Command::ValueChanged(value));
                }
            })
        };
        let led = {
            let sender = sender.clone();
            LedCallback::new(move |state| {
                if let Some(sender) = sender.upgrade() {
                    let _ = sender.send(Command::SetCapsLockLed(state));
                }
            })
        };
        clients.engine.attach_caps_lock_led(led);

        Self {
            timer: None,
            generation: 0,
            registry: DeviceRegistry::new(options.synthetic_manufacturer),
            clients,
            modifiers: ModifierFlagManager::new(),
            grabbed: false,
            available: true,
            retry_count: 0,
            retry_warnings: 0,
            last_warning_second: None,
            retry_interval: options.retry_interval,
            clock: options.clock,
            sender,
            callback,
        }
    }

    /// Process commands until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut receiver: UnboundedReceiver<Command<D>>) {
        tracing::debug!("Device grabber started");
        while let Some(command) = receiver.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        tracing::info!("Device grabber stopped");
    }

    /// Apply one command. Returns `false` when the context should stop.
    pub fn handle(&mut self, command: Command<D>) -> bool {
        match command {
            Command::Grab => self.grab_devices(),
            Command::Ungrab => self.ungrab_devices(),
            Command::GrabTick { generation } => self.on_grab_tick(generation),
            Command::DeviceArrived(device) => self.on_device_arrived(device),
            Command::DeviceRemoved(id) => {
                self.registry.on_device_removed(id);
            }
            Command::ValueChanged(value) => self.on_value_changed(value),
            Command::ConnectAck => self.clients.console_user.connect_ack(),
            Command::SetCapsLockLed(state) => self.registry.set_caps_lock_led_state(state),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::MarkUnavailable => self.mark_unavailable(),
            Command::Shutdown => {
                tracing::info!("Device grabber shutting down");
                return false;
            }
        }
        true
    }

    pub fn status(&self) -> GrabberStatus {
        GrabberStatus {
            grabbed: self.grabbed,
            available: self.available,
            retry_count: self.retry_count,
            retry_warnings: self.retry_warnings,
            devices: self.registry.statuses(),
        }
    }

    fn grab_devices(&mut self) {
        if !self.available {
            tracing::warn!("Device notifications are unavailable, ignoring grab request");
            return;
        }

        self.cancel_grab_timer();
        self.retry_count = 0;
        self.last_warning_second = None;
        self.generation += 1;
        self.timer = Some(GrabTimer::start(
            self.sender.clone(),
            self.retry_interval,
            self.generation,
        ));
        tracing::debug!(generation = self.generation, "Grab requested");
    }

    fn ungrab_devices(&mut self) {
        if !self.available {
            tracing::warn!("Device notifications are unavailable, ignoring ungrab request");
            return;
        }

        self.cancel_grab_timer();
        if !self.grabbed {
            return;
        }

        self.grabbed = false;
        self.registry.release_all();
        self.modifiers.reset();
        self.clients.hid_system.set_caps_lock_state(false);
        self.clients.console_user.stop_key_repeat();

        tracing::info!("devices are ungrabbed");
    }

    fn on_grab_tick(&mut self, generation: u64) {
        if self.timer.is_none() || generation != self.generation {
            tracing::trace!(generation, "Ignoring stale grab tick");
            return;
        }
        if self.grabbed {
            self.cancel_grab_timer();
            return;
        }

        let mut warning = None;
        if !self.clients.engine.is_ready() {
            warning = Some(ENGINE_NOT_READY);
        }
        if self.registry.total_pressed_keys_count() > 0 {
            warning = Some(KEYS_PRESSED);
        }

        if let Some(message) = warning {
            self.retry_count += 1;
            let now = (self.clock)();
            if self.last_warning_second != Some(now) {
                self.last_warning_second = Some(now);
                self.retry_warnings += 1;
                tracing::warn!(retry_count = self.retry_count, "{}", message);
            }
            return;
        }

        self.grabbed = true;

        let caps_lock = self.clients.hid_system.caps_lock_state();
        self.registry.seize_all(&self.callback, caps_lock);

        self.modifiers.reset();
        self.clients.hid_system.set_caps_lock_state(false);

        tracing::info!(retry_count = self.retry_count, "devices are grabbed");

        self.cancel_grab_timer();
    }

    fn on_device_arrived(&mut self, device: D) {
        if !self.available {
            tracing::debug!(
                registry_entry_id = device.registry_entry_id().0,
                "Ignoring device arrival while unavailable"
            );
            return;
        }

        let caps_lock = self.clients.hid_system.caps_lock_state();
        self.registry
            .on_device_arrived(device, self.grabbed, &self.callback, caps_lock);
    }

    fn on_value_changed(&mut self, value: HidValue) {
        if !self.grabbed {
            return;
        }
        if !self.registry.contains(value.device) {
            tracing::trace!(device = %value.device, "Dropping value from unknown device");
            return;
        }

        if let Some(event) = classify(&value) {
            tracing::trace!(
                device = %event.device,
                key_code = %event.key_code,
                pressed = event.pressed,
                "Key event"
            );
            self.clients
                .engine
                .handle_keyboard_event(event, &mut self.modifiers);
        }
    }

    fn mark_unavailable(&mut self) {
        tracing::error!("Device notification subsystem failed, grabbing is disabled");
        self.available = false;
        self.cancel_grab_timer();
    }

    fn cancel_grab_timer(&mut self) {
        self.timer = None;
    }
}

impl<D> Drop for DeviceGrabber<D> {
    fn drop(&mut self) {
        self.timer = None;
    }
}
