//! Device registry
//!
//! [`DeviceRegistry`] owns every attached device handle, keyed by registry
//! identity, together with the mode the core put it in. It is only ever
//! touched from the grabber's serialization context, so it carries no lock.
//!
//! # Exemption
//!
//! A handle whose manufacturer equals the synthetic-device marker is the
//! daemon's own virtual keyboard. It is observed on arrival and then left
//! alone: never seized, never released, never un-observed. Otherwise the
//! daemon would capture the events it synthesizes itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceInfo, DeviceMode, HidDevice, LedState, ValueCallback};
use crate::key_code::RegistryEntryId;

/// Status of one tracked device, as reported to the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub info: DeviceInfo,
    pub mode: DeviceMode,
    pub exempt: bool,
    pub pressed_keys: usize,
}

struct TrackedDevice<D> {
    device: D,
    mode: DeviceMode,
}

/// Owns the attached device handles.
pub struct DeviceRegistry<D> {
    devices: HashMap<RegistryEntryId, TrackedDevice<D>>,
    synthetic_manufacturer: String,
}

impl<D: HidDevice> DeviceRegistry<D> {
    /// Create an empty registry. Devices whose manufacturer equals
    /// `synthetic_manufacturer` are exempt from capture.
    pub fn new(synthetic_manufacturer: impl Into<String>) -> Self {
        Self {
            devices: HashMap::new(),
            synthetic_manufacturer: synthetic_manufacturer.into(),
        }
    }

    /// Whether `device` is the daemon's own synthetic device.
    pub fn is_exempt(&self, device: &D) -> bool {
        device
            .manufacturer()
            .is_some_and(|manufacturer| manufacturer == self.synthetic_manufacturer)
    }

    /// Register a newly arrived device, then seize it when `grabbed` is true
    /// or observe it otherwise.
    ///
    /// A second arrival for an identity already present replaces and drops
    /// the previous handle. A previous handle that was seized is ungrabbed
    /// first, so the replacement can take the grab.
    ///
    /// # Arguments
    ///
    /// * `device` - The new handle
    /// * `grabbed` - Whether the session is currently grabbed
    /// * `callback` - Receives raw values once the device is seized
    /// * `caps_lock` - Host caps-lock state, mirrored to the LED on seize
    ///
    /// # Returns
    ///
    /// The device's registry identity.
    pub fn on_device_arrived(
        &mut self,
        device: D,
        grabbed: bool,
        callback: &ValueCallback,
        caps_lock: Option<bool>,
    ) -> RegistryEntryId {
        let id = device.registry_entry_id();
        tracing::info!("matching device: {}", device.info());

        let previous = self.devices.insert(
            id,
            TrackedDevice {
                device,
                mode: DeviceMode::Unobserved,
            },
        );
        if let Some(mut previous) = previous {
            tracing::debug!(registry_entry_id = id.0, "Replaced handle for re-announced device");
            // The old handle must give up its grab before the new one seizes.
            if previous.mode == DeviceMode::Grabbed {
                previous.device.ungrab();
            }
        }

        if grabbed {
            self.seize(id, callback, caps_lock);
        } else {
            self.observe(id);
        }

        id
    }

    /// Forget a removed device. Unknown identities are ignored.
    pub fn on_device_removed(&mut self, id: RegistryEntryId) -> bool {
        match self.devices.remove(&id) {
            Some(tracked) => {
                tracing::info!(
                    "removal device: vendor_id:{:#x}, product_id:{:#x}, location_id:{:#x}",
                    tracked.device.vendor_id().unwrap_or(0),
                    tracked.device.product_id().unwrap_or(0),
                    tracked.device.location_id().unwrap_or(0),
                );
                true
            }
            None => {
                tracing::debug!(
                    registry_entry_id = id.0,
                    "Removal for unknown device, nothing to do"
                );
                false
            }
        }
    }

    /// Seize every non-exempt device and clear its key state.
    pub fn seize_all(&mut self, callback: &ValueCallback, caps_lock: Option<bool>) {
        for id in self.capturable_ids() {
            self.seize(id, callback, caps_lock);
            if let Some(tracked) = self.devices.get_mut(&id) {
                tracked.device.clear_changed_keys();
                tracked.device.clear_pressed_keys();
            }
        }
    }

    /// Release every non-exempt device back to observation and clear its
    /// key state.
    pub fn release_all(&mut self) {
        for id in self.capturable_ids() {
            self.release(id);
            if let Some(tracked) = self.devices.get_mut(&id) {
                tracked.device.clear_changed_keys();
                tracked.device.clear_pressed_keys();
            }
        }
    }

    /// Push an LED state to every device.
    pub fn set_caps_lock_led_state(&mut self, state: LedState) {
        for tracked in self.devices.values_mut() {
            tracked.device.set_caps_lock_led_state(state);
        }
    }

    /// Sum of pressed-key counters across all devices.
    pub fn total_pressed_keys_count(&self) -> usize {
        self.devices
            .values()
            .map(|tracked| tracked.device.pressed_keys_count())
            .sum()
    }

    pub fn contains(&self, id: RegistryEntryId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn mode(&self, id: RegistryEntryId) -> Option<DeviceMode> {
        self.devices.get(&id).map(|tracked| tracked.mode)
    }

    pub fn ids(&self) -> Vec<RegistryEntryId> {
        let mut ids: Vec<_> = self.devices.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Status of every device, sorted by identity.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut statuses: Vec<_> = self
            .devices
            .values()
            .map(|tracked| DeviceStatus {
                info: tracked.device.info(),
                mode: tracked.mode,
                exempt: self.is_exempt(&tracked.device),
                pressed_keys: tracked.device.pressed_keys_count(),
            })
            .collect();
        statuses.sort_by_key(|status| status.info.registry_entry_id);
        statuses
    }

    fn capturable_ids(&self) -> Vec<RegistryEntryId> {
        self.devices
            .iter()
            .filter(|(_, tracked)| !self.is_exempt(&tracked.device))
            .map(|(id, _)| *id)
            .collect()
    }

    fn observe(&mut self, id: RegistryEntryId) {
        if let Some(tracked) = self.devices.get_mut(&id) {
            tracked.device.observe(ValueCallback::ignore());
            tracked.mode = DeviceMode::Observing;
        }
    }

    fn seize(&mut self, id: RegistryEntryId, callback: &ValueCallback, caps_lock: Option<bool>) {
        let synthetic = self
            .devices
            .get(&id)
            .is_some_and(|tracked| self.is_exempt(&tracked.device));
        if synthetic {
            if self.mode(id) == Some(DeviceMode::Unobserved) {
                self.observe(id);
            }
            return;
        }

        let Some(tracked) = self.devices.get_mut(&id) else {
            return;
        };
        if tracked.mode == DeviceMode::Grabbed {
            return;
        }

        tracked.device.unobserve();
        tracked.mode = DeviceMode::Unobserved;

        match tracked.device.grab(callback.clone()) {
            Ok(()) => {
                tracked.mode = DeviceMode::Grabbed;
                let led = LedState::from(caps_lock == Some(true));
                tracked.device.set_caps_lock_led_state(led);
            }
            Err(e) => {
                tracing::warn!("Failed to grab device, leaving it observed: {}", e);
                tracked.device.observe(ValueCallback::ignore());
                tracked.mode = DeviceMode::Observing;
            }
        }
    }

    fn release(&mut self, id: RegistryEntryId) {
        let Some(tracked) = self.devices.get(&id) else {
            return;
        };
        if self.is_exempt(&tracked.device) {
            return;
        }

        let Some(tracked) = self.devices.get_mut(&id) else {
            return;
        };
        match tracked.mode {
            DeviceMode::Grabbed => {
                tracked.device.ungrab();
                tracked.device.observe(ValueCallback::ignore());
                tracked.mode = DeviceMode::Observing;
            }
            DeviceMode::Unobserved => {
                tracked.device.observe(ValueCallback::ignore());
                tracked.mode = DeviceMode::Observing;
            }
            DeviceMode::Observing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, FakeDeviceCall};

    const MARKER: &str = "keyseize";

    fn registry() -> DeviceRegistry<FakeDevice> {
        DeviceRegistry::new(MARKER)
    }

    #[test]
    fn test_arrival_observes_when_ungrabbed() {
        let mut registry = registry();
        let (device, log) = FakeDevice::new(1);
        registry.on_device_arrived(device, false, &ValueCallback::ignore(), None);

        assert_eq!(registry.mode(RegistryEntryId(1)), Some(DeviceMode::Observing));
        assert_eq!(log.calls(), vec![FakeDeviceCall::Observe]);
    }

    #[test]
    fn test_arrival_seizes_when_grabbed() {
        let mut registry = registry();
        let (device, log) = FakeDevice::new(1);
        registry.on_device_arrived(device, true, &ValueCallback::ignore(), Some(true));

        assert_eq!(registry.mode(RegistryEntryId(1)), Some(DeviceMode::Grabbed));
        assert_eq!(
            log.calls(),
            vec![
                FakeDeviceCall::Unobserve,
                FakeDeviceCall::Grab,
                FakeDeviceCall::SetLed(LedState::On),
            ]
        );
    }

    #[test]
    fn test_failed_seize_leaves_device_observed() {
        let mut registry = registry();
        let (device, log) = FakeDevice::new(1);
        log.fail_grab(true);
        registry.on_device_arrived(device, true, &ValueCallback::ignore(), None);

        assert_eq!(registry.mode(RegistryEntryId(1)), Some(DeviceMode::Observing));
        assert_eq!(log.calls().last(), Some(&FakeDeviceCall::Observe));
    }

    #[test]
    fn test_synthetic_device_is_never_seized() {
        let mut registry = registry();
        let (device, log) = FakeDevice::with_manufacturer(1, MARKER);
        registry.on_device_arrived(device, true, &ValueCallback::ignore(), None);
        registry.seize_all(&ValueCallback::ignore(), None);
        registry.release_all();

        assert_eq!(registry.mode(RegistryEntryId(1)), Some(DeviceMode::Observing));
        assert!(!log.calls().contains(&FakeDeviceCall::Grab));
        assert!(!log.calls().contains(&FakeDeviceCall::Unobserve));
        assert!(registry.statuses()[0].exempt);
    }

    #[test]
    fn test_key_set_tracks_arrivals_and_removals() {
        let mut registry = registry();
        let script: &[(bool, u64)] = &[
            (true, 1),
            (true, 2),
            (false, 1),
            (true, 3),
            (false, 9),
            (true, 2),
            (false, 3),
            (true, 1),
        ];

        let mut expected = std::collections::BTreeSet::new();
        for &(arrive, id) in script {
            if arrive {
                registry.on_device_arrived(FakeDevice::new(id).0, false, &ValueCallback::ignore(), None);
                expected.insert(id);
            } else {
                registry.on_device_removed(RegistryEntryId(id));
                expected.remove(&id);
            }
            let actual: Vec<u64> = registry.ids().iter().map(|id| id.0).collect();
            assert_eq!(actual, expected.iter().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_duplicate_arrival_replaces_handle() {
        let mut registry = registry();
        let (first, first_log) = FakeDevice::new(5);
        let (second, _) = FakeDevice::new(5);
        registry.on_device_arrived(first, false, &ValueCallback::ignore(), None);
        registry.on_device_arrived(second, false, &ValueCallback::ignore(), None);

        assert_eq!(registry.len(), 1);
        assert!(first_log.is_dropped());
    }

    #[test]
    fn test_duplicate_arrival_while_grabbed_releases_old_handle() {
        let mut registry = registry();
        let (first, first_log) = FakeDevice::new(5);
        let (second, second_log) = FakeDevice::new(5);
        registry.on_device_arrived(first, true, &ValueCallback::ignore(), None);
        first_log.clear_calls();

        registry.on_device_arrived(second, true, &ValueCallback::ignore(), None);

        assert_eq!(first_log.calls(), vec![FakeDeviceCall::Ungrab]);
        assert!(first_log.is_dropped());
        assert!(second_log.calls().contains(&FakeDeviceCall::Grab));
        assert_eq!(registry.mode(RegistryEntryId(5)), Some(DeviceMode::Grabbed));
    }

    #[test]
    fn test_duplicate_arrival_while_observing_does_not_ungrab() {
        let mut registry = registry();
        let (first, first_log) = FakeDevice::new(5);
        registry.on_device_arrived(first, false, &ValueCallback::ignore(), None);
        first_log.clear_calls();

        registry.on_device_arrived(FakeDevice::new(5).0, false, &ValueCallback::ignore(), None);

        assert!(first_log.calls().is_empty());
    }

    #[test]
    fn test_unknown_removal_is_noop() {
        let mut registry = registry();
        assert!(!registry.on_device_removed(RegistryEntryId(77)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pressed_keys_are_summed() {
        let mut registry = registry();
        let (a, a_log) = FakeDevice::new(1);
        let (b, b_log) = FakeDevice::new(2);
        a_log.set_pressed_keys(2);
        b_log.set_pressed_keys(1);
        registry.on_device_arrived(a, false, &ValueCallback::ignore(), None);
        registry.on_device_arrived(b, false, &ValueCallback::ignore(), None);

        assert_eq!(registry.total_pressed_keys_count(), 3);
    }

    #[test]
    fn test_release_all_returns_devices_to_observing() {
        let mut registry = registry();
        let (device, log) = FakeDevice::new(1);
        log.set_pressed_keys(1);
        registry.on_device_arrived(device, true, &ValueCallback::ignore(), None);
        registry.release_all();

        assert_eq!(registry.mode(RegistryEntryId(1)), Some(DeviceMode::Observing));
        assert_eq!(registry.total_pressed_keys_count(), 0);
        assert!(log.calls().contains(&FakeDeviceCall::Ungrab));
    }

    #[test]
    fn test_led_push_reaches_every_device() {
        let mut registry = registry();
        let (a, a_log) = FakeDevice::new(1);
        let (b, b_log) = FakeDevice::with_manufacturer(2, MARKER);
        registry.on_device_arrived(a, false, &ValueCallback::ignore(), None);
        registry.on_device_arrived(b, false, &ValueCallback::ignore(), None);
        registry.set_caps_lock_led_state(LedState::On);

        assert_eq!(a_log.calls().last(), Some(&FakeDeviceCall::SetLed(LedState::On)));
        assert_eq!(b_log.calls().last(), Some(&FakeDeviceCall::SetLed(LedState::On)));
    }
}
