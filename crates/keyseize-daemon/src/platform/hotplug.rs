//! udev hot-plug discovery
//!
//! Watches the `input` subsystem and turns `/dev/input/event*` add and
//! remove events into grabber arrivals and removals. Devices already present
//! at startup are announced from an initial enumeration, taken after the
//! monitor socket is open so nothing plugged in between is missed.
//!
//! udev handles are not `Send`, so [`watch_devices`] is meant to be polled
//! on the task that calls it rather than spawned.

use std::path::{Path, PathBuf};

use evdev::{BusType, Device};
use futures::StreamExt;
use tokio_udev::{AsyncMonitorSocket, Enumerator, EventType, MonitorBuilder};

use keyseize_config::DeviceClass;

use crate::error::{DeviceError, GrabberError};
use crate::injector::SYNTHETIC_VENDOR_ID;
use crate::key_code::RegistryEntryId;
use crate::platform::evdev_device::{EvdevAttributes, EvdevDevice};
use crate::platform::matches_class;
use crate::service::DeviceGrabberHandle;

const SUBSYSTEM: &str = "input";

/// What to announce and how to recognise the daemon's own keyboard.
#[derive(Debug, Clone)]
pub struct HotplugOptions {
    pub classes: Vec<DeviceClass>,
    pub synthetic_manufacturer: String,
}

/// A udev device reduced to what is needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    path: PathBuf,
    id: RegistryEntryId,
    vendor: Option<String>,
}

/// Announce present devices, then follow hot-plug events until the monitor
/// stream ends.
///
/// The monitor socket is opened before the initial scan, so a device added
/// in between is reported at least once. A duplicate announcement replaces
/// the registry entry.
///
/// # Arguments
///
/// * `handle` - Grabber that receives arrivals and removals
/// * `options` - Device classes to announce and the synthetic-device marker
///
/// # Errors
///
/// Returns [`GrabberError::NotificationUnavailable`] when the udev monitor
/// or the initial enumeration cannot be set up. Errors on individual events
/// or devices are logged and skipped.
///
/// # Example
///
/// ```ignore
/// let hotplug = platform::watch_devices(handle.clone(), options);
/// tokio::pin!(hotplug);
/// ```
///
/// udev handles are not `Send`; poll the returned future on the calling
/// task instead of spawning it.
pub async fn watch_devices(
    handle: DeviceGrabberHandle<EvdevDevice>,
    options: HotplugOptions,
) -> Result<(), GrabberError> {
    let mut monitor = MonitorBuilder::new()
        .and_then(|builder| builder.match_subsystem(SUBSYSTEM))
        .and_then(|builder| builder.listen())
        .and_then(AsyncMonitorSocket::new)
        .map_err(GrabberError::NotificationUnavailable)?;

    let present = scan_present().map_err(GrabberError::NotificationUnavailable)?;
    tracing::info!("Found {} input event node(s)", present.len());
    for candidate in present {
        announce(&handle, &options, candidate);
    }

    while let Some(event) = monitor.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("udev monitor error: {}", e);
                continue;
            }
        };

        let Some(candidate) = candidate_from(&event.device()) else {
            continue;
        };
        match event.event_type() {
            EventType::Add => announce(&handle, &options, candidate),
            EventType::Remove => {
                tracing::debug!("Input node removed: {}", candidate.path.display());
                handle.device_removed(candidate.id);
            }
            _ => {}
        }
    }

    tracing::warn!("udev monitor stream ended");
    Ok(())
}

fn scan_present() -> std::io::Result<Vec<Candidate>> {
    let mut enumerator = Enumerator::new()?;
    enumerator.match_subsystem(SUBSYSTEM)?;
    let mut candidates: Vec<_> = enumerator
        .scan_devices()?
        .filter_map(|device| candidate_from(&device))
        .collect();
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(candidates)
}

fn candidate_from(device: &tokio_udev::Device) -> Option<Candidate> {
    let path = device.devnode()?;
    if !is_event_node(path) {
        return None;
    }
    let devnum = device.devnum()?;
    let vendor = device
        .property_value("ID_VENDOR")
        .and_then(|value| value.to_str())
        .map(str::to_string);

    Some(Candidate {
        path: path.to_path_buf(),
        id: RegistryEntryId(devnum as u64),
        vendor,
    })
}

fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("event"))
}

fn announce(
    handle: &DeviceGrabberHandle<EvdevDevice>,
    options: &HotplugOptions,
    candidate: Candidate,
) {
    match open_candidate(options, candidate) {
        Ok(device) => handle.device_arrived(device),
        Err(DeviceError::NotMatched { path }) => {
            tracing::trace!("Skipping {}: no configured device class", path.display());
        }
        Err(e) => tracing::debug!("{}", e),
    }
}

fn open_candidate(options: &HotplugOptions, candidate: Candidate) -> Result<EvdevDevice, DeviceError> {
    let device = Device::open(&candidate.path).map_err(|source| DeviceError::OpenFailed {
        path: candidate.path.clone(),
        source,
    })?;

    if !options
        .classes
        .iter()
        .any(|class| matches_class(&device, *class))
    {
        return Err(DeviceError::NotMatched {
            path: candidate.path,
        });
    }

    let mut attributes = EvdevAttributes::from_device(&device);
    attributes.manufacturer = manufacturer_for(
        candidate.vendor,
        device.input_id().bus_type(),
        attributes.vendor_id,
        attributes.product.as_deref(),
        &options.synthetic_manufacturer,
    );

    EvdevDevice::start(device, &candidate.path, candidate.id, attributes)
}

/// Manufacturer reported for a device.
///
/// udev's `ID_VENDOR` wins. Virtual-bus devices have none: the daemon's own
/// keyboard is recognised by its vendor id and reported as
/// `synthetic_manufacturer`, other virtual devices fall back to their name.
fn manufacturer_for(
    udev_vendor: Option<String>,
    bus: BusType,
    vendor_id: Option<u32>,
    name: Option<&str>,
    synthetic_manufacturer: &str,
) -> Option<String> {
    if udev_vendor.is_some() {
        return udev_vendor;
    }
    if bus != BusType::BUS_VIRTUAL {
        return None;
    }
    if vendor_id == Some(u32::from(SYNTHETIC_VENDOR_ID)) {
        return Some(synthetic_manufacturer.to_string());
    }
    name.map(str::to_string)
}
