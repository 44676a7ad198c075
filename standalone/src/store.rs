//! Which devices exist and which are taken.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use wire::capabilities::{AUT, BROWSER_NAME, matches};
use wire::{Capabilities, CommandError};

use crate::devices::{DeviceDescriptor, DeviceDiscoveryError, DeviceFinder, DeviceKind};
use crate::ports::PortAllocator;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(
        "No devices are found. This can happen if the devices are in use or no device screen \
         matches the required capabilities."
    )]
    NoDevices,
    #[error("no free emulator port left")]
    AllocationExhausted,
    #[error(transparent)]
    Discovery(#[from] DeviceDiscoveryError),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        CommandError::SessionNotCreated(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Attached,
    Avd(String),
}

#[derive(Debug)]
struct Slot {
    descriptor: DeviceDescriptor,
    source: Source,
    in_use: bool,
    /// Console port of an emulator kept alive between sessions.
    running_port: Option<u16>,
}

/// The AVD side of a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdLease {
    pub name: String,
    pub port: u16,
    /// Left running by an earlier session; no launch needed.
    pub running: bool,
}

/// A device held for one session until [`DeviceStore::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub descriptor: DeviceDescriptor,
    pub avd: Option<AvdLease>,
}

impl Reservation {
    pub fn serial(&self) -> String {
        match &self.avd {
            Some(lease) => crate::emulator::serial_for_port(lease.port),
            None => self.descriptor.serial.clone(),
        }
    }
}

pub struct DeviceStore {
    slots: Mutex<Vec<Slot>>,
    emulator_ports: PortAllocator,
}

impl DeviceStore {
    pub fn new(emulator_ports: PortAllocator) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            emulator_ports,
        }
    }

    /// Registers an AVD. `descriptor` carries whatever is known about its
    /// screen and platform; the AVD name stands in for the serial until the
    /// emulator runs.
    pub fn add_avd(&self, name: &str, mut descriptor: DeviceDescriptor) {
        descriptor.kind = DeviceKind::Emulator;
        descriptor.serial = name.to_string();
        tracing::info!(avd = name, "adding emulator");
        self.lock().push(Slot {
            descriptor,
            source: Source::Avd(name.to_string()),
            in_use: false,
            running_port: None,
        });
    }

    /// Rescans attached hardware. New devices are described and added, free
    /// devices that went away are dropped, reserved ones are kept.
    pub fn refresh(&self, finder: &dyn DeviceFinder) -> Result<(), StoreError> {
        let found = finder.find_connected_devices()?;
        let known: Vec<String> = self
            .lock()
            .iter()
            .filter(|slot| slot.source == Source::Attached)
            .map(|slot| slot.descriptor.serial.clone())
            .collect();

        let fresh: Vec<DeviceDescriptor> = found
            .iter()
            .filter(|d| !known.contains(&d.serial))
            .map(|d| finder.describe(d.clone()))
            .collect();

        let mut slots = self.lock();
        slots.retain(|slot| {
            let keep = slot.source != Source::Attached
                || slot.in_use
                || found.iter().any(|d| d.serial == slot.descriptor.serial);
            if !keep {
                tracing::info!(serial = %slot.descriptor.serial, "device removed");
            }
            keep
        });
        for descriptor in fresh {
            tracing::info!(serial = %descriptor.serial, model = ?descriptor.model, "adding device");
            slots.push(Slot {
                descriptor,
                source: Source::Attached,
                in_use: false,
                running_port: None,
            });
        }
        // Attached hardware is preferred over booting an AVD.
        slots.sort_by_key(|slot| slot.source != Source::Attached);
        Ok(())
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().iter().map(|s| s.descriptor.clone()).collect()
    }

    /// Picks the first free device that can serve `requested`.
    pub fn reserve(&self, requested: &Capabilities) -> Result<Reservation, StoreError> {
        let mut slots = self.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| !slot.in_use && serves(&slot.descriptor, requested))
            .ok_or(StoreError::NoDevices)?;

        let avd = match &slot.source {
            Source::Attached => None,
            Source::Avd(name) => {
                let (port, running) = match slot.running_port {
                    Some(port) => (port, true),
                    None => {
                        let port = self
                            .emulator_ports
                            .next()
                            .ok_or(StoreError::AllocationExhausted)?;
                        (port, false)
                    }
                };
                Some(AvdLease {
                    name: name.clone(),
                    port,
                    running,
                })
            }
        };
        slot.in_use = true;
        tracing::info!(serial = %slot.descriptor.serial, "device reserved");
        Ok(Reservation {
            descriptor: slot.descriptor.clone(),
            avd,
        })
    }

    /// Frees the device. With `keep_running` an AVD keeps its console port
    /// so the next reservation reuses the live emulator.
    pub fn release(&self, reservation: &Reservation, keep_running: bool) {
        let running_port = match &reservation.avd {
            Some(lease) if keep_running => Some(lease.port),
            Some(lease) => {
                self.emulator_ports.release(lease.port);
                None
            }
            None => None,
        };
        let mut slots = self.lock();
        if let Some(slot) = slots
            .iter_mut()
            .find(|slot| slot.in_use && slot.descriptor == reservation.descriptor)
        {
            slot.in_use = false;
            slot.running_port = running_port;
            tracing::info!(serial = %slot.descriptor.serial, "device released");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capability match plus the filters only a concrete device can answer.
fn serves(device: &DeviceDescriptor, requested: &Capabilities) -> bool {
    // The app is installed per session, so any device offers the one asked for.
    let mut node = device.capabilities();
    for key in [AUT, BROWSER_NAME] {
        if let Some(value) = requested.get(key) {
            node = node.with(key, Value::from(value));
        }
    }
    if !matches(Some(&node), Some(requested)) {
        return false;
    }
    if let Some(serial) = requested.serial() {
        if device.is_emulator() || device.serial != serial {
            return false;
        }
    }
    if let Some(model) = requested.model() {
        let offered = device.model.as_deref().unwrap_or_default();
        if !offered.contains(model) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Listing(Vec<&'static str>);

    impl DeviceFinder for Listing {
        fn find_connected_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceDiscoveryError> {
            Ok(self.0.iter().copied().map(DeviceDescriptor::hardware).collect())
        }

        fn describe(&self, device: DeviceDescriptor) -> DeviceDescriptor {
            DeviceDescriptor {
                model: Some(format!("Model {}", device.serial)),
                api_level: Some("29".into()),
                screen_size: Some("1080x1920".into()),
                ..device
            }
        }
    }

    fn caps(value: serde_json::Value) -> Capabilities {
        Capabilities::from_value(value).unwrap()
    }

    fn lease(port: u16, running: bool) -> Option<AvdLease> {
        Some(AvdLease {
            name: "Pixel_API_33".to_string(),
            port,
            running,
        })
    }

    fn avd_descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            api_level: Some("33".into()),
            screen_size: Some("720x1280".into()),
            ..DeviceDescriptor::hardware("Pixel_API_33")
        }
    }

    fn store() -> DeviceStore {
        let store = DeviceStore::new(PortAllocator::new(5560, 5562));
        store.add_avd("Pixel_API_33", avd_descriptor());
        store.refresh(&Listing(vec!["hw1"])).unwrap();
        store
    }

    #[test]
    fn prefers_attached_hardware() {
        let store = store();
        let first = store.reserve(&caps(json!({"aut": "app:1"}))).unwrap();
        assert_eq!(first.serial(), "hw1");
        assert_eq!(first.avd, None);

        let second = store.reserve(&caps(json!({"aut": "app:1"}))).unwrap();
        assert_eq!(second.avd, lease(5560, false));
        assert_eq!(second.serial(), "emulator-5560");

        let err = store.reserve(&caps(json!({}))).unwrap_err();
        assert!(matches!(err, StoreError::NoDevices));
        assert!(err.to_string().starts_with("No devices are found"));
    }

    #[test]
    fn release_returns_device_and_port() {
        let store = store();
        let wanted = caps(json!({"emulator": true}));
        let reservation = store.reserve(&wanted).unwrap();
        store.release(&reservation, false);
        let again = store.reserve(&wanted).unwrap();
        assert_eq!(again.avd, lease(5560, false));
    }

    #[test]
    fn kept_emulator_is_reused_on_its_port() {
        let store = DeviceStore::new(PortAllocator::new(5560, 5590));
        store.add_avd("Pixel_API_33", avd_descriptor());
        let wanted = caps(json!({"emulator": true}));
        let first = store.reserve(&wanted).unwrap();
        store.release(&first, true);
        let again = store.reserve(&wanted).unwrap();
        assert_eq!(again.avd, lease(5560, true));
        store.release(&again, false);
        assert_eq!(store.reserve(&wanted).unwrap().avd, lease(5560, false));
    }

    #[test]
    fn filters_on_capabilities() {
        let store = store();
        assert_eq!(
            store.reserve(&caps(json!({"screenSize": "720x1280"}))).unwrap().serial(),
            "emulator-5560"
        );
        assert!(store.reserve(&caps(json!({"platformVersion": "18"}))).is_err());
        assert_eq!(
            store.reserve(&caps(json!({"model": "hw"}))).unwrap().serial(),
            "hw1"
        );
    }

    #[test]
    fn avd_config_feeds_matching() {
        let store = DeviceStore::new(PortAllocator::new(5560, 5590));
        let config = "hw.lcd.width=1080\nhw.lcd.height=2400\n\
                      image.sysdir.1=system-images/android-33/google_apis/x86_64/\n";
        store.add_avd("Pixel_6", crate::avd::describe_avd("Pixel_6", config));

        let wanted = caps(json!({"platformVersion": "33", "screenSize": "1080x2400"}));
        let reservation = store.reserve(&wanted).unwrap();
        assert_eq!(reservation.avd.as_ref().map(|lease| lease.name.as_str()), Some("Pixel_6"));
        store.release(&reservation, false);
        assert!(matches!(
            store.reserve(&caps(json!({"platformVersion": 34}))),
            Err(StoreError::NoDevices)
        ));
    }

    #[test]
    fn serial_filter_skips_emulators() {
        let store = store();
        assert!(matches!(
            store.reserve(&caps(json!({"serial": "Pixel_API_33"}))),
            Err(StoreError::NoDevices)
        ));
        assert_eq!(
            store.reserve(&caps(json!({"serial": "hw1"}))).unwrap().serial(),
            "hw1"
        );
    }

    #[test]
    fn exhausted_ports_fail_allocation() {
        let store = DeviceStore::new(PortAllocator::new(5560, 5560));
        store.add_avd("a", avd_descriptor());
        store.add_avd("b", avd_descriptor());
        store.reserve(&caps(json!({}))).unwrap();
        let err = store.reserve(&caps(json!({}))).unwrap_err();
        assert!(matches!(err, StoreError::AllocationExhausted));
        assert_eq!(CommandError::from(err).status(), wire::Status::SessionNotCreated);
    }

    #[test]
    fn refresh_drops_unplugged_free_devices_only() {
        let store = DeviceStore::new(PortAllocator::new(5560, 5590));
        store.refresh(&Listing(vec!["a", "b"])).unwrap();
        let held = store.reserve(&caps(json!({"serial": "a"}))).unwrap();
        store.refresh(&Listing(vec![])).unwrap();
        let serials: Vec<_> = store.devices().into_iter().map(|d| d.serial).collect();
        assert_eq!(serials, vec!["a"]);
        store.release(&held, false);
        assert_eq!(held.descriptor.model.as_deref(), Some("Model a"));
    }
}
