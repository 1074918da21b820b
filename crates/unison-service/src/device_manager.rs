//! Device manager: one address space over all transport drivers.
//!
//! Each driver enumerates devices under its own id scheme; the manager
//! assigns stable service-wide device ids, diffs enumeration snapshots
//! for hotplug, and routes per-device operations to the owning driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;

use unison_driver::{
    BleOpenCallback, DeviceInformation, DeviceKind, PortDirection, PortInformation,
    TransportDriver, UmpInputCallback,
};
use unison_ump::UmpEvent;

use crate::{Error, Result};

/// Hotplug notification to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceChange {
    Added,
    Removed,
}

/// Receives hotplug events. Invoked outside the manager's locks.
pub struct DeviceChangeListener(pub Box<dyn Fn(DeviceChange, DeviceInformation) + Send + Sync>);

struct DeviceRecord {
    kind: DeviceKind,
    driver_device_id: i64,
    info: DeviceInformation,
}

pub struct DeviceManager {
    drivers: Mutex<HashMap<DeviceKind, Arc<dyn TransportDriver>>>,
    devices: DashMap<i64, DeviceRecord>,
    /// Hardware identity to service id; entries persist across detach so
    /// re-attachment of the same identity keeps its id.
    identity_map: Mutex<HashMap<(DeviceKind, i64), i64>>,
    next_device_id: AtomicI64,
    listener: ArcSwapOption<DeviceChangeListener>,
}

impl DeviceManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drivers: Mutex::new(HashMap::new()),
            devices: DashMap::new(),
            identity_map: Mutex::new(HashMap::new()),
            next_device_id: AtomicI64::new(1),
            listener: ArcSwapOption::empty(),
        })
    }

    /// Install the driver for its transport kind. Exactly one driver per
    /// kind; a second registration replaces the first.
    pub fn register_driver(&self, driver: Arc<dyn TransportDriver>) {
        let kind = driver.kind();
        if self.drivers.lock().insert(kind, driver).is_some() {
            tracing::warn!(?kind, "replacing registered driver");
        }
    }

    pub fn set_listener(&self, listener: DeviceChangeListener) {
        self.listener.store(Some(Arc::new(listener)));
    }

    fn driver_for(&self, kind: DeviceKind) -> Result<Arc<dyn TransportDriver>> {
        self.drivers
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::SystemError(format!("no driver for {kind:?}")))
    }

    fn resolve(&self, device_id: i64) -> Result<(Arc<dyn TransportDriver>, i64)> {
        let record = self
            .devices
            .get(&device_id)
            .ok_or(Error::InvalidDeviceHandle)?;
        let driver = self.driver_for(record.kind)?;
        Ok((driver, record.driver_device_id))
    }

    /// Assign (or recall) the stable service id for a hardware identity.
    fn assign_device_id(&self, kind: DeviceKind, driver_device_id: i64) -> i64 {
        let mut identities = self.identity_map.lock();
        *identities
            .entry((kind, driver_device_id))
            .or_insert_with(|| self.next_device_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, change: DeviceChange, info: DeviceInformation) {
        if let Some(listener) = self.listener.load_full() {
            (listener.0)(change, info);
        }
    }

    /// Pull fresh enumerations from every driver, diff against the
    /// current table, and fan out ADDED / REMOVED events.
    pub fn refresh_devices(&self) {
        let drivers: Vec<Arc<dyn TransportDriver>> =
            self.drivers.lock().values().cloned().collect();

        let mut added = Vec::new();
        let mut removed = Vec::new();

        for driver in drivers {
            let kind = driver.kind();
            let snapshot = driver.enumerate();
            let seen: std::collections::HashSet<i64> =
                snapshot.iter().map(|d| d.driver_device_id).collect();

            for mut info in snapshot {
                let device_id = self.assign_device_id(kind, info.driver_device_id);
                if !self.devices.contains_key(&device_id) {
                    info.device_id = device_id;
                    self.devices.insert(
                        device_id,
                        DeviceRecord {
                            kind,
                            driver_device_id: info.driver_device_id,
                            info: info.clone(),
                        },
                    );
                    tracing::info!(device_id, ?kind, name = %info.product_name, "device attached");
                    added.push(info);
                }
            }

            let gone: Vec<i64> = self
                .devices
                .iter()
                .filter(|r| r.kind == kind && !seen.contains(&r.driver_device_id))
                .map(|r| *r.key())
                .collect();
            for device_id in gone {
                if let Some((_, record)) = self.devices.remove(&device_id) {
                    tracing::info!(device_id, ?kind, "device detached");
                    removed.push(record.info);
                }
            }
        }

        for info in added {
            self.emit(DeviceChange::Added, info);
        }
        for info in removed {
            self.emit(DeviceChange::Removed, info);
        }
    }

    pub fn get_devices(&self) -> Vec<DeviceInformation> {
        self.devices.iter().map(|r| r.info.clone()).collect()
    }

    pub fn device_info(&self, device_id: i64) -> Result<DeviceInformation> {
        self.devices
            .get(&device_id)
            .map(|r| r.info.clone())
            .ok_or(Error::InvalidDeviceHandle)
    }

    pub fn get_device_ports(&self, device_id: i64) -> Result<Vec<PortInformation>> {
        Ok(self.device_info(device_id)?.ports)
    }

    fn require_port(&self, device_id: i64, port_index: u32, direction: PortDirection) -> Result<()> {
        let info = self.device_info(device_id)?;
        match info.port(port_index) {
            Some(port) if port.direction == direction => Ok(()),
            _ => Err(Error::InvalidPort),
        }
    }

    pub fn open_device(&self, device_id: i64) -> Result<()> {
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.open_device(driver_id)?;
        Ok(())
    }

    pub fn close_device(&self, device_id: i64) -> Result<()> {
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.close_device(driver_id)?;
        // A closed BLE link is gone from the bus; drop its record so a
        // later open goes through bring-up again.
        let is_ble = self
            .devices
            .get(&device_id)
            .map(|r| r.kind == DeviceKind::Ble)
            .unwrap_or(false);
        if is_ble {
            self.devices.remove(&device_id);
        }
        Ok(())
    }

    /// Initiate an async BLE open. The completion receives device info
    /// with the stable service id already assigned.
    pub fn open_ble_device(
        self: &Arc<Self>,
        mac: &str,
        on_complete: BleOpenCallback,
    ) -> Result<()> {
        let driver = self.driver_for(DeviceKind::Ble)?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let wrapped: BleOpenCallback = Box::new(move |success, info| {
            let mapped = match (success, info, weak.upgrade()) {
                (true, Some(info), Some(manager)) => Some(manager.adopt_ble_device(info)),
                _ => None,
            };
            on_complete(mapped.is_some(), mapped);
        });
        driver.open_ble_device(mac, wrapped)?;
        Ok(())
    }

    /// Record a freshly brought-up BLE device and return its final info.
    fn adopt_ble_device(&self, mut info: DeviceInformation) -> DeviceInformation {
        let device_id = self.assign_device_id(DeviceKind::Ble, info.driver_device_id);
        info.device_id = device_id;
        self.devices.insert(
            device_id,
            DeviceRecord {
                kind: DeviceKind::Ble,
                driver_device_id: info.driver_device_id,
                info: info.clone(),
            },
        );
        tracing::info!(device_id, "BLE device online");
        info
    }

    pub fn open_input_port(
        &self,
        device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()> {
        self.require_port(device_id, port_index, PortDirection::Input)?;
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.open_input_port(driver_id, port_index, callback)?;
        Ok(())
    }

    pub fn close_input_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.close_input_port(driver_id, port_index)?;
        Ok(())
    }

    pub fn open_output_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        self.require_port(device_id, port_index, PortDirection::Output)?;
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.open_output_port(driver_id, port_index)?;
        Ok(())
    }

    pub fn close_output_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.close_output_port(driver_id, port_index)?;
        Ok(())
    }

    pub fn handle_ump_input(
        &self,
        device_id: i64,
        port_index: u32,
        events: &[UmpEvent],
    ) -> Result<()> {
        let (driver, driver_id) = self.resolve(device_id)?;
        driver.handle_ump_input(driver_id, port_index, events)?;
        Ok(())
    }
}
