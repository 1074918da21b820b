//! Scriptable driver for service tests.
//!
//! Records every call, lets tests inject hotplug, input batches, forced
//! failures, and manually-completed BLE opens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use unison_ump::UmpEvent;

use crate::{
    BleOpenCallback, DeviceInformation, DeviceKind, Error, Result, TransportDriver,
    UmpInputCallback,
};

#[derive(Default)]
struct CallLog {
    open_device: Vec<i64>,
    close_device: Vec<i64>,
    open_input_port: Vec<(i64, u32)>,
    close_input_port: Vec<(i64, u32)>,
    open_output_port: Vec<(i64, u32)>,
    close_output_port: Vec<(i64, u32)>,
    ump_out: Vec<(i64, u32, Vec<UmpEvent>)>,
}

pub struct MockDriver {
    kind: DeviceKind,
    devices: Mutex<Vec<DeviceInformation>>,
    log: Mutex<CallLog>,
    input_callbacks: Mutex<HashMap<(i64, u32), UmpInputCallback>>,
    pending_ble: Mutex<Vec<(String, BleOpenCallback)>>,
    fail_next_open: AtomicBool,
    next_ble_driver_id: Mutex<i64>,
}

impl MockDriver {
    pub fn new(kind: DeviceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            devices: Mutex::new(Vec::new()),
            log: Mutex::new(CallLog::default()),
            input_callbacks: Mutex::new(HashMap::new()),
            pending_ble: Mutex::new(Vec::new()),
            fail_next_open: AtomicBool::new(false),
            next_ble_driver_id: Mutex::new(9000),
        })
    }

    /// Make a device visible to the next enumeration.
    pub fn attach_device(&self, info: DeviceInformation) {
        self.devices.lock().push(info);
    }

    /// Remove a device from enumeration.
    pub fn detach_device(&self, driver_device_id: i64) {
        self.devices
            .lock()
            .retain(|d| d.driver_device_id != driver_device_id);
    }

    /// The next `open_device` call fails with a transport error.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::Release);
    }

    /// Deliver an input batch as the hardware would.
    pub fn push_input(&self, driver_device_id: i64, port_index: u32, events: &[UmpEvent]) {
        let callback = self
            .input_callbacks
            .lock()
            .get(&(driver_device_id, port_index))
            .cloned();
        if let Some(callback) = callback {
            callback(events);
        }
    }

    /// Number of in-flight BLE opens (gatt connects issued, not completed).
    pub fn pending_ble_count(&self) -> usize {
        self.pending_ble.lock().len()
    }

    /// Complete every pending BLE open for `mac` with one outcome; the
    /// device becomes enumerable on success. Returns how many completions
    /// fired. Callbacks run outside the mock's locks, as a real stack's
    /// would.
    pub fn complete_ble(&self, mac: &str, success: bool) -> usize {
        let matched: Vec<BleOpenCallback> = {
            let mut pending = self.pending_ble.lock();
            let (matched, remaining): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(addr, _)| addr.as_str() == mac);
            *pending = remaining;
            matched.into_iter().map(|(_, cb)| cb).collect()
        };

        let fired = matched.len();
        for cb in matched {
            let info = if success {
                let driver_id = {
                    let mut next = self.next_ble_driver_id.lock();
                    *next += 1;
                    *next
                };
                let info = DeviceInformation {
                    device_id: 0,
                    driver_device_id: driver_id,
                    kind: DeviceKind::Ble,
                    protocol: crate::Protocol::Midi10,
                    address: mac.to_string(),
                    product_name: String::new(),
                    vendor_name: String::new(),
                    ports: vec![
                        crate::PortInformation {
                            port_index: 0,
                            name: "BLE-MIDI Out".into(),
                            direction: crate::PortDirection::Output,
                            protocol: crate::Protocol::Midi10,
                        },
                        crate::PortInformation {
                            port_index: 1,
                            name: "BLE-MIDI In".into(),
                            direction: crate::PortDirection::Input,
                            protocol: crate::Protocol::Midi10,
                        },
                    ],
                };
                self.devices.lock().push(info.clone());
                Some(info)
            } else {
                None
            };
            cb(success, info);
        }
        fired
    }

    pub fn open_device_calls(&self, driver_device_id: i64) -> usize {
        self.log
            .lock()
            .open_device
            .iter()
            .filter(|&&id| id == driver_device_id)
            .count()
    }

    pub fn close_device_calls(&self, driver_device_id: i64) -> usize {
        self.log
            .lock()
            .close_device
            .iter()
            .filter(|&&id| id == driver_device_id)
            .count()
    }

    pub fn open_input_port_calls(&self, driver_device_id: i64, port_index: u32) -> usize {
        self.log
            .lock()
            .open_input_port
            .iter()
            .filter(|&&c| c == (driver_device_id, port_index))
            .count()
    }

    pub fn close_input_port_calls(&self, driver_device_id: i64, port_index: u32) -> usize {
        self.log
            .lock()
            .close_input_port
            .iter()
            .filter(|&&c| c == (driver_device_id, port_index))
            .count()
    }

    pub fn open_output_port_calls(&self, driver_device_id: i64, port_index: u32) -> usize {
        self.log
            .lock()
            .open_output_port
            .iter()
            .filter(|&&c| c == (driver_device_id, port_index))
            .count()
    }

    pub fn close_output_port_calls(&self, driver_device_id: i64, port_index: u32) -> usize {
        self.log
            .lock()
            .close_output_port
            .iter()
            .filter(|&&c| c == (driver_device_id, port_index))
            .count()
    }

    /// Events pushed out through `handle_ump_input`, flattened.
    pub fn ump_output(&self, driver_device_id: i64, port_index: u32) -> Vec<UmpEvent> {
        self.log
            .lock()
            .ump_out
            .iter()
            .filter(|(id, port, _)| *id == driver_device_id && *port == port_index)
            .flat_map(|(_, _, events)| events.iter().cloned())
            .collect()
    }
}

impl TransportDriver for MockDriver {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn enumerate(&self) -> Vec<DeviceInformation> {
        self.devices.lock().clone()
    }

    fn open_device(&self, driver_device_id: i64) -> Result<()> {
        self.log.lock().open_device.push(driver_device_id);
        if self.fail_next_open.swap(false, Ordering::AcqRel) {
            return Err(Error::Transport("scripted failure".into()));
        }
        if !self
            .devices
            .lock()
            .iter()
            .any(|d| d.driver_device_id == driver_device_id)
        {
            return Err(Error::DeviceNotFound(driver_device_id));
        }
        Ok(())
    }

    fn open_ble_device(&self, mac: &str, on_complete: BleOpenCallback) -> Result<()> {
        mac.parse::<crate::MacAddress>()?;
        self.pending_ble.lock().push((mac.to_string(), on_complete));
        Ok(())
    }

    fn close_device(&self, driver_device_id: i64) -> Result<()> {
        self.log.lock().close_device.push(driver_device_id);
        Ok(())
    }

    fn open_input_port(
        &self,
        driver_device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()> {
        self.log
            .lock()
            .open_input_port
            .push((driver_device_id, port_index));
        self.input_callbacks
            .lock()
            .insert((driver_device_id, port_index), callback);
        Ok(())
    }

    fn close_input_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.log
            .lock()
            .close_input_port
            .push((driver_device_id, port_index));
        self.input_callbacks
            .lock()
            .remove(&(driver_device_id, port_index));
        Ok(())
    }

    fn open_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.log
            .lock()
            .open_output_port
            .push((driver_device_id, port_index));
        Ok(())
    }

    fn close_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.log
            .lock()
            .close_output_port
            .push((driver_device_id, port_index));
        Ok(())
    }

    fn handle_ump_input(
        &self,
        driver_device_id: i64,
        port_index: u32,
        events: &[UmpEvent],
    ) -> Result<()> {
        self.log
            .lock()
            .ump_out
            .push((driver_device_id, port_index, events.to_vec()));
        Ok(())
    }
}

/// A plain USB-style device description for tests.
pub fn usb_device(driver_device_id: i64, name: &str) -> DeviceInformation {
    DeviceInformation {
        device_id: 0,
        driver_device_id,
        kind: DeviceKind::Usb,
        protocol: crate::Protocol::Midi10,
        address: String::new(),
        product_name: name.to_string(),
        vendor_name: "Test".to_string(),
        ports: vec![
            crate::PortInformation {
                port_index: 0,
                name: "In".into(),
                direction: crate::PortDirection::Input,
                protocol: crate::Protocol::Midi10,
            },
            crate::PortInformation {
                port_index: 1,
                name: "Out".into(),
                direction: crate::PortDirection::Output,
                protocol: crate::Protocol::Midi10,
            },
        ],
    }
}
