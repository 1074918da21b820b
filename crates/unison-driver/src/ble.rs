//! BLE MIDI transport driver.
//!
//! Opening a BLE device is a four-stage bring-up: connect, discover
//! services, locate the MIDI characteristic, enable notifications. Only
//! after the final stage does the open callback fire with success; any
//! failure along the way tears the context down and reports failure
//! exactly once.
//!
//! The GATT stack is abstracted behind [`GattClient`]; its event threads
//! re-enter the driver through the `on_*` methods, mirroring the stack's
//! callback registration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use unison_ump::{decode_ble_midi, midi1_to_ump_event, now_nanos, ump_to_midi1, UmpEvent};

use crate::{
    redact_mac, BleOpenCallback, DeviceInformation, DeviceKind, Error, PortDirection,
    PortInformation, Protocol, Result, TransportDriver, UmpInputCallback,
};

/// Standard Bluetooth MIDI service UUID.
pub const MIDI_SERVICE_UUID: &str = "03B80E5A-EDE8-4B33-A751-6CE34EC4C700";
/// Standard Bluetooth MIDI data characteristic UUID.
pub const MIDI_CHARACTERISTIC_UUID: &str = "7772E5DB-3868-4112-A1A9-F2669D106BF3";

/// Application UUID under which the driver registers with the stack.
const BLE_MIDI_APP_UUID: &str = "00000000-0000-0000-0000-000000000001";

/// Attribute payloads past this size are rejected.
const MAX_BLE_MIDI_DATA_SIZE: usize = 512;

/// Port layout every BLE MIDI device exposes.
const OUTPUT_PORT_INDEX: u32 = 0;
const INPUT_PORT_INDEX: u32 = 1;

/// Case-insensitive comparison over the canonical ASCII UUID form.
pub fn uuid_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// A validated six-octet Bluetooth address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Accepts exactly `"AA:BB:CC:DD:EE:FF"`: 17 characters, six hex
    /// octets separated by colons, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 17 || !s.is_ascii() {
            return Err(Error::InvalidArgument(format!(
                "malformed MAC address '{}'",
                redact_mac(s)
            )));
        }
        let mut octets = [0u8; 6];
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 || part.len() != 2 {
                return Err(Error::InvalidArgument(format!(
                    "malformed MAC address '{}'",
                    redact_mac(s)
                )));
            }
            octets[i] = u8::from_str_radix(part, 16).map_err(|_| {
                Error::InvalidArgument(format!("malformed MAC address '{}'", redact_mac(s)))
            })?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Synchronous face of the platform GATT client. The stack's event
/// threads deliver results through the driver's `on_*` methods; an
/// implementation must never invoke those from inside one of these calls,
/// or the driver's device lock deadlocks.
pub trait GattClient: Send + Sync {
    /// Register an application; returns the stack-assigned client id.
    fn register(&self, app_uuid: &str) -> Result<i32>;
    fn unregister(&self, gatt_id: i32);
    fn connect(&self, gatt_id: i32, mac: &MacAddress) -> Result<()>;
    fn disconnect(&self, gatt_id: i32);
    fn search_services(&self, gatt_id: i32) -> Result<()>;
    /// True when the discovered services include `service_uuid`.
    fn has_service(&self, gatt_id: i32, service_uuid: &str) -> bool;
    fn register_notification(
        &self,
        gatt_id: i32,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<()>;
    fn write_no_response(
        &self,
        gatt_id: i32,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BleStage {
    Connecting,
    Discovering,
    Registering,
    Ready,
}

struct BleDeviceCtx {
    gatt_id: i32,
    address: String,
    stage: BleStage,
    on_open: Option<BleOpenCallback>,
    input_open: bool,
    output_open: bool,
    input_callback: Option<UmpInputCallback>,
}

impl BleDeviceCtx {
    fn info(&self) -> DeviceInformation {
        DeviceInformation {
            device_id: 0,
            driver_device_id: self.gatt_id as i64,
            kind: DeviceKind::Ble,
            protocol: Protocol::Midi10,
            address: self.address.clone(),
            product_name: String::new(),
            vendor_name: String::new(),
            ports: vec![
                PortInformation {
                    port_index: OUTPUT_PORT_INDEX,
                    name: "BLE-MIDI Out".to_string(),
                    direction: PortDirection::Output,
                    protocol: Protocol::Midi10,
                },
                PortInformation {
                    port_index: INPUT_PORT_INDEX,
                    name: "BLE-MIDI In".to_string(),
                    direction: PortDirection::Input,
                    protocol: Protocol::Midi10,
                },
            ],
        }
    }
}

pub struct BleMidiDriver {
    gatt: Arc<dyn GattClient>,
    devices: Mutex<HashMap<i32, BleDeviceCtx>>,
}

impl BleMidiDriver {
    pub fn new(gatt: Arc<dyn GattClient>) -> Self {
        Self {
            gatt,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Remove the context, release stack resources, and report failure to
    /// the pending opener if the bring-up had not completed.
    fn fail_device(&self, gatt_id: i32) {
        let ctx = self.devices.lock().remove(&gatt_id);
        self.gatt.unregister(gatt_id);
        self.gatt.disconnect(gatt_id);
        if let Some(mut ctx) = ctx {
            tracing::info!(
                address = %redact_mac(&ctx.address),
                stage = ?ctx.stage,
                "BLE bring-up failed"
            );
            if let Some(cb) = ctx.on_open.take() {
                cb(false, None);
            }
        }
    }

    /// Connection-state callback from the stack.
    pub fn on_connection_state(&self, gatt_id: i32, connected: bool, status: i32) {
        tracing::debug!(gatt_id, connected, status, "BLE connection state");
        if !connected || status != 0 {
            // Context may already be gone after an active disconnect.
            if self.devices.lock().contains_key(&gatt_id) {
                self.fail_device(gatt_id);
            }
            return;
        }

        {
            let mut devices = self.devices.lock();
            let Some(ctx) = devices.get_mut(&gatt_id) else {
                return;
            };
            ctx.stage = BleStage::Discovering;
        }
        if self.gatt.search_services(gatt_id).is_err() {
            tracing::warn!(gatt_id, "service discovery could not start");
            self.fail_device(gatt_id);
        }
    }

    /// Service-discovery completion callback from the stack.
    pub fn on_services_discovered(&self, gatt_id: i32, status: i32) {
        if status != 0 {
            tracing::warn!(gatt_id, status, "service discovery failed");
            self.fail_device(gatt_id);
            return;
        }
        if !self.gatt.has_service(gatt_id, MIDI_SERVICE_UUID) {
            tracing::warn!(gatt_id, "MIDI service not present");
            self.fail_device(gatt_id);
            return;
        }

        {
            let mut devices = self.devices.lock();
            let Some(ctx) = devices.get_mut(&gatt_id) else {
                return;
            };
            ctx.stage = BleStage::Registering;
        }
        if self
            .gatt
            .register_notification(gatt_id, MIDI_SERVICE_UUID, MIDI_CHARACTERISTIC_UUID)
            .is_err()
        {
            self.fail_device(gatt_id);
        }
    }

    /// Notification-registration completion callback from the stack.
    /// Success here is the only place a BLE open completes.
    pub fn on_notification_registered(&self, gatt_id: i32, status: i32) {
        if status != 0 {
            tracing::warn!(gatt_id, status, "notification enable failed");
            self.fail_device(gatt_id);
            return;
        }

        let completion = {
            let mut devices = self.devices.lock();
            let Some(ctx) = devices.get_mut(&gatt_id) else {
                return;
            };
            ctx.stage = BleStage::Ready;
            ctx.on_open.take().map(|cb| (cb, ctx.info()))
        };
        if let Some((cb, info)) = completion {
            tracing::info!(gatt_id, "BLE MIDI device fully online");
            cb(true, Some(info));
        }
    }

    /// Characteristic notification from the stack: one BLE attribute
    /// payload of timestamped MIDI 1.0 bytes.
    pub fn on_notification(
        &self,
        gatt_id: i32,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &[u8],
    ) {
        if !uuid_eq(service_uuid, MIDI_SERVICE_UUID)
            || !uuid_eq(characteristic_uuid, MIDI_CHARACTERISTIC_UUID)
        {
            return;
        }
        if payload.is_empty() || payload.len() > MAX_BLE_MIDI_DATA_SIZE {
            tracing::warn!(gatt_id, len = payload.len(), "dropping oversized BLE payload");
            return;
        }

        let callback = {
            let devices = self.devices.lock();
            match devices.get(&gatt_id) {
                Some(ctx) if ctx.stage == BleStage::Ready && ctx.input_open => {
                    ctx.input_callback.clone()
                }
                _ => None,
            }
        };
        let Some(callback) = callback else { return };

        let midi1 = decode_ble_midi(payload);
        let Some(event) = midi1_to_ump_event(INPUT_PORT_INDEX as u8 & 0xF, &midi1, now_nanos())
        else {
            tracing::warn!(gatt_id, "BLE payload decoded to no UMP data");
            return;
        };
        callback(std::slice::from_ref(&event));
    }
}

impl TransportDriver for BleMidiDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Ble
    }

    fn enumerate(&self) -> Vec<DeviceInformation> {
        self.devices
            .lock()
            .values()
            .filter(|ctx| ctx.stage == BleStage::Ready)
            .map(|ctx| ctx.info())
            .collect()
    }

    fn open_ble_device(&self, mac: &str, on_complete: BleOpenCallback) -> Result<()> {
        let address = MacAddress::from_str(mac)?;
        tracing::info!(address = %redact_mac(mac), "opening BLE device");

        let mut devices = self.devices.lock();
        if devices.values().any(|ctx| ctx.address == mac) {
            return Err(Error::AlreadyOpen);
        }

        let gatt_id = self.gatt.register(BLE_MIDI_APP_UUID)?;
        devices.insert(
            gatt_id,
            BleDeviceCtx {
                gatt_id,
                address: mac.to_string(),
                stage: BleStage::Connecting,
                on_open: Some(on_complete),
                input_open: false,
                output_open: false,
                input_callback: None,
            },
        );

        if let Err(e) = self.gatt.connect(gatt_id, &address) {
            tracing::warn!(address = %redact_mac(mac), "GATT connect failed to start");
            devices.remove(&gatt_id);
            self.gatt.unregister(gatt_id);
            return Err(e);
        }
        Ok(())
    }

    fn close_device(&self, driver_device_id: i64) -> Result<()> {
        let gatt_id = driver_device_id as i32;
        let ctx = self
            .devices
            .lock()
            .remove(&gatt_id)
            .ok_or(Error::DeviceNotFound(driver_device_id))?;
        self.gatt.disconnect(gatt_id);
        self.gatt.unregister(gatt_id);
        tracing::info!(address = %redact_mac(&ctx.address), "BLE device closed");
        Ok(())
    }

    fn open_input_port(
        &self,
        driver_device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()> {
        if port_index != INPUT_PORT_INDEX {
            return Err(Error::PortNotFound {
                device: driver_device_id,
                port: port_index,
            });
        }
        let mut devices = self.devices.lock();
        let ctx = devices
            .get_mut(&(driver_device_id as i32))
            .ok_or(Error::DeviceNotFound(driver_device_id))?;
        if ctx.input_open {
            return Err(Error::AlreadyOpen);
        }
        ctx.input_callback = Some(callback);
        ctx.input_open = true;
        Ok(())
    }

    fn close_input_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        if port_index != INPUT_PORT_INDEX {
            return Err(Error::PortNotFound {
                device: driver_device_id,
                port: port_index,
            });
        }
        let mut devices = self.devices.lock();
        let ctx = devices
            .get_mut(&(driver_device_id as i32))
            .ok_or(Error::DeviceNotFound(driver_device_id))?;
        if !ctx.input_open {
            return Err(Error::NotOpen);
        }
        ctx.input_callback = None;
        ctx.input_open = false;
        Ok(())
    }

    fn open_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        if port_index != OUTPUT_PORT_INDEX {
            return Err(Error::PortNotFound {
                device: driver_device_id,
                port: port_index,
            });
        }
        let mut devices = self.devices.lock();
        let ctx = devices
            .get_mut(&(driver_device_id as i32))
            .ok_or(Error::DeviceNotFound(driver_device_id))?;
        if ctx.output_open {
            return Err(Error::AlreadyOpen);
        }
        ctx.output_open = true;
        Ok(())
    }

    fn close_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        if port_index != OUTPUT_PORT_INDEX {
            return Err(Error::PortNotFound {
                device: driver_device_id,
                port: port_index,
            });
        }
        let mut devices = self.devices.lock();
        let ctx = devices
            .get_mut(&(driver_device_id as i32))
            .ok_or(Error::DeviceNotFound(driver_device_id))?;
        if !ctx.output_open {
            return Err(Error::NotOpen);
        }
        ctx.output_open = false;
        Ok(())
    }

    fn handle_ump_input(
        &self,
        driver_device_id: i64,
        port_index: u32,
        events: &[UmpEvent],
    ) -> Result<()> {
        if port_index != OUTPUT_PORT_INDEX {
            return Err(Error::PortNotFound {
                device: driver_device_id,
                port: port_index,
            });
        }
        let gatt_id = {
            let devices = self.devices.lock();
            let ctx = devices
                .get(&(driver_device_id as i32))
                .ok_or(Error::DeviceNotFound(driver_device_id))?;
            if !ctx.output_open || ctx.stage != BleStage::Ready {
                return Err(Error::NotOpen);
            }
            ctx.gatt_id
        };

        // The write happens outside the device lock; the stack call may
        // block on the controller.
        let mut midi1 = Vec::new();
        for event in events {
            midi1.clear();
            ump_to_midi1(&event.words, &mut midi1);
            if midi1.is_empty() {
                continue;
            }
            self.gatt.write_no_response(
                gatt_id,
                MIDI_SERVICE_UUID,
                MIDI_CHARACTERISTIC_UUID,
                &midi1,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct FakeGatt {
        next_id: AtomicI32,
        connects: PlMutex<Vec<i32>>,
        searches: PlMutex<Vec<i32>>,
        notifications: PlMutex<Vec<i32>>,
        writes: PlMutex<Vec<(i32, Vec<u8>)>>,
        unregistered: PlMutex<Vec<i32>>,
        has_midi_service: std::sync::atomic::AtomicBool,
    }

    impl FakeGatt {
        fn with_midi_service() -> Self {
            let gatt = Self::default();
            gatt.has_midi_service.store(true, Ordering::Relaxed);
            gatt
        }
    }

    impl GattClient for FakeGatt {
        fn register(&self, _app_uuid: &str) -> Result<i32> {
            Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        }
        fn unregister(&self, gatt_id: i32) {
            self.unregistered.lock().push(gatt_id);
        }
        fn connect(&self, gatt_id: i32, _mac: &MacAddress) -> Result<()> {
            self.connects.lock().push(gatt_id);
            Ok(())
        }
        fn disconnect(&self, _gatt_id: i32) {}
        fn search_services(&self, gatt_id: i32) -> Result<()> {
            self.searches.lock().push(gatt_id);
            Ok(())
        }
        fn has_service(&self, _gatt_id: i32, service_uuid: &str) -> bool {
            // Exercised with a lowercase UUID to prove comparisons are
            // case-insensitive at the call sites.
            uuid_eq(service_uuid, "03b80e5a-ede8-4b33-a751-6ce34ec4c700")
                && self.has_midi_service.load(Ordering::Relaxed)
        }
        fn register_notification(
            &self,
            gatt_id: i32,
            _service_uuid: &str,
            _characteristic_uuid: &str,
        ) -> Result<()> {
            self.notifications.lock().push(gatt_id);
            Ok(())
        }
        fn write_no_response(
            &self,
            gatt_id: i32,
            _service_uuid: &str,
            _characteristic_uuid: &str,
            payload: &[u8],
        ) -> Result<()> {
            self.writes.lock().push((gatt_id, payload.to_vec()));
            Ok(())
        }
    }

    fn open_result() -> (
        BleOpenCallback,
        Arc<PlMutex<Option<(bool, Option<DeviceInformation>)>>>,
    ) {
        let slot = Arc::new(PlMutex::new(None));
        let writer = Arc::clone(&slot);
        (
            Box::new(move |ok, info| {
                *writer.lock() = Some((ok, info));
            }),
            slot,
        )
    }

    fn drive_to_ready(driver: &BleMidiDriver, gatt_id: i32) {
        driver.on_connection_state(gatt_id, true, 0);
        driver.on_services_discovered(gatt_id, 0);
        driver.on_notification_registered(gatt_id, 0);
    }

    #[test]
    fn test_mac_parsing() {
        assert!(MacAddress::from_str("AA:BB:CC:DD:EE:FF").is_ok());
        assert!(MacAddress::from_str("aa:bb:cc:dd:ee:ff").is_ok());
        assert!(MacAddress::from_str("AA:BB:CC:DD:EE").is_err());
        assert!(MacAddress::from_str("AA:BB:CC:DD:EE:FF:00").is_err());
        assert!(MacAddress::from_str("AA-BB-CC-DD-EE-FF").is_err());
        assert!(MacAddress::from_str("GG:BB:CC:DD:EE:FF").is_err());
        assert!(MacAddress::from_str("").is_err());

        let mac = MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(mac.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_full_bringup_reports_success_once() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt.clone());
        let (cb, result) = open_result();

        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        assert_eq!(gatt.connects.lock().len(), 1);
        assert!(result.lock().is_none(), "must not complete before ready");

        drive_to_ready(&driver, 1);

        let (ok, info) = result.lock().take().unwrap();
        assert!(ok);
        let info = info.unwrap();
        assert_eq!(info.kind, DeviceKind::Ble);
        assert_eq!(info.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(info.ports.len(), 2);
        assert_eq!(driver.enumerate().len(), 1);
    }

    #[test]
    fn test_disconnect_during_bringup_fails_open() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt.clone());
        let (cb, result) = open_result();

        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        driver.on_connection_state(1, false, 0);

        let (ok, info) = result.lock().take().unwrap();
        assert!(!ok);
        assert!(info.is_none());
        assert!(driver.enumerate().is_empty());
        assert_eq!(gatt.unregistered.lock().len(), 1);
    }

    #[test]
    fn test_missing_midi_service_fails_open() {
        let gatt = Arc::new(FakeGatt::default()); // no MIDI service
        let driver = BleMidiDriver::new(gatt);
        let (cb, result) = open_result();

        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        driver.on_connection_state(1, true, 0);
        driver.on_services_discovered(1, 0);

        let (ok, _) = result.lock().take().unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_register_notify_failure_fails_open() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt);
        let (cb, result) = open_result();

        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        driver.on_connection_state(1, true, 0);
        driver.on_services_discovered(1, 0);
        driver.on_notification_registered(1, -1);

        let (ok, _) = result.lock().take().unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt);
        let (cb, _r) = open_result();
        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();

        let (cb2, _r2) = open_result();
        assert!(matches!(
            driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb2),
            Err(Error::AlreadyOpen)
        ));
    }

    #[test]
    fn test_malformed_mac_rejected_before_connect() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt.clone());
        let (cb, _r) = open_result();
        assert!(driver.open_ble_device("nonsense", cb).is_err());
        assert!(gatt.connects.lock().is_empty());
    }

    #[test]
    fn test_notification_flows_to_input_callback() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt);
        let (cb, _r) = open_result();
        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        drive_to_ready(&driver, 1);

        let received: Arc<PlMutex<Vec<UmpEvent>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        driver
            .open_input_port(
                1,
                INPUT_PORT_INDEX,
                Arc::new(move |events| sink.lock().extend_from_slice(events)),
            )
            .unwrap();

        // header + timestamp + note on
        driver.on_notification(
            1,
            "03b80e5a-ede8-4b33-a751-6ce34ec4c700",
            "7772e5db-3868-4112-a1a9-f2669d106bf3",
            &[0x80, 0x80, 0x90, 0x3C, 0x40],
        );

        let events = received.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].words.as_slice(), &[0x2190_3C40]);
    }

    #[test]
    fn test_egress_converts_to_midi1_bytes() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt.clone());
        let (cb, _r) = open_result();
        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        drive_to_ready(&driver, 1);
        driver.open_output_port(1, OUTPUT_PORT_INDEX).unwrap();

        let event = UmpEvent::midi1_voice(0, 0, 0x90, 0x3C, 0x40);
        driver
            .handle_ump_input(1, OUTPUT_PORT_INDEX, std::slice::from_ref(&event))
            .unwrap();

        let writes = gatt.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, vec![0x90, 0x3C, 0x40]);
    }

    #[test]
    fn test_input_port_index_enforced() {
        let gatt = Arc::new(FakeGatt::with_midi_service());
        let driver = BleMidiDriver::new(gatt);
        let (cb, _r) = open_result();
        driver.open_ble_device("AA:BB:CC:DD:EE:FF", cb).unwrap();
        drive_to_ready(&driver, 1);

        let noop: UmpInputCallback = Arc::new(|_| {});
        assert!(driver.open_input_port(1, OUTPUT_PORT_INDEX, noop).is_err());
    }
}
