//! Transport drivers for the unison broker.
//!
//! The service drives hardware through the object-safe [`TransportDriver`]
//! capability: enumerate, open/close device, open/close port, push UMP
//! out. Two concrete drivers exist - USB (a thin pass-through over the
//! vendor [`UsbHostInterface`]) and BLE (a four-stage GATT bring-up over
//! [`GattClient`]). A scriptable [`MockDriver`] backs the service tests.

use std::sync::Arc;

use unison_ump::UmpEvent;

pub mod error;
pub use error::{Error, Result};

mod info;
pub use info::{DeviceInformation, DeviceKind, PortDirection, PortInformation, Protocol};

pub mod ble;
pub use ble::{BleMidiDriver, GattClient, MacAddress, MIDI_CHARACTERISTIC_UUID, MIDI_SERVICE_UUID};

pub mod usb;
pub use usb::{UsbHostInterface, UsbMidiDriver};

pub mod mock;
pub use mock::MockDriver;

/// Input delivery from a transport. Event data is valid only for the
/// duration of the call; receivers copy what they keep.
pub type UmpInputCallback = Arc<dyn Fn(&[UmpEvent]) + Send + Sync>;

/// Completion for an asynchronous BLE open. Fires exactly once.
pub type BleOpenCallback = Box<dyn FnOnce(bool, Option<DeviceInformation>) + Send>;

/// Abstract per-transport capability. All operations are synchronous
/// except `open_ble_device`, which completes through its callback.
pub trait TransportDriver: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Snapshot of currently attached devices.
    fn enumerate(&self) -> Vec<DeviceInformation>;

    /// USB transports only; BLE devices open through the address variant.
    fn open_device(&self, driver_device_id: i64) -> Result<()> {
        let _ = driver_device_id;
        Err(Error::Unsupported)
    }

    /// BLE transports only. Initiates the asynchronous connect.
    fn open_ble_device(&self, mac: &str, on_complete: BleOpenCallback) -> Result<()> {
        let _ = (mac, on_complete);
        Err(Error::Unsupported)
    }

    fn close_device(&self, driver_device_id: i64) -> Result<()>;

    fn open_input_port(
        &self,
        driver_device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()>;

    fn close_input_port(&self, driver_device_id: i64, port_index: u32) -> Result<()>;

    fn open_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()>;

    fn close_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()>;

    /// Push UMP events to hardware.
    fn handle_ump_input(
        &self,
        driver_device_id: i64,
        port_index: u32,
        events: &[UmpEvent],
    ) -> Result<()>;
}

/// Mask the middle octets of a MAC address for log output.
pub fn redact_mac(mac: &str) -> String {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return "**:**:**:**:**:**".to_string();
    }
    format!("{}:**:**:**:**:{}", parts[0], parts[5])
}
