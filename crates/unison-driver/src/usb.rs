//! USB transport driver: a synchronous pass-through to the vendor host
//! interface. The interface owns hotplug detection and port transfer;
//! this driver only translates between the broker's capability surface
//! and the vendor calls.

use std::sync::Arc;

use unison_ump::UmpEvent;

use crate::{DeviceInformation, DeviceKind, Result, TransportDriver, UmpInputCallback};

/// Vendor USB MIDI host interface. Mirrors the hardware service contract;
/// replaceable for tests.
pub trait UsbHostInterface: Send + Sync {
    fn device_list(&self) -> Vec<DeviceInformation>;
    fn open_device(&self, device_id: i64) -> Result<()>;
    fn close_device(&self, device_id: i64) -> Result<()>;
    fn open_input_port(
        &self,
        device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()>;
    fn close_input_port(&self, device_id: i64, port_index: u32) -> Result<()>;
    fn open_output_port(&self, device_id: i64, port_index: u32) -> Result<()>;
    fn close_output_port(&self, device_id: i64, port_index: u32) -> Result<()>;
    fn send_messages(&self, device_id: i64, port_index: u32, events: &[UmpEvent]) -> Result<()>;
}

pub struct UsbMidiDriver {
    host: Arc<dyn UsbHostInterface>,
}

impl UsbMidiDriver {
    pub fn new(host: Arc<dyn UsbHostInterface>) -> Self {
        Self { host }
    }
}

impl TransportDriver for UsbMidiDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Usb
    }

    fn enumerate(&self) -> Vec<DeviceInformation> {
        self.host.device_list()
    }

    fn open_device(&self, driver_device_id: i64) -> Result<()> {
        self.host.open_device(driver_device_id)
    }

    fn close_device(&self, driver_device_id: i64) -> Result<()> {
        self.host.close_device(driver_device_id)
    }

    fn open_input_port(
        &self,
        driver_device_id: i64,
        port_index: u32,
        callback: UmpInputCallback,
    ) -> Result<()> {
        self.host.open_input_port(driver_device_id, port_index, callback)
    }

    fn close_input_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.host.close_input_port(driver_device_id, port_index)
    }

    fn open_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.host.open_output_port(driver_device_id, port_index)
    }

    fn close_output_port(&self, driver_device_id: i64, port_index: u32) -> Result<()> {
        self.host.close_output_port(driver_device_id, port_index)
    }

    fn handle_ump_input(
        &self,
        driver_device_id: i64,
        port_index: u32,
        events: &[UmpEvent],
    ) -> Result<()> {
        self.host.send_messages(driver_device_id, port_index, events)
    }
}
