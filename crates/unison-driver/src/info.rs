//! Device and port descriptions shared across transports.

/// Transport kind. One driver exists per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Usb,
    Ble,
}

/// Native protocol spoken by a device endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Midi10,
    Midi20,
}

/// Input means data flows from the device to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInformation {
    pub port_index: u32,
    pub name: String,
    pub direction: PortDirection,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInformation {
    /// Service-assigned stable id; zero until the device manager maps it.
    pub device_id: i64,
    /// Identity within the owning driver.
    pub driver_device_id: i64,
    pub kind: DeviceKind,
    pub protocol: Protocol,
    /// Transport address (MAC for BLE, bus path for USB); may be empty.
    pub address: String,
    pub product_name: String,
    pub vendor_name: String,
    pub ports: Vec<PortInformation>,
}

impl DeviceInformation {
    pub fn port(&self, port_index: u32) -> Option<&PortInformation> {
        self.ports.iter().find(|p| p.port_index == port_index)
    }
}
