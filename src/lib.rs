//! # unison - multi-tenant MIDI 1.0/2.0 broker
//!
//! unison brokers access to physical MIDI transports (USB, Bluetooth
//! Low Energy) for multiple isolated client processes on a single host.
//! Clients enumerate devices, open ports, and exchange Universal MIDI
//! Packets through lock-free shared-memory rings with sub-millisecond
//! wake latency.
//!
//! ## Architecture
//!
//! The workspace splits along process-boundary seams:
//! - **unison-ump** - UMP events, SysEx7 packing, MIDI 1.0 byte-stream
//!   conversion, BLE MIDI stream decoding
//! - **unison-ring** - the SPSC shared-memory event ring and its futex
//!   wake primitive
//! - **unison-driver** - the transport capability trait plus the USB
//!   pass-through and BLE GATT drivers
//! - **unison-service** - device manager, connection multiplexing, and
//!   the session controller (quotas, BLE coalescing, self-unload)
//!
//! This crate wires those into a [`MidiService`] and provides the
//! client-side surface ([`MidiClient`]) with its receiver threads and
//! bounded-latency SysEx sender.
//!
//! ## Quick start
//!
//! ```ignore
//! use unison::prelude::*;
//!
//! let service = MidiService::builder()
//!     .driver(my_usb_driver)
//!     .build()?;
//!
//! let client = service.connect(uid)?;
//! let devices = client.get_devices();
//! client.open_device(devices[0].device_id)?;
//! client.open_input_port(devices[0].device_id, 0, |events| {
//!     for event in events {
//!         println!("{} words @ {}ns", event.words.len(), event.timestamp_ns);
//!     }
//! })?;
//! ```

pub use unison_driver as driver;
pub use unison_ring as ring;
pub use unison_service as service;
pub use unison_ump as ump;

pub use unison_driver::{
    DeviceInformation, DeviceKind, MacAddress, PortDirection, PortInformation, Protocol,
    TransportDriver,
};
pub use unison_ring::{Futex, FutexStatus, SharedRing, IS_PRE_EXIT};
pub use unison_service::{
    ClientNotification, DeviceChange, Error, Permissions, Result, SessionController, STATUS_OK,
};
pub use unison_ump::UmpEvent;

mod builder;
pub use builder::MidiServiceBuilder;

mod midi_service;
pub use midi_service::MidiService;

mod client;
pub use client::{MidiClient, SendOutcome};

pub mod prelude {
    pub use crate::{
        ClientNotification, DeviceChange, DeviceInformation, DeviceKind, Error, MidiClient,
        MidiService, MidiServiceBuilder, PortDirection, Protocol, Result, SendOutcome, UmpEvent,
    };
}
