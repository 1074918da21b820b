//! Service core of the unison broker.
//!
//! The [`SessionController`] is the single mutator of the session graph:
//! clients, device-client contexts, quotas, BLE open coalescing, and the
//! deferred self-unload timer. Below it sit the [`DeviceManager`] (stable
//! device ids over per-driver enumeration) and the connection objects
//! that multiplex client rings onto driver ports.

pub mod status;
pub use status::{Error, Result, STATUS_OK};

mod client;
pub use client::ClientNotification;

mod connection;
pub use connection::{InputConnection, OutputConnection};

mod device_manager;
pub use device_manager::{DeviceChange, DeviceChangeListener, DeviceManager};

mod permission;
pub use permission::{AllowAll, DenyBluetooth, Permissions};

mod unload;
pub use unload::{UnloadHandler, UnloadTimer};

mod controller;
pub use controller::{
    DeviceOpenedCallback, SessionController, MAX_CLIENTS, MAX_CLIENTS_PER_APP,
    MAX_DEVICES_PER_CLIENT, MAX_PORTS_PER_CLIENT, UNLOAD_DELAY_DEFAULT_MS,
};
