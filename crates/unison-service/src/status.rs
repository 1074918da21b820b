//! Service status codes.
//!
//! The numeric values are wire contract shared with remote peers and must
//! not change.

use thiserror::Error;

pub const STATUS_OK: i32 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArg,

    #[error("ipc failure")]
    IpcFailure,

    #[error("invalid client")]
    InvalidClient,

    #[error("invalid device handle")]
    InvalidDeviceHandle,

    #[error("invalid port")]
    InvalidPort,

    #[error("would block ({written} events written)")]
    WouldBlock { written: u32 },

    #[error("timed out")]
    Timeout,

    #[error("too many open devices")]
    TooManyOpenDevices,

    #[error("too many open ports")]
    TooManyOpenPorts,

    #[error("device already open")]
    DeviceAlreadyOpen,

    #[error("port already open")]
    PortAlreadyOpen,

    #[error("too many clients")]
    TooManyClients,

    #[error("permission denied")]
    PermissionDenied,

    #[error("service died")]
    ServiceDied,

    #[error("system error: {0}")]
    SystemError(String),
}

impl Error {
    /// Wire status code.
    pub const fn code(&self) -> i32 {
        match self {
            Error::InvalidArg => 35_500_001,
            Error::IpcFailure => 35_500_002,
            Error::InvalidClient => 35_500_003,
            Error::InvalidDeviceHandle => 35_500_004,
            Error::InvalidPort => 35_500_005,
            Error::WouldBlock { .. } => 35_500_006,
            Error::Timeout => 35_500_007,
            Error::TooManyOpenDevices => 35_500_008,
            Error::TooManyOpenPorts => 35_500_009,
            Error::DeviceAlreadyOpen => 35_500_010,
            Error::PortAlreadyOpen => 35_500_011,
            Error::TooManyClients => 35_500_012,
            Error::PermissionDenied => 35_500_013,
            Error::ServiceDied => 35_500_014,
            Error::SystemError(_) => 35_500_100,
        }
    }
}

impl From<unison_driver::Error> for Error {
    fn from(e: unison_driver::Error) -> Self {
        match e {
            unison_driver::Error::InvalidArgument(_) => Error::InvalidArg,
            unison_driver::Error::DeviceNotFound(_) => Error::InvalidDeviceHandle,
            unison_driver::Error::PortNotFound { .. } => Error::InvalidPort,
            unison_driver::Error::AlreadyOpen => Error::DeviceAlreadyOpen,
            unison_driver::Error::NotOpen => Error::InvalidPort,
            unison_driver::Error::Unsupported => Error::InvalidArg,
            unison_driver::Error::Transport(msg) => Error::SystemError(msg),
        }
    }
}

impl From<unison_ring::Error> for Error {
    fn from(e: unison_ring::Error) -> Self {
        match e {
            unison_ring::Error::WouldBlock { written } => Error::WouldBlock {
                written: written as u32,
            },
            unison_ring::Error::EventTooLarge { .. } => Error::InvalidArg,
            other => Error::SystemError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
