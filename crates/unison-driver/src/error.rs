//! Error types for transport drivers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device {0} not found")]
    DeviceNotFound(i64),

    #[error("port {port} not found on device {device}")]
    PortNotFound { device: i64, port: u32 },

    #[error("already open")]
    AlreadyOpen,

    #[error("not open")]
    NotOpen,

    #[error("operation unsupported by this transport")]
    Unsupported,

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
