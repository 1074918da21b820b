//! Error types for the shared ring.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ring full: {written} events written")]
    WouldBlock { written: usize },

    #[error("event of {words} payload words can never fit this ring")]
    EventTooLarge { words: usize },

    #[error("invalid ring geometry: {0}")]
    Geometry(String),

    #[error("shared memory error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
