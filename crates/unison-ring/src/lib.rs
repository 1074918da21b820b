//! Shared-memory event transport for the unison broker.
//!
//! One ring per (client, port) attachment: a single-producer /
//! single-consumer byte ring whose header and data area live in a region
//! mapped by both the service and the client process. Records are
//! variable-length UMP events; the wake primitive is a cross-process
//! futex word in the ring header.
//!
//! Role discipline is by construction, not by type: the service writes on
//! input rings and the client writes on output rings. Exactly one
//! producer and one consumer may touch a ring at a time.

pub mod error;
pub use error::{Error, Result};

mod futex;
pub use futex::{Futex, FutexStatus, IS_PRE_EXIT};

mod region;
pub use region::SharedRegion;

mod ring;
pub use ring::{record_bytes, SharedRing, RECORD_HEADER_BYTES};
