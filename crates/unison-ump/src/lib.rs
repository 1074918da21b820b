//! Universal MIDI Packet primitives for the unison broker.
//!
//! The broker transports UMP words verbatim between clients and transport
//! drivers; this crate holds the pieces both sides agree on: the timestamped
//! event type, message-type framing, SysEx7 packing, and the conversions the
//! BLE transport needs between UMP and the MIDI 1.0 byte stream.

mod event;
pub use event::{ump_message_type, ump_word_count, MessageType, UmpEvent};

pub mod sysex;
pub use sysex::{pack_sysex7, sysex7_packet_count, sysex7_status, SysEx7Status, SYSEX7_CHUNK_BYTES};

pub mod convert;
pub use convert::{midi1_to_ump, midi1_to_ump_event, ump_to_midi1};

pub mod stream;
pub use stream::decode_ble_midi;

mod clock;
pub use clock::now_nanos;
