//! Timestamped UMP events and message-type framing.

use smallvec::SmallVec;

/// UMP message types the broker routes. The service never interprets
/// channel-voice content; the type nibble only decides word counts and
/// which transport-side conversion applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Type 0: Utility (1 word)
    Utility,
    /// Type 1: System Common / Real Time (1 word)
    System,
    /// Type 2: MIDI 1.0 Channel Voice (1 word)
    Midi1Voice,
    /// Type 3: 7-bit SysEx (2 words)
    SysEx7,
    /// Type 4: MIDI 2.0 Channel Voice (2 words)
    Midi2Voice,
    /// Type 5: 8-bit data (4 words)
    Data128,
    /// Types 0xD and 0xF: extended / stream (4 words)
    Extended(u8),
    /// Reserved type nibbles
    Reserved(u8),
}

/// Word count for a UMP message-type nibble.
#[inline]
pub fn ump_word_count(mt: u8) -> usize {
    match mt & 0xF {
        0x0..=0x2 => 1,
        0x3 | 0x4 => 2,
        0x5 | 0xD | 0xF => 4,
        _ => 1,
    }
}

/// Classify the leading word of a packet.
#[inline]
pub fn ump_message_type(word0: u32) -> MessageType {
    let mt = ((word0 >> 28) & 0xF) as u8;
    match mt {
        0x0 => MessageType::Utility,
        0x1 => MessageType::System,
        0x2 => MessageType::Midi1Voice,
        0x3 => MessageType::SysEx7,
        0x4 => MessageType::Midi2Voice,
        0x5 => MessageType::Data128,
        0xD | 0xF => MessageType::Extended(mt),
        other => MessageType::Reserved(other),
    }
}

/// One UMP event as it crosses the shared ring: a monotonic nanosecond
/// timestamp and the packet words. Payloads are at most four words for
/// every defined message type, so the words stay inline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UmpEvent {
    pub timestamp_ns: u64,
    pub words: SmallVec<[u32; 4]>,
}

impl UmpEvent {
    pub fn new(timestamp_ns: u64, words: impl Into<SmallVec<[u32; 4]>>) -> Self {
        Self {
            timestamp_ns,
            words: words.into(),
        }
    }

    /// A single-word MIDI 1.0 channel-voice packet (Type 2).
    pub fn midi1_voice(timestamp_ns: u64, group: u8, status: u8, data1: u8, data2: u8) -> Self {
        let word = (0x2u32 << 28)
            | ((group as u32 & 0xF) << 24)
            | ((status as u32) << 16)
            | ((data1 as u32) << 8)
            | data2 as u32;
        Self::new(timestamp_ns, [word].as_ref())
    }

    /// Message type of the leading word, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        self.words.first().map(|&w| ump_message_type(w))
    }

    /// Byte footprint of this event's payload on the wire.
    #[inline]
    pub fn payload_bytes(&self) -> usize {
        self.words.len() * 4
    }
}
