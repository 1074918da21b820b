//! UMP ⇄ MIDI 1.0 byte-stream conversion for byte-oriented transports.

use smallvec::SmallVec;

use crate::sysex::{pack_sysex7_message, unpack_sysex7, SysEx7Status};
use crate::{ump_word_count, UmpEvent};

const UMP_MT_SYSTEM: u8 = 0x1;
const UMP_MT_MIDI1_VOICE: u8 = 0x2;
const UMP_MT_SYSEX7: u8 = 0x3;

const STATUS_PROG_CHANGE: u8 = 0xC0;
const STATUS_CHAN_PRESSURE: u8 = 0xD0;
const STATUS_CMD_MASK: u8 = 0xF0;

/// Data-byte count that follows a MIDI 1.0 status byte.
#[inline]
fn midi1_data_len(status: u8) -> usize {
    match status & STATUS_CMD_MASK {
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => 2,
        0xC0 | 0xD0 => 1,
        0xF0 => match status {
            0xF1 | 0xF3 => 1,
            0xF2 => 2,
            _ => 0,
        },
        _ => 0,
    }
}

/// Render UMP words back into MIDI 1.0 bytes.
///
/// Type 2 becomes a channel-voice message (two data bytes, or one for
/// program change and channel pressure), Type 1 a system message with its
/// status-specific length, and Type 3 the SysEx byte stream with `0xF0` /
/// `0xF7` framing re-attached at stream start and end. Other packet types
/// have no MIDI 1.0 rendering and are skipped.
pub fn ump_to_midi1(words: &[u32], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        let mt = ((word >> 28) & 0xF) as u8;
        let needed = ump_word_count(mt);
        if i + needed > words.len() {
            tracing::warn!(
                message_type = mt,
                "truncated UMP packet at end of batch, dropping tail"
            );
            return;
        }

        match mt {
            UMP_MT_MIDI1_VOICE => {
                let status = (word >> 16) as u8;
                let data1 = (word >> 8) as u8;
                let data2 = word as u8;
                out.push(status);
                let cmd = status & STATUS_CMD_MASK;
                if cmd == STATUS_PROG_CHANGE || cmd == STATUS_CHAN_PRESSURE {
                    out.push(data1);
                } else {
                    out.push(data1);
                    out.push(data2);
                }
            }
            UMP_MT_SYSTEM => {
                let status = (word >> 16) as u8;
                let data1 = (word >> 8) as u8;
                let data2 = word as u8;
                out.push(status);
                match midi1_data_len(status) {
                    1 => out.push(data1),
                    2 => {
                        out.push(data1);
                        out.push(data2);
                    }
                    _ => {}
                }
            }
            UMP_MT_SYSEX7 => {
                let (status, bytes) = unpack_sysex7([word, words[i + 1]]);
                if status == SysEx7Status::Complete as u8 || status == SysEx7Status::Start as u8 {
                    out.push(0xF0);
                }
                out.extend_from_slice(&bytes);
                if status == SysEx7Status::Complete as u8 || status == SysEx7Status::End as u8 {
                    out.push(0xF7);
                }
            }
            _ => {}
        }
        i += needed;
    }
}

/// Pack a canonical MIDI 1.0 byte stream into UMP words.
///
/// Channel-voice messages become Type 2, system common and real-time
/// messages Type 1, and complete `0xF0 … 0xF7` sequences Type 3 packet
/// runs. Running status is honored: data bytes without a fresh status
/// reuse the last channel-voice status. An unterminated SysEx at the end
/// of the buffer is dropped.
pub fn midi1_to_ump(group: u8, bytes: &[u8]) -> Vec<u32> {
    let group = group & 0xF;
    let mut words = Vec::new();
    let mut running_status: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        // Real-time statuses may interleave anywhere and never disturb
        // running status.
        if b >= 0xF8 {
            words.push(((UMP_MT_SYSTEM as u32) << 28) | ((group as u32) << 24) | ((b as u32) << 16));
            i += 1;
            continue;
        }

        if b == 0xF0 {
            let Some(end) = bytes[i + 1..].iter().position(|&x| x == 0xF7) else {
                tracing::warn!("unterminated SysEx in MIDI 1.0 stream, dropping");
                return words;
            };
            let payload = &bytes[i + 1..i + 1 + end];
            for event in pack_sysex7_message(group, payload) {
                words.extend_from_slice(&event.words);
            }
            running_status = None;
            i += end + 2;
            continue;
        }

        let status = if b & 0x80 != 0 {
            i += 1;
            if b < 0xF0 {
                running_status = Some(b);
            } else {
                running_status = None;
            }
            b
        } else {
            match running_status {
                Some(s) => s,
                None => {
                    tracing::warn!(byte = b, "stray data byte without running status, skipping");
                    i += 1;
                    continue;
                }
            }
        };

        let data_len = midi1_data_len(status);
        if i + data_len > bytes.len() {
            tracing::warn!(status, "truncated MIDI 1.0 message, dropping tail");
            return words;
        }
        let data1 = if data_len >= 1 { bytes[i] } else { 0 };
        let data2 = if data_len >= 2 { bytes[i + 1] } else { 0 };
        i += data_len;

        let mt = if status >= 0xF0 { UMP_MT_SYSTEM } else { UMP_MT_MIDI1_VOICE };
        words.push(
            ((mt as u32) << 28)
                | ((group as u32) << 24)
                | ((status as u32) << 16)
                | ((data1 as u32) << 8)
                | data2 as u32,
        );
    }
    words
}

/// Convenience wrapper producing a single timestamped event from a byte
/// stream, or `None` when nothing decodable was present.
pub fn midi1_to_ump_event(group: u8, bytes: &[u8], timestamp_ns: u64) -> Option<UmpEvent> {
    let words = midi1_to_ump(group, bytes);
    if words.is_empty() {
        return None;
    }
    Some(UmpEvent::new(timestamp_ns, SmallVec::from_vec(words)))
}
