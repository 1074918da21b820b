//! SysEx7 (UMP Type 3, 64-bit) packing.
//!
//! A SysEx byte stream is carried as a sequence of two-word packets, six
//! payload bytes per packet. The `0xF0`/`0xF7` framing bytes are not part
//! of the packed payload.

use smallvec::SmallVec;

use crate::UmpEvent;

/// Payload bytes per SysEx7 packet.
pub const SYSEX7_CHUNK_BYTES: usize = 6;

const UMP_TYPE_3: u32 = 0x3;

/// Packet position within a SysEx stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SysEx7Status {
    Complete = 0,
    Start = 1,
    Continue = 2,
    End = 3,
}

/// Status for packet `index` of `total` packets.
#[inline]
pub fn sysex7_status(index: usize, total: usize) -> SysEx7Status {
    if total == 1 {
        SysEx7Status::Complete
    } else if index == 0 {
        SysEx7Status::Start
    } else if index + 1 == total {
        SysEx7Status::End
    } else {
        SysEx7Status::Continue
    }
}

/// Number of packets needed for `len` payload bytes.
#[inline]
pub fn sysex7_packet_count(len: usize) -> usize {
    len.div_ceil(SYSEX7_CHUNK_BYTES)
}

/// Pack up to six payload bytes into one two-word SysEx7 packet.
///
/// Word 0: `[0x3][group][status][nbytes][byte0][byte1]`, nibbles then bytes.
/// Word 1: `[byte2][byte3][byte4][byte5]`.
pub fn pack_sysex7(group: u8, status: SysEx7Status, bytes: &[u8]) -> [u32; 2] {
    debug_assert!(bytes.len() <= SYSEX7_CHUNK_BYTES);
    let nbytes = bytes.len().min(SYSEX7_CHUNK_BYTES);
    let byte_at = |i: usize| -> u32 { bytes.get(i).copied().unwrap_or(0) as u32 };

    let word0 = (UMP_TYPE_3 << 28)
        | ((group as u32 & 0xF) << 24)
        | ((status as u32) << 20)
        | ((nbytes as u32) << 16)
        | (byte_at(0) << 8)
        | byte_at(1);
    let word1 = (byte_at(2) << 24) | (byte_at(3) << 16) | (byte_at(4) << 8) | byte_at(5);
    [word0, word1]
}

/// Pack a whole SysEx payload into a packet sequence, one event per packet.
/// Timestamps are left at zero; senders stamp on enqueue.
pub fn pack_sysex7_message(group: u8, payload: &[u8]) -> Vec<UmpEvent> {
    let total = sysex7_packet_count(payload.len());
    let mut events = Vec::with_capacity(total);
    for (index, chunk) in payload.chunks(SYSEX7_CHUNK_BYTES).enumerate() {
        let words = pack_sysex7(group, sysex7_status(index, total), chunk);
        events.push(UmpEvent::new(0, SmallVec::from_slice(&words)));
    }
    events
}

/// Unpack one SysEx7 packet into `(status, payload bytes)`.
pub fn unpack_sysex7(words: [u32; 2]) -> (u8, SmallVec<[u8; 6]>) {
    let status = ((words[0] >> 20) & 0xF) as u8;
    let nbytes = (((words[0] >> 16) & 0xF) as usize).min(SYSEX7_CHUNK_BYTES);
    let raw = [
        (words[0] >> 8) as u8,
        words[0] as u8,
        (words[1] >> 24) as u8,
        (words[1] >> 16) as u8,
        (words[1] >> 8) as u8,
        words[1] as u8,
    ];
    (status, SmallVec::from_slice(&raw[..nbytes]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_sequence() {
        assert_eq!(sysex7_status(0, 1), SysEx7Status::Complete);
        assert_eq!(sysex7_status(0, 3), SysEx7Status::Start);
        assert_eq!(sysex7_status(1, 3), SysEx7Status::Continue);
        assert_eq!(sysex7_status(2, 3), SysEx7Status::End);
    }

    #[test]
    fn test_packet_count() {
        assert_eq!(sysex7_packet_count(0), 0);
        assert_eq!(sysex7_packet_count(1), 1);
        assert_eq!(sysex7_packet_count(6), 1);
        assert_eq!(sysex7_packet_count(7), 2);
        assert_eq!(sysex7_packet_count(6000), 1000);
    }

    #[test]
    fn test_pack_complete_packet_layout() {
        let words = pack_sysex7(0x3, SysEx7Status::Complete, &[0x7E, 0x09, 0x01]);
        // [0x3][group=3][status=0][nbytes=3][0x7E][0x09]
        assert_eq!(words[0], 0x3303_7E09);
        assert_eq!(words[1], 0x0100_0000);
    }

    #[test]
    fn test_pack_full_chunk() {
        let words = pack_sysex7(0, SysEx7Status::Start, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(words[0], 0x3016_0102);
        assert_eq!(words[1], 0x0304_0506);
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let payload = [0x11, 0x22, 0x33, 0x44];
        let words = pack_sysex7(0x5, SysEx7Status::End, &payload);
        let (status, bytes) = unpack_sysex7(words);
        assert_eq!(status, SysEx7Status::End as u8);
        assert_eq!(bytes.as_slice(), &payload);
    }

    #[test]
    fn test_message_statuses_over_sequence() {
        let payload: Vec<u8> = (0..13).collect(); // 3 packets: 6 + 6 + 1
        let events = pack_sysex7_message(0, &payload);
        assert_eq!(events.len(), 3);
        let status_of = |e: &UmpEvent| ((e.words[0] >> 20) & 0xF) as u8;
        assert_eq!(status_of(&events[0]), SysEx7Status::Start as u8);
        assert_eq!(status_of(&events[1]), SysEx7Status::Continue as u8);
        assert_eq!(status_of(&events[2]), SysEx7Status::End as u8);
        // Last packet carries the single trailing byte.
        assert_eq!((events[2].words[0] >> 16) & 0xF, 1);
    }

    #[test]
    fn test_single_packet_message_is_complete() {
        let events = pack_sysex7_message(2, &[0x7D]);
        assert_eq!(events.len(), 1);
        assert_eq!(((events[0].words[0] >> 20) & 0xF) as u8, SysEx7Status::Complete as u8);
        assert_eq!((events[0].words[0] >> 24) & 0xF, 2);
    }
}
