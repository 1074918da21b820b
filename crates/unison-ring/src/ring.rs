//! The SPSC event ring.
//!
//! Layout: one cacheline of header, then a power-of-two byte area. Read
//! and write indices are monotone 64-bit counters; the byte position of
//! an index is `index & (capacity - 1)`. Records may straddle the wrap
//! point.
//!
//! Record framing: `u32 payload_words | u64 timestamp_ns | words…`,
//! little-endian, 12 + 4·n bytes. The producer copies the whole record
//! before publishing `write_index` with a release store, so a consumer
//! that observes the index also observes the bytes.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use smallvec::SmallVec;

use unison_ump::UmpEvent;

use crate::{Error, Futex, FutexStatus, Result, SharedRegion};

/// Fixed bytes preceding each record's payload words.
pub const RECORD_HEADER_BYTES: usize = 12;

/// Wire footprint of a record with `words` payload words.
#[inline]
pub fn record_bytes(words: usize) -> usize {
    RECORD_HEADER_BYTES + words * 4
}

const HEADER_BYTES: usize = 64;
const MIN_CAPACITY: usize = 4096; // one page

#[repr(C, align(64))]
struct RingHeader {
    /// Written once during create, before the ring is shared.
    capacity: AtomicU32,
    futex_word: AtomicU32,
    read_index: AtomicU64,
    write_index: AtomicU64,
    overflow_count: AtomicU64,
}

/// A shared-memory SPSC ring carrying timestamped UMP events.
///
/// Exactly one producer and one consumer, fixed at attachment time by the
/// session protocol: the service produces on input rings and consumes on
/// output rings; the client does the opposite.
pub struct SharedRing {
    region: SharedRegion,
}

// SAFETY: index fields are atomics; data-area bytes between read_index
// and write_index are written only by the producer before the release
// publish and read only by the consumer after the acquire load.
unsafe impl Send for SharedRing {}
unsafe impl Sync for SharedRing {}

impl SharedRing {
    /// Create a ring with a data area of `capacity` bytes (power of two,
    /// at least one page). The backing file is owned by the creator.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() || capacity < MIN_CAPACITY {
            return Err(Error::Geometry(format!(
                "capacity {capacity} must be a power of two and at least {MIN_CAPACITY}"
            )));
        }
        let region = SharedRegion::create(name, HEADER_BYTES + capacity)?;
        let ring = Self { region };
        ring.header().capacity.store(capacity as u32, Ordering::Release);
        Ok(ring)
    }

    /// Attach to an existing ring by name.
    pub fn open(name: &str) -> Result<Self> {
        let region = SharedRegion::open(name)?;
        region.require(HEADER_BYTES)?;
        let ring = Self { region };
        let capacity = ring.capacity();
        if !capacity.is_power_of_two() || capacity < MIN_CAPACITY {
            return Err(Error::Geometry(format!(
                "mapped ring '{name}' has invalid capacity {capacity}"
            )));
        }
        ring.region.require(HEADER_BYTES + capacity)?;
        Ok(ring)
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: the header starts at the region base, which is
        // page-aligned and therefore 64-byte aligned; every field is an
        // atomic, so shared references suffice for all access.
        unsafe { &*(self.region.as_ptr() as *const RingHeader) }
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn capacity(&self) -> usize {
        self.header().capacity.load(Ordering::Relaxed) as usize
    }

    #[inline]
    fn mask(&self) -> u64 {
        self.capacity() as u64 - 1
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: region is at least HEADER_BYTES + capacity long.
        unsafe { self.region.as_ptr().add(HEADER_BYTES) }
    }

    /// Copy `bytes` into the data area at logical position `at`,
    /// splitting across the wrap point when needed.
    fn copy_in(&self, at: u64, bytes: &[u8]) {
        let cap = self.capacity();
        let pos = (at & self.mask()) as usize;
        let first = bytes.len().min(cap - pos);
        // SAFETY: producer-exclusive range [write_index, write_index+len)
        // inside the data area.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr().add(pos), first);
            if first < bytes.len() {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(first),
                    self.data_ptr(),
                    bytes.len() - first,
                );
            }
        }
    }

    /// Copy out of the data area at logical position `at`.
    fn copy_out(&self, at: u64, out: &mut [u8]) {
        let cap = self.capacity();
        let pos = (at & self.mask()) as usize;
        let first = out.len().min(cap - pos);
        // SAFETY: consumer-exclusive range [read_index, write_index).
        unsafe {
            std::ptr::copy_nonoverlapping(self.data_ptr().add(pos), out.as_mut_ptr(), first);
            if first < out.len() {
                std::ptr::copy_nonoverlapping(
                    self.data_ptr(),
                    out.as_mut_ptr().add(first),
                    out.len() - first,
                );
            }
        }
    }

    /// Enqueue as many whole events as fit. Producer side only.
    ///
    /// Each event is all-or-nothing. Returns `Ok(n)` when every event was
    /// written, `Err(WouldBlock { written })` when the ring filled first.
    /// Wakes the futex after at least one event went in. Never blocks.
    pub fn try_write_events(&self, events: &[UmpEvent]) -> Result<usize> {
        let header = self.header();
        let capacity = self.capacity() as u64;
        let read = header.read_index.load(Ordering::Acquire);
        let mut write = header.write_index.load(Ordering::Relaxed);
        let mut written = 0;

        for event in events {
            let record = record_bytes(event.words.len()) as u64;
            if record > capacity {
                if written > 0 {
                    header.write_index.store(write, Ordering::Release);
                    self.futex().wake_all();
                }
                return Err(Error::EventTooLarge {
                    words: event.words.len(),
                });
            }
            if record > capacity - (write - read) {
                break;
            }

            self.copy_in(write, &(event.words.len() as u32).to_le_bytes());
            self.copy_in(write + 4, &event.timestamp_ns.to_le_bytes());
            for (k, word) in event.words.iter().enumerate() {
                self.copy_in(write + (RECORD_HEADER_BYTES + k * 4) as u64, &word.to_le_bytes());
            }
            write += record;
            written += 1;
        }

        if written > 0 {
            header.write_index.store(write, Ordering::Release);
            self.futex().wake_all();
        }
        if written == events.len() {
            Ok(written)
        } else {
            Err(Error::WouldBlock { written })
        }
    }

    /// True when a complete record is visible to the consumer.
    pub fn peek_next(&self) -> bool {
        let header = self.header();
        let read = header.read_index.load(Ordering::Relaxed);
        let write = header.write_index.load(Ordering::Acquire);
        // The producer publishes only whole records.
        write - read >= RECORD_HEADER_BYTES as u64
    }

    /// Consume up to `max` records (0 = unbounded). Consumer side only.
    ///
    /// `read_index` advances once at the end with a release store, then
    /// the futex is woken so producers waiting for space make progress.
    pub fn drain_to_batch(&self, max: usize) -> Vec<UmpEvent> {
        let header = self.header();
        let read = header.read_index.load(Ordering::Relaxed);
        let write = header.write_index.load(Ordering::Acquire);

        let mut events = Vec::new();
        let mut pos = read;
        while pos < write && (max == 0 || events.len() < max) {
            let mut len_buf = [0u8; 4];
            self.copy_out(pos, &mut len_buf);
            let words = u32::from_le_bytes(len_buf) as usize;
            let record = record_bytes(words) as u64;
            if record > write - pos {
                tracing::warn!(
                    ring = self.name(),
                    words,
                    "corrupt record length, abandoning drain"
                );
                pos = write;
                break;
            }

            let mut ts_buf = [0u8; 8];
            self.copy_out(pos + 4, &mut ts_buf);

            let mut payload: SmallVec<[u32; 4]> = SmallVec::with_capacity(words);
            for k in 0..words {
                let mut word_buf = [0u8; 4];
                self.copy_out(pos + (RECORD_HEADER_BYTES + k * 4) as u64, &mut word_buf);
                payload.push(u32::from_le_bytes(word_buf));
            }
            events.push(UmpEvent::new(u64::from_le_bytes(ts_buf), payload));
            pos += record;
        }

        if pos != read {
            header.read_index.store(pos, Ordering::Release);
            self.futex().wake_all();
        }
        events
    }

    /// Producer-side inverse of the consumer wait: sleep until at least
    /// `min_bytes` are free or the timeout elapses (negative = forever).
    pub fn wait_for_space(&self, timeout_ns: i64, min_bytes: usize) -> FutexStatus {
        let header = self.header();
        let capacity = self.capacity() as u64;
        self.futex().wait_until(timeout_ns, || {
            let read = header.read_index.load(Ordering::Acquire);
            let write = header.write_index.load(Ordering::Relaxed);
            capacity - (write - read) >= min_bytes as u64
        })
    }

    /// Bytes currently free for the producer.
    pub fn free_bytes(&self) -> usize {
        let header = self.header();
        let read = header.read_index.load(Ordering::Acquire);
        let write = header.write_index.load(Ordering::Relaxed);
        (self.capacity() as u64 - (write - read)) as usize
    }

    /// Wake handle for direct use on teardown.
    pub fn futex(&self) -> Futex {
        Futex::from_word(&self.header().futex_word)
    }

    /// Record dropped events on the producer path.
    pub fn add_overflow(&self, dropped: u64) {
        self.header()
            .overflow_count
            .fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn overflow_count(&self) -> u64 {
        self.header().overflow_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("SharedRing")
            .field("name", &self.name())
            .field("capacity", &self.capacity())
            .field("read_index", &header.read_index.load(Ordering::Relaxed))
            .field("write_index", &header.write_index.load(Ordering::Relaxed))
            .field(
                "overflow_count",
                &header.overflow_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}
