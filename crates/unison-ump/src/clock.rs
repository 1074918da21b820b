//! Monotonic clock shared by both sides of a ring.
//!
//! Event timestamps must agree across processes, so `Instant` (opaque,
//! process-local arithmetic only) is not usable here; CLOCK_MONOTONIC
//! nanoseconds are the wire format.

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Current CLOCK_MONOTONIC time in nanoseconds.
pub fn now_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for clock_gettime.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        tracing::warn!("clock_gettime(CLOCK_MONOTONIC) failed");
        return 0;
    }
    ts.tv_sec as u64 * NANOS_PER_SEC + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
        assert!(a > 0);
    }
}
