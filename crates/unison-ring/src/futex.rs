//! Cross-process futex wake primitive.
//!
//! The futex word lives in the ring header, shared between processes, so
//! FUTEX_WAIT / FUTEX_WAKE are used without FUTEX_PRIVATE_FLAG. Waiters
//! never read the word for value correctness; they re-check a caller
//! predicate around every sleep, and wakers only bump or overwrite it.

use std::sync::atomic::{AtomicU32, Ordering};

use unison_ump::now_nanos;

/// Distinguished wake value stored into the word during teardown so a
/// consumer thread can tell an exit wake from a data wake.
pub const IS_PRE_EXIT: u32 = u32::MAX;

/// Outcome of a predicate wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FutexStatus {
    Success,
    Timeout,
    Error,
}

/// Handle onto a futex word in shared memory.
///
/// Copyable so teardown paths can wake a ring they no longer otherwise
/// reference.
#[derive(Clone, Copy)]
pub struct Futex {
    word: *const AtomicU32,
}

// SAFETY: the word is an atomic in a mapping that outlives every handle
// (the owning SharedRing keeps the region alive); all access goes through
// atomic operations and the futex syscall.
unsafe impl Send for Futex {}
unsafe impl Sync for Futex {}

impl Futex {
    pub(crate) fn from_word(word: &AtomicU32) -> Self {
        Self { word }
    }

    #[inline]
    fn word(&self) -> &AtomicU32 {
        // SAFETY: see Send/Sync note; the pointer stays valid for the
        // mapping's lifetime.
        unsafe { &*self.word }
    }

    /// Wake every waiter after signalling new data.
    pub fn wake_all(&self) {
        self.word().fetch_add(1, Ordering::Release);
        futex_wake(self.word(), i32::MAX);
    }

    /// Wake one waiter.
    pub fn wake_one(&self) {
        self.word().fetch_add(1, Ordering::Release);
        futex_wake(self.word(), 1);
    }

    /// Teardown wake: store the exit marker, then wake everyone. The
    /// woken side is expected to check its run flag before sleeping
    /// again.
    pub fn wake_exit(&self) {
        self.word().store(IS_PRE_EXIT, Ordering::Release);
        futex_wake(self.word(), i32::MAX);
    }

    /// Sleep until `predicate` returns true or `timeout_ns` elapses
    /// (negative = wait forever).
    ///
    /// The predicate is evaluated before every sleep and after every
    /// wake; spurious wakes are absorbed.
    pub fn wait_until(&self, timeout_ns: i64, predicate: impl Fn() -> bool) -> FutexStatus {
        let deadline = if timeout_ns < 0 {
            None
        } else {
            Some(now_nanos().saturating_add(timeout_ns as u64))
        };

        loop {
            if predicate() {
                return FutexStatus::Success;
            }
            let observed = self.word().load(Ordering::Acquire);
            // The waker bumps the word before FUTEX_WAKE; re-checking
            // here closes the window between load and sleep.
            if predicate() {
                return FutexStatus::Success;
            }

            let remaining_ns = match deadline {
                None => -1,
                Some(d) => {
                    let now = now_nanos();
                    if now >= d {
                        return if predicate() {
                            FutexStatus::Success
                        } else {
                            FutexStatus::Timeout
                        };
                    }
                    (d - now) as i64
                }
            };

            match futex_wait(self.word(), observed, remaining_ns) {
                WaitResult::Woken | WaitResult::ValueChanged => {}
                WaitResult::TimedOut => {
                    return if predicate() {
                        FutexStatus::Success
                    } else {
                        FutexStatus::Timeout
                    };
                }
                WaitResult::Failed => return FutexStatus::Error,
            }
        }
    }
}

enum WaitResult {
    Woken,
    ValueChanged,
    TimedOut,
    Failed,
}

fn futex_wait(word: &AtomicU32, expected: u32, timeout_ns: i64) -> WaitResult {
    let timeout = libc::timespec {
        tv_sec: (timeout_ns / 1_000_000_000) as libc::time_t,
        tv_nsec: (timeout_ns % 1_000_000_000) as libc::c_long,
    };
    let timeout_ptr: *const libc::timespec = if timeout_ns < 0 {
        std::ptr::null()
    } else {
        &timeout
    };

    // SAFETY: word points at a valid u32 in shared memory; the timespec
    // outlives the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            timeout_ptr,
            std::ptr::null::<u32>(),
            0u32,
        )
    };
    if rc == 0 {
        return WaitResult::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => WaitResult::ValueChanged,
        Some(libc::EINTR) => WaitResult::Woken,
        Some(libc::ETIMEDOUT) => WaitResult::TimedOut,
        err => {
            tracing::warn!(?err, "futex wait failed");
            WaitResult::Failed
        }
    }
}

fn futex_wake(word: &AtomicU32, count: i32) {
    // SAFETY: word points at a valid u32 in shared memory.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            count,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        )
    };
    if rc < 0 {
        tracing::warn!("futex wake failed");
    }
}
