//! Deferred self-unload.
//!
//! When the last client leaves, the service arms a timer instead of
//! exiting immediately; a client arriving within the delay cancels it.
//! One background worker sleeps on a condition variable per armed timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub type UnloadHandler = Arc<dyn Fn() + Send + Sync>;

pub struct UnloadTimer {
    delay_ms: u64,
    handler: UnloadHandler,
    pending: Arc<AtomicBool>,
    sync: Arc<(Mutex<()>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UnloadTimer {
    pub fn new(delay_ms: u64, handler: UnloadHandler) -> Self {
        Self {
            delay_ms,
            handler,
            pending: Arc::new(AtomicBool::new(false)),
            sync: Arc::new((Mutex::new(()), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// Arm the timer. No-op when already pending.
    pub fn schedule(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let delay = self.delay_ms;
        let pending = Arc::clone(&self.pending);
        let sync = Arc::clone(&self.sync);
        let handler = Arc::clone(&self.handler);
        *worker = Some(
            std::thread::Builder::new()
                .name("unison-unload".to_string())
                .spawn(move || {
                    tracing::info!(delay_ms = delay, "unload timer armed");
                    let (lock, cv) = &*sync;
                    let mut guard = lock.lock();
                    let timed_out = cv
                        .wait_for(&mut guard, Duration::from_millis(delay))
                        .timed_out();
                    drop(guard);
                    if timed_out && pending.swap(false, Ordering::AcqRel) {
                        tracing::info!("unload timer fired, requesting shutdown");
                        handler();
                    } else {
                        tracing::info!("unload timer cancelled");
                    }
                })
                .expect("failed to spawn unload worker"),
        );
    }

    /// Disarm a pending timer.
    pub fn cancel(&self) {
        if self.pending.swap(false, Ordering::AcqRel) {
            // Take and release the mutex so the worker is either not yet
            // waiting or already inside wait_for when we notify.
            drop(self.sync.0.lock());
            self.sync.1.notify_all();
            tracing::info!("pending unload cancelled");
        }
    }
}

impl Drop for UnloadTimer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
