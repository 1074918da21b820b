//! Per-port connection objects.
//!
//! One connection exists per open (device, port) pair and multiplexes
//! every subscribed client: input fans one driver callback out into all
//! client rings; output fans many client rings into one driver call from
//! a dedicated worker thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use unison_driver::UmpInputCallback;
use unison_ring::SharedRing;
use unison_ump::UmpEvent;

use crate::DeviceManager;

/// Upper bound on records pulled per worker iteration per ring.
const PACKETS_BATCH: usize = 256;

/// One futex slice while parked between drains.
const WAIT_SLICE_NS: i64 = 2_000_000;

/// Driver-open input port shared by several client rings.
///
/// The service is the producer on every subscribed ring. Input
/// backpressure is drop-and-record: a full ring keeps its oldest events,
/// the shortfall lands in `overflow_count`, and the client is woken
/// regardless so it can drain.
pub struct InputConnection {
    device_id: i64,
    port_index: u32,
    rings: Mutex<HashMap<u32, Arc<SharedRing>>>,
}

impl InputConnection {
    pub fn new(device_id: i64, port_index: u32) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            port_index,
            rings: Mutex::new(HashMap::new()),
        })
    }

    /// The callback handed to the driver when the port opens.
    pub fn input_callback(self: &Arc<Self>) -> UmpInputCallback {
        let connection = Arc::clone(self);
        Arc::new(move |events| connection.dispatch(events))
    }

    /// Copy a received batch into every subscribed ring.
    pub fn dispatch(&self, events: &[UmpEvent]) {
        let rings = self.rings.lock();
        for (client_id, ring) in rings.iter() {
            match ring.try_write_events(events) {
                Ok(_) => {}
                Err(unison_ring::Error::WouldBlock { written }) => {
                    let dropped = (events.len() - written) as u64;
                    ring.add_overflow(dropped);
                    // Still wake the consumer so it drains what is there.
                    ring.futex().wake_all();
                    tracing::debug!(
                        client_id,
                        device_id = self.device_id,
                        port = self.port_index,
                        dropped,
                        "input ring overflow"
                    );
                }
                Err(e) => {
                    tracing::warn!(client_id, "input dispatch failed: {e}");
                }
            }
        }
    }

    pub fn add_client(&self, client_id: u32, ring: Arc<SharedRing>) {
        self.rings.lock().insert(client_id, ring);
    }

    pub fn remove_client(&self, client_id: u32) -> Option<Arc<SharedRing>> {
        self.rings.lock().remove(&client_id)
    }

    pub fn has_client(&self, client_id: u32) -> bool {
        self.rings.lock().contains_key(&client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.rings.lock().is_empty()
    }

    pub fn client_ring(&self, client_id: u32) -> Option<Arc<SharedRing>> {
        self.rings.lock().get(&client_id).cloned()
    }
}

/// Driver-open output port fed by several client rings.
///
/// Exactly one worker thread per connection regardless of client count.
/// The worker polls every subscribed ring once per iteration for
/// round-robin fairness and parks in bounded futex slices when idle, so
/// membership changes and shutdown are observed within a slice.
pub struct OutputConnection {
    device_id: i64,
    port_index: u32,
    shared: Arc<OutputShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct OutputShared {
    device_id: i64,
    port_index: u32,
    running: AtomicBool,
    rings: Mutex<HashMap<u32, Arc<SharedRing>>>,
}

impl OutputConnection {
    pub fn new(device_id: i64, port_index: u32) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            port_index,
            shared: Arc::new(OutputShared {
                device_id,
                port_index,
                running: AtomicBool::new(false),
                rings: Mutex::new(HashMap::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Spawn the drain worker. Called once, right after the driver port
    /// opens.
    pub fn start(&self, manager: Arc<DeviceManager>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        *worker = Some(
            std::thread::Builder::new()
                .name(format!("unison-out-{}-{}", self.device_id, self.port_index))
                .spawn(move || shared.run(manager))
                .expect("failed to spawn output worker"),
        );
    }

    /// Stop and join the worker. Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        for ring in self.shared.rings.lock().values() {
            ring.futex().wake_exit();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    pub fn add_client(&self, client_id: u32, ring: Arc<SharedRing>) {
        self.shared.rings.lock().insert(client_id, ring);
    }

    pub fn remove_client(&self, client_id: u32) -> Option<Arc<SharedRing>> {
        self.shared.rings.lock().remove(&client_id)
    }

    pub fn has_client(&self, client_id: u32) -> bool {
        self.shared.rings.lock().contains_key(&client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.shared.rings.lock().is_empty()
    }

    pub fn client_ring(&self, client_id: u32) -> Option<Arc<SharedRing>> {
        self.shared.rings.lock().get(&client_id).cloned()
    }

    /// Discard everything queued on one client's ring.
    pub fn flush_client(&self, client_id: u32) -> bool {
        let ring = self.shared.rings.lock().get(&client_id).cloned();
        match ring {
            Some(ring) => {
                let discarded = ring.drain_to_batch(0).len();
                if discarded > 0 {
                    tracing::debug!(client_id, discarded, "flushed output ring");
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for OutputConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl OutputShared {
    fn run(self: Arc<Self>, manager: Arc<DeviceManager>) {
        tracing::debug!(
            device_id = self.device_id,
            port = self.port_index,
            "output worker started"
        );
        while self.running.load(Ordering::Acquire) {
            let rings: Vec<Arc<SharedRing>> = self.rings.lock().values().cloned().collect();
            if rings.is_empty() {
                std::thread::park_timeout(std::time::Duration::from_millis(2));
                continue;
            }

            let mut drained_any = false;
            for ring in &rings {
                let events = ring.drain_to_batch(PACKETS_BATCH);
                if events.is_empty() {
                    continue;
                }
                drained_any = true;
                if let Err(e) =
                    manager.handle_ump_input(self.device_id, self.port_index, &events)
                {
                    tracing::warn!(
                        device_id = self.device_id,
                        port = self.port_index,
                        "output dispatch failed: {e}"
                    );
                }
            }

            if !drained_any {
                let running = &self.running;
                rings[0].futex().wait_until(WAIT_SLICE_NS, || {
                    !running.load(Ordering::Acquire) || rings.iter().any(|r| r.peek_next())
                });
            }
        }
        tracing::debug!(
            device_id = self.device_id,
            port = self.port_index,
            "output worker stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unison_driver::mock::{usb_device, MockDriver};
    use unison_driver::DeviceKind;

    fn ring(name: &str) -> Arc<SharedRing> {
        Arc::new(
            SharedRing::create(&format!("conn_{}_{}", name, std::process::id()), 4096).unwrap(),
        )
    }

    fn voice(ts: u64, word: u32) -> UmpEvent {
        UmpEvent::new(ts, [word].as_ref())
    }

    #[test]
    fn test_input_fanout_identical_bytes() {
        let connection = InputConnection::new(1, 0);
        let ring_a = ring("fan_a");
        let ring_b = ring("fan_b");
        connection.add_client(1, ring_a.clone());
        connection.add_client(2, ring_b.clone());

        let batch = vec![voice(100, 0x2090_3C40)];
        connection.dispatch(&batch);

        assert_eq!(ring_a.drain_to_batch(0), batch);
        assert_eq!(ring_b.drain_to_batch(0), batch);
    }

    #[test]
    fn test_input_overflow_counts_and_keeps_oldest() {
        let connection = InputConnection::new(1, 0);
        let full = ring("overflow");
        connection.add_client(1, full.clone());

        let burst: Vec<UmpEvent> = (0..400).map(|i| voice(i, i as u32)).collect();
        connection.dispatch(&burst);

        // 4096-byte ring holds 256 one-word records.
        assert_eq!(full.overflow_count(), 400 - 256);
        let drained = full.drain_to_batch(0);
        assert_eq!(drained.len(), 256);
        assert_eq!(drained[0].words[0], 0);
    }

    #[test]
    fn test_input_membership() {
        let connection = InputConnection::new(1, 0);
        assert!(connection.is_empty());
        connection.add_client(7, ring("member"));
        assert!(connection.has_client(7));
        assert!(!connection.has_client(8));
        assert!(connection.remove_client(7).is_some());
        assert!(connection.is_empty());
        assert!(connection.remove_client(7).is_none());
    }

    fn output_setup(name: &str) -> (Arc<OutputConnection>, Arc<MockDriver>, i64) {
        let manager = DeviceManager::new();
        let driver = MockDriver::new(DeviceKind::Usb);
        manager.register_driver(driver.clone());
        driver.attach_device(usb_device(50, name));
        manager.refresh_devices();
        let device_id = manager.get_devices()[0].device_id;

        let connection = OutputConnection::new(device_id, 1);
        connection.start(manager);
        (connection, driver, device_id)
    }

    #[test]
    fn test_output_worker_drains_to_driver() {
        let (connection, driver, _device) = output_setup("drain");
        let client_ring = ring("out_drain");
        connection.add_client(1, client_ring.clone());

        let batch: Vec<UmpEvent> = (0..5).map(|i| voice(i, 0x2090_3C40 + i as u32)).collect();
        client_ring.try_write_events(&batch).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let sent = driver.ump_output(50, 1);
            if sent.len() == 5 {
                assert_eq!(sent, batch);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never drained");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        connection.stop();
    }

    #[test]
    fn test_output_worker_multiplexes_two_rings() {
        let (connection, driver, _device) = output_setup("mux");
        let ring_a = ring("mux_a");
        let ring_b = ring("mux_b");
        connection.add_client(1, ring_a.clone());
        connection.add_client(2, ring_b.clone());

        ring_a.try_write_events(&[voice(1, 0x2090_0001)]).unwrap();
        ring_b.try_write_events(&[voice(2, 0x2090_0002)]).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let sent = driver.ump_output(50, 1);
            if sent.len() == 2 {
                let words: std::collections::HashSet<u32> =
                    sent.iter().map(|e| e.words[0]).collect();
                assert!(words.contains(&0x2090_0001));
                assert!(words.contains(&0x2090_0002));
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never drained both");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        connection.stop();
    }

    #[test]
    fn test_output_stop_is_bounded_and_idempotent() {
        let (connection, _driver, _device) = output_setup("stop");
        connection.add_client(1, ring("out_stop"));

        let start = std::time::Instant::now();
        connection.stop();
        connection.stop();
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_flush_discards_queued_events() {
        let (connection, driver, _device) = output_setup("flush");
        connection.stop(); // keep the worker from racing the flush
        let client_ring = ring("out_flush");
        connection.add_client(1, client_ring.clone());

        client_ring
            .try_write_events(&[voice(1, 0xAA), voice(2, 0xBB)])
            .unwrap();
        assert!(connection.flush_client(1));
        assert!(client_ring.drain_to_batch(0).is_empty());
        assert!(driver.ump_output(50, 1).is_empty());
        assert!(!connection.flush_client(99));
    }
}
