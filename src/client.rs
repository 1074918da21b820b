//! Client-side surface: ports, receiver threads, bounded SysEx sends.
//!
//! A `MidiClient` stands where the remote process's proxy would: every
//! call goes through the controller's public interface, and event data
//! moves through the same shared rings a cross-process client would map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use unison_ring::{record_bytes, FutexStatus, SharedRing};
use unison_service::{
    ClientNotification, DeviceOpenedCallback, Error, Result, SessionController,
};
use unison_ump::sysex::pack_sysex7_message;
use unison_ump::{now_nanos, UmpEvent};

/// Total wall-time budget for one `send_sysex` call.
const SYSEX_TIMEOUT: Duration = Duration::from_millis(2000);

/// One space-wait slice inside the budget.
const WAIT_SLICE_NS: i64 = 2_000_000;

/// SysEx groups address one of 16 streams; higher port indices cannot be
/// expressed in the group nibble.
const PORT_GROUP_RANGE: u32 = 16;

/// Outcome of a bounded send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every packet was enqueued.
    Complete { events_written: usize },
    /// The 2000 ms budget expired with partial progress.
    TimedOut { events_written: usize },
}

/// Received-event callback. Event data is owned; nothing borrows the
/// ring past the callback's return.
pub type InputCallback = Arc<dyn Fn(&[UmpEvent]) + Send + Sync>;

struct InputPort {
    ring: Arc<SharedRing>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl InputPort {
    fn start(ring: Arc<SharedRing>, callback: InputCallback) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_ring = Arc::clone(&ring);
        let thread_running = Arc::clone(&running);
        let receiver = std::thread::Builder::new()
            .name("unison-recv".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    thread_ring.futex().wait_until(-1, || {
                        !thread_running.load(Ordering::Acquire) || thread_ring.peek_next()
                    });
                    if !thread_running.load(Ordering::Acquire) {
                        break;
                    }
                    let events = thread_ring.drain_to_batch(0);
                    if !events.is_empty() {
                        callback(&events);
                    }
                }
            })
            .expect("failed to spawn receiver thread");
        Self {
            ring,
            running,
            receiver: Some(receiver),
        }
    }

    fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.ring.futex().wake_exit();
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
    }
}

impl Drop for InputPort {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OutputPort {
    ring: Arc<SharedRing>,
}

impl OutputPort {
    /// Fire-and-forget enqueue. Partial writes surface as WouldBlock
    /// with the count of events that made it in.
    fn send(&self, events: &[UmpEvent]) -> Result<usize> {
        self.ring.try_write_events(events).map_err(Error::from)
    }

    /// Pack and enqueue a SysEx payload with a bounded retry budget.
    fn send_sysex(&self, group: u8, data: &[u8]) -> Result<SendOutcome> {
        let mut packets = pack_sysex7_message(group, data);
        let timestamp = now_nanos();
        for packet in &mut packets {
            packet.timestamp_ns = timestamp;
        }

        let total = packets.len();
        let start = Instant::now();
        let mut written = 0usize;

        while written < total {
            if start.elapsed() > SYSEX_TIMEOUT {
                return Ok(SendOutcome::TimedOut {
                    events_written: written,
                });
            }

            let progress = match self.ring.try_write_events(&packets[written..]) {
                Ok(n) => n,
                Err(unison_ring::Error::WouldBlock { written: n }) => n,
                Err(e) => return Err(e.into()),
            };
            written += progress;
            if written == total {
                break;
            }

            if progress == 0 {
                // One bounded slice, then re-check the wall-clock budget.
                match self.ring.wait_for_space(WAIT_SLICE_NS, record_bytes(2)) {
                    FutexStatus::Success | FutexStatus::Timeout => {}
                    FutexStatus::Error => {
                        return Err(Error::SystemError("space wait failed".into()))
                    }
                }
            }
        }

        Ok(SendOutcome::Complete {
            events_written: written,
        })
    }
}

/// A registered client session.
///
/// Dropping the handle without calling [`MidiClient::destroy`] behaves
/// like the owning process dying: the controller tears down every
/// device, port, and ring the client held.
pub struct MidiClient {
    controller: Arc<SessionController>,
    client_id: u32,
    notifications: Receiver<ClientNotification>,
    destroyed: AtomicBool,
    input_ports: Mutex<HashMap<(i64, u32), InputPort>>,
    output_ports: Mutex<HashMap<(i64, u32), OutputPort>>,
}

impl MidiClient {
    pub(crate) fn new(
        controller: Arc<SessionController>,
        client_id: u32,
        notifications: Receiver<ClientNotification>,
    ) -> Self {
        Self {
            controller,
            client_id,
            notifications,
            destroyed: AtomicBool::new(false),
            input_ports: Mutex::new(HashMap::new()),
            output_ports: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Device-change and error notifications, in service order.
    pub fn notifications(&self) -> &Receiver<ClientNotification> {
        &self.notifications
    }

    pub fn get_devices(&self) -> Vec<crate::DeviceInformation> {
        self.controller.get_devices()
    }

    pub fn get_device_ports(&self, device_id: i64) -> Result<Vec<crate::PortInformation>> {
        self.controller.get_device_ports(device_id)
    }

    pub fn open_device(&self, device_id: i64) -> Result<()> {
        self.controller.open_device(self.client_id, device_id)
    }

    /// Asynchronous BLE open; `on_opened` fires exactly once.
    pub fn open_ble_device(
        &self,
        mac: &str,
        on_opened: impl FnOnce(bool, Option<crate::DeviceInformation>) + Send + 'static,
    ) -> Result<()> {
        let callback: DeviceOpenedCallback = Box::new(on_opened);
        self.controller
            .open_ble_device(self.client_id, mac, callback)
    }

    pub fn close_device(&self, device_id: i64) -> Result<()> {
        // Local port state goes first so receiver threads stop before
        // their rings disappear service-side.
        self.input_ports
            .lock()
            .retain(|&(dev, _), _| dev != device_id);
        self.output_ports
            .lock()
            .retain(|&(dev, _), _| dev != device_id);
        self.controller.close_device(self.client_id, device_id)
    }

    /// Open an input port and start its receiver thread. Events arrive
    /// on the callback as owned copies.
    pub fn open_input_port(
        &self,
        device_id: i64,
        port_index: u32,
        callback: impl Fn(&[UmpEvent]) + Send + Sync + 'static,
    ) -> Result<()> {
        let mut ports = self.input_ports.lock();
        if ports.contains_key(&(device_id, port_index)) {
            return Err(Error::PortAlreadyOpen);
        }
        let ring = self
            .controller
            .open_input_port(self.client_id, device_id, port_index)?;
        ports.insert(
            (device_id, port_index),
            InputPort::start(ring, Arc::new(callback)),
        );
        Ok(())
    }

    pub fn close_input_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        let mut ports = self.input_ports.lock();
        let mut port = ports
            .remove(&(device_id, port_index))
            .ok_or(Error::InvalidPort)?;
        port.stop();
        self.controller
            .close_input_port(self.client_id, device_id, port_index)
    }

    pub fn open_output_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        let mut ports = self.output_ports.lock();
        if ports.contains_key(&(device_id, port_index)) {
            return Err(Error::PortAlreadyOpen);
        }
        let ring = self
            .controller
            .open_output_port(self.client_id, device_id, port_index)?;
        ports.insert((device_id, port_index), OutputPort { ring });
        Ok(())
    }

    pub fn close_output_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        self.output_ports
            .lock()
            .remove(&(device_id, port_index))
            .ok_or(Error::InvalidPort)?;
        self.controller
            .close_output_port(self.client_id, device_id, port_index)
    }

    /// Enqueue UMP events on an output port without blocking. Returns
    /// the number written; a full ring yields WouldBlock with the count.
    pub fn send(&self, device_id: i64, port_index: u32, events: &[UmpEvent]) -> Result<usize> {
        if events.is_empty() {
            return Err(Error::InvalidArg);
        }
        let ports = self.output_ports.lock();
        let port = ports
            .get(&(device_id, port_index))
            .ok_or(Error::InvalidPort)?;
        port.send(events)
    }

    /// Send a SysEx payload as Type 3 packets with a 2000 ms total
    /// budget; on expiry the outcome reports partial progress.
    pub fn send_sysex(
        &self,
        device_id: i64,
        port_index: u32,
        data: &[u8],
    ) -> Result<SendOutcome> {
        if data.is_empty() {
            return Err(Error::InvalidArg);
        }
        if port_index >= PORT_GROUP_RANGE {
            return Err(Error::InvalidPort);
        }
        let ports = self.output_ports.lock();
        let port = ports
            .get(&(device_id, port_index))
            .ok_or(Error::InvalidPort)?;
        port.send_sysex((port_index & 0x0F) as u8, data)
    }

    /// Discard events still queued on an output port.
    pub fn flush_output_port(&self, device_id: i64, port_index: u32) -> Result<()> {
        if !self
            .output_ports
            .lock()
            .contains_key(&(device_id, port_index))
        {
            return Err(Error::InvalidPort);
        }
        self.controller
            .flush_output_port(self.client_id, device_id, port_index)
    }

    /// Explicit teardown. Further calls on this handle fail with
    /// InvalidClient; dropping after destroy is a no-op.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidClient);
        }
        self.stop_receivers();
        self.controller.destroy_client(self.client_id)
    }

    fn stop_receivers(&self) {
        let mut inputs = self.input_ports.lock();
        for port in inputs.values_mut() {
            port.stop();
        }
        inputs.clear();
        drop(inputs);
        self.output_ports.lock().clear();
    }
}

impl Drop for MidiClient {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            // Peer-death path: the process went away without saying
            // goodbye; the controller reclaims everything it held.
            self.stop_receivers();
            let _ = self.controller.destroy_client(self.client_id);
        }
    }
}
