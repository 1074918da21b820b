//! The session controller: single mutator of the session graph.
//!
//! One coarse lock guards the client table, device-client contexts,
//! BLE coalescing state, and per-client resource accounting. Driver
//! calls that can re-enter the controller (device close, which may fire
//! device-change callbacks) run after the lock is released; the state is
//! fully mutated first.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use unison_driver::{redact_mac, DeviceInformation, MacAddress, PortInformation};
use unison_ring::SharedRing;

use crate::client::{ClientHandle, ClientNotification};
use crate::connection::{InputConnection, OutputConnection};
use crate::unload::{UnloadHandler, UnloadTimer};
use crate::{DeviceChange, DeviceChangeListener, DeviceManager, Error, Permissions, Result};

/// Service-wide client cap.
pub const MAX_CLIENTS: usize = 8;
/// Clients one application uid may hold.
pub const MAX_CLIENTS_PER_APP: usize = 2;
/// Devices one client may hold open.
pub const MAX_DEVICES_PER_CLIENT: usize = 16;
/// Port attachments one client may hold, inputs and outputs combined.
pub const MAX_PORTS_PER_CLIENT: usize = 64;

/// Default self-unload delay after the last client leaves.
pub const UNLOAD_DELAY_DEFAULT_MS: u64 = 60_000;

/// Completion for `open_ble_device`. Fires exactly once; `device` is set
/// only on success and carries the stable service device id.
pub type DeviceOpenedCallback = Box<dyn FnOnce(bool, Option<DeviceInformation>) + Send>;

struct PendingBleOpen {
    client_id: u32,
    reply: DeviceOpenedCallback,
}

#[derive(Default)]
struct ClientResourceInfo {
    uid: u32,
    open_devices: HashSet<i64>,
    open_port_count: u32,
}

struct DeviceClientContext {
    clients: HashSet<u32>,
    inputs: HashMap<u32, Arc<InputConnection>>,
    outputs: HashMap<u32, Arc<OutputConnection>>,
}

impl DeviceClientContext {
    fn new(clients: HashSet<u32>) -> Self {
        Self {
            clients,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// Stop worker threads before the context goes away.
    fn teardown(&mut self) {
        for connection in self.outputs.values() {
            connection.stop();
        }
        self.inputs.clear();
        self.outputs.clear();
    }
}

#[derive(Default)]
struct SessionState {
    clients: HashMap<u32, ClientHandle>,
    contexts: HashMap<i64, DeviceClientContext>,
    /// MAC -> device id, populated only after a successful bring-up.
    active_ble: HashMap<String, i64>,
    /// MAC -> FIFO of waiting openers; non-empty only while one connect
    /// is in flight for that address.
    pending_ble: HashMap<String, Vec<PendingBleOpen>>,
    resources: HashMap<u32, ClientResourceInfo>,
    app_clients: HashMap<u32, HashSet<u32>>,
    next_client_id: u32,
}

impl SessionState {
    fn allocate_client_id(&mut self) -> u32 {
        loop {
            self.next_client_id = self.next_client_id.wrapping_add(1);
            if self.next_client_id == 0 {
                continue;
            }
            if !self.clients.contains_key(&self.next_client_id) {
                return self.next_client_id;
            }
        }
    }

    fn require_client(&self, client_id: u32) -> Result<u32> {
        self.clients
            .get(&client_id)
            .map(|c| c.uid)
            .ok_or(Error::InvalidClient)
    }

    fn require_membership(&self, client_id: u32, device_id: i64) -> Result<()> {
        let context = self
            .contexts
            .get(&device_id)
            .ok_or(Error::InvalidDeviceHandle)?;
        if !context.clients.contains(&client_id) {
            return Err(Error::SystemError(format!(
                "client {client_id} has not opened device {device_id}"
            )));
        }
        Ok(())
    }

    fn port_count(&self, client_id: u32) -> u32 {
        self.resources
            .get(&client_id)
            .map(|r| r.open_port_count)
            .unwrap_or(0)
    }

    fn bump_port_count(&mut self, client_id: u32) {
        if let Some(resources) = self.resources.get_mut(&client_id) {
            resources.open_port_count += 1;
        }
    }

    fn snapshot_notifiers(&self) -> Vec<ClientHandle> {
        self.clients
            .values()
            .map(|c| ClientHandle {
                uid: c.uid,
                notifications: c.notifications.clone(),
            })
            .collect()
    }
}

pub struct SessionController {
    manager: Arc<DeviceManager>,
    permissions: Arc<dyn Permissions>,
    state: Mutex<SessionState>,
    unload: UnloadTimer,
    ring_capacity: usize,
}

impl SessionController {
    pub fn new(
        manager: Arc<DeviceManager>,
        permissions: Arc<dyn Permissions>,
        unload_delay_ms: u64,
        unload_handler: UnloadHandler,
        ring_capacity: usize,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            manager: Arc::clone(&manager),
            permissions,
            state: Mutex::new(SessionState::default()),
            unload: UnloadTimer::new(unload_delay_ms, unload_handler),
            ring_capacity,
        });

        let weak = Arc::downgrade(&controller);
        manager.set_listener(DeviceChangeListener(Box::new(move |change, device| {
            if let Some(controller) = weak.upgrade() {
                controller.notify_device_change(change, device);
            }
        })));
        controller
    }

    pub fn device_manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    /// Register a client process. Returns its id and the notification
    /// channel the client-side listener thread drains.
    pub fn create_client(&self, uid: u32) -> Result<(u32, Receiver<ClientNotification>)> {
        let mut state = self.state.lock();
        self.unload.cancel();

        if state.clients.len() >= MAX_CLIENTS {
            tracing::warn!(uid, "client table full");
            return Err(Error::TooManyClients);
        }
        if state
            .app_clients
            .get(&uid)
            .is_some_and(|set| set.len() >= MAX_CLIENTS_PER_APP)
        {
            tracing::warn!(uid, "per-application client cap reached");
            return Err(Error::TooManyClients);
        }

        let client_id = state.allocate_client_id();
        let (tx, rx) = crossbeam_channel::unbounded();
        state.clients.insert(
            client_id,
            ClientHandle {
                uid,
                notifications: tx,
            },
        );
        state.resources.insert(
            client_id,
            ClientResourceInfo {
                uid,
                ..Default::default()
            },
        );
        state.app_clients.entry(uid).or_default().insert(client_id);

        tracing::info!(client_id, uid, "client created");
        Ok((client_id, rx))
    }

    pub fn get_devices(&self) -> Vec<DeviceInformation> {
        self.manager.get_devices()
    }

    pub fn get_device_ports(&self, device_id: i64) -> Result<Vec<PortInformation>> {
        self.manager.get_device_ports(device_id)
    }

    pub fn open_device(&self, client_id: u32, device_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        let uid = state.require_client(client_id)?;

        let is_ble = state.active_ble.values().any(|&id| id == device_id);
        if is_ble && !self.permissions.bluetooth_allowed(uid) {
            tracing::warn!(client_id, device_id, "bluetooth permission denied");
            return Err(Error::PermissionDenied);
        }

        let joining = match state.contexts.get(&device_id) {
            Some(context) if context.clients.contains(&client_id) => {
                return Err(Error::DeviceAlreadyOpen)
            }
            Some(_) => true,
            None => false,
        };

        let open_count = state
            .resources
            .get(&client_id)
            .map(|r| r.open_devices.len())
            .unwrap_or(0);
        if open_count >= MAX_DEVICES_PER_CLIENT {
            tracing::warn!(client_id, "device cap reached");
            return Err(Error::TooManyOpenDevices);
        }

        if joining {
            state
                .contexts
                .get_mut(&device_id)
                .expect("context")
                .clients
                .insert(client_id);
        } else {
            self.manager.open_device(device_id)?;
            state
                .contexts
                .insert(device_id, DeviceClientContext::new(HashSet::from([client_id])));
        }
        if let Some(resources) = state.resources.get_mut(&client_id) {
            resources.open_devices.insert(device_id);
        }

        tracing::info!(client_id, device_id, "device opened");
        Ok(())
    }

    /// Open (or join) a BLE device by address. Returns immediately; the
    /// reply fires once, synchronously when the address is already live,
    /// otherwise after the coalesced bring-up completes.
    pub fn open_ble_device(
        self: &Arc<Self>,
        client_id: u32,
        mac: &str,
        reply: DeviceOpenedCallback,
    ) -> Result<()> {
        mac.parse::<MacAddress>().map_err(|_| Error::InvalidArg)?;

        let mut state = self.state.lock();
        state.require_client(client_id)?;

        let active_device = state
            .active_ble
            .get(mac)
            .copied()
            .filter(|device_id| state.contexts.contains_key(device_id));
        if let Some(device_id) = active_device {
            let open_count = state
                .resources
                .get(&client_id)
                .map(|r| r.open_devices.len())
                .unwrap_or(0);
            let already_holds = state
                .resources
                .get(&client_id)
                .is_some_and(|r| r.open_devices.contains(&device_id));
            if open_count >= MAX_DEVICES_PER_CLIENT && !already_holds {
                return Err(Error::TooManyOpenDevices);
            }

            state
                .contexts
                .get_mut(&device_id)
                .expect("context")
                .clients
                .insert(client_id);
            if let Some(resources) = state.resources.get_mut(&client_id) {
                resources.open_devices.insert(device_id);
            }
            let info = self.manager.device_info(device_id)?;
            tracing::info!(
                client_id,
                device_id,
                address = %redact_mac(mac),
                "joined active BLE device"
            );
            drop(state);
            reply(true, Some(info));
            return Ok(());
        }

        let first_request = !state.pending_ble.contains_key(mac);
        state
            .pending_ble
            .entry(mac.to_string())
            .or_default()
            .push(PendingBleOpen { client_id, reply });

        if !first_request {
            tracing::info!(client_id, address = %redact_mac(mac), "joined pending BLE open");
            return Ok(());
        }

        tracing::info!(client_id, address = %redact_mac(mac), "initiating BLE open");
        let weak: Weak<Self> = Arc::downgrade(self);
        let address = mac.to_string();
        let completion: unison_driver::BleOpenCallback = Box::new(move |success, info| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_ble_open_complete(&address, success, info);
            }
        });

        if let Err(e) = self.manager.open_ble_device(mac, completion) {
            tracing::warn!(address = %redact_mac(mac), "BLE open failed to start: {e}");
            state.pending_ble.remove(mac);
            return Err(e);
        }
        Ok(())
    }

    /// Driver bring-up completion, routed through the device manager.
    /// All waiters queued for the address get the same outcome.
    fn handle_ble_open_complete(&self, mac: &str, success: bool, info: Option<DeviceInformation>) {
        tracing::info!(address = %redact_mac(mac), success, "BLE open complete");
        let mut orphaned_device = None;
        let waiting = {
            let mut state = self.state.lock();
            let waiting = match state.pending_ble.remove(mac) {
                Some(waiting) => waiting,
                None => {
                    tracing::warn!(address = %redact_mac(mac), "no pending BLE openers");
                    Vec::new()
                }
            };

            if success {
                if let Some(info) = info.as_ref() {
                    let device_id = info.device_id;
                    let alive: HashSet<u32> = waiting
                        .iter()
                        .map(|p| p.client_id)
                        .filter(|id| state.clients.contains_key(id))
                        .collect();
                    if alive.is_empty() {
                        tracing::warn!(
                            address = %redact_mac(mac),
                            "every waiting client died during bring-up"
                        );
                        orphaned_device = Some(device_id);
                    } else {
                        state.active_ble.insert(mac.to_string(), device_id);
                        for client_id in &alive {
                            if let Some(resources) = state.resources.get_mut(client_id) {
                                resources.open_devices.insert(device_id);
                            }
                        }
                        state
                            .contexts
                            .insert(device_id, DeviceClientContext::new(alive));
                    }
                }
            }
            waiting
        };

        if let Some(device_id) = orphaned_device {
            if let Err(e) = self.manager.close_device(device_id) {
                tracing::warn!(device_id, "closing orphaned BLE device failed: {e}");
            }
        }
        for pending in waiting {
            (pending.reply)(success, info.clone());
        }
    }

    /// Open an input port, creating the connection and ring on first use
    /// and joining the existing connection otherwise. Returns the ring
    /// the caller drains.
    pub fn open_input_port(
        &self,
        client_id: u32,
        device_id: i64,
        port_index: u32,
    ) -> Result<Arc<SharedRing>> {
        let mut state = self.state.lock();
        state.require_client(client_id)?;
        state.require_membership(client_id, device_id)?;

        let existing = state
            .contexts
            .get(&device_id)
            .and_then(|c| c.inputs.get(&port_index).cloned());
        if let Some(connection) = existing {
            if connection.has_client(client_id) {
                return Err(Error::PortAlreadyOpen);
            }
            let ring = self.create_ring(client_id, device_id, port_index, "in")?;
            connection.add_client(client_id, Arc::clone(&ring));
            state.bump_port_count(client_id);
            tracing::info!(client_id, device_id, port_index, "joined input port");
            return Ok(ring);
        }

        if state.port_count(client_id) as usize >= MAX_PORTS_PER_CLIENT {
            tracing::warn!(client_id, "port cap reached");
            return Err(Error::TooManyOpenPorts);
        }

        let ring = self.create_ring(client_id, device_id, port_index, "in")?;
        let connection = InputConnection::new(device_id, port_index);
        self.manager
            .open_input_port(device_id, port_index, connection.input_callback())?;

        connection.add_client(client_id, Arc::clone(&ring));
        state
            .contexts
            .get_mut(&device_id)
            .expect("context")
            .inputs
            .insert(port_index, connection);
        state.bump_port_count(client_id);

        tracing::info!(client_id, device_id, port_index, "input port opened");
        Ok(ring)
    }

    /// Symmetric to `open_input_port`; output connections also start
    /// their drain worker.
    pub fn open_output_port(
        &self,
        client_id: u32,
        device_id: i64,
        port_index: u32,
    ) -> Result<Arc<SharedRing>> {
        let mut state = self.state.lock();
        state.require_client(client_id)?;
        state.require_membership(client_id, device_id)?;

        let existing = state
            .contexts
            .get(&device_id)
            .and_then(|c| c.outputs.get(&port_index).cloned());
        if let Some(connection) = existing {
            if connection.has_client(client_id) {
                return Err(Error::PortAlreadyOpen);
            }
            let ring = self.create_ring(client_id, device_id, port_index, "out")?;
            connection.add_client(client_id, Arc::clone(&ring));
            state.bump_port_count(client_id);
            tracing::info!(client_id, device_id, port_index, "joined output port");
            return Ok(ring);
        }

        if state.port_count(client_id) as usize >= MAX_PORTS_PER_CLIENT {
            tracing::warn!(client_id, "port cap reached");
            return Err(Error::TooManyOpenPorts);
        }

        let ring = self.create_ring(client_id, device_id, port_index, "out")?;
        self.manager.open_output_port(device_id, port_index)?;
        let connection = OutputConnection::new(device_id, port_index);
        connection.start(Arc::clone(&self.manager));

        connection.add_client(client_id, Arc::clone(&ring));
        state
            .contexts
            .get_mut(&device_id)
            .expect("context")
            .outputs
            .insert(port_index, connection);
        state.bump_port_count(client_id);

        tracing::info!(client_id, device_id, port_index, "output port opened");
        Ok(ring)
    }

    pub fn close_input_port(&self, client_id: u32, device_id: i64, port_index: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.require_client(client_id)?;
        close_input_port_inner(&self.manager, &mut state, client_id, device_id, port_index)
    }

    pub fn close_output_port(&self, client_id: u32, device_id: i64, port_index: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.require_client(client_id)?;
        close_output_port_inner(&self.manager, &mut state, client_id, device_id, port_index)
    }

    /// Discard events queued on the client's output ring for this port.
    pub fn flush_output_port(&self, client_id: u32, device_id: i64, port_index: u32) -> Result<()> {
        let state = self.state.lock();
        state.require_client(client_id)?;
        let context = state
            .contexts
            .get(&device_id)
            .ok_or(Error::InvalidDeviceHandle)?;
        let connection = context.outputs.get(&port_index).ok_or(Error::InvalidPort)?;
        if !connection.flush_client(client_id) {
            return Err(Error::InvalidPort);
        }
        Ok(())
    }

    /// Close every port this client has on the device, then detach the
    /// client; the last client out also closes the driver device.
    pub fn close_device(&self, client_id: u32, device_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.require_client(client_id)?;
        {
            let context = state
                .contexts
                .get(&device_id)
                .ok_or(Error::InvalidDeviceHandle)?;
            if !context.clients.contains(&client_id) {
                return Err(Error::InvalidDeviceHandle);
            }
        }

        close_ports_for_device(&self.manager, &mut state, client_id, device_id);

        let now_empty = {
            let context = state.contexts.get_mut(&device_id).expect("context");
            context.clients.remove(&client_id);
            context.clients.is_empty()
        };
        if let Some(resources) = state.resources.get_mut(&client_id) {
            resources.open_devices.remove(&device_id);
        }
        tracing::info!(client_id, device_id, "client detached from device");

        if !now_empty {
            return Ok(());
        }

        if let Some(mut context) = state.contexts.remove(&device_id) {
            context.teardown();
        }
        state.active_ble.retain(|_, &mut id| id != device_id);

        // The driver close can fire device-change callbacks; never hold
        // the session lock across it.
        drop(state);
        self.manager
            .close_device(device_id)
            .map_err(|e| Error::SystemError(format!("driver close failed: {e}")))?;
        tracing::info!(device_id, "device closed");
        Ok(())
    }

    /// Tear down everything the client holds. Idempotent on absent ids.
    /// Runs in three phases so no driver device close happens under the
    /// session lock.
    pub fn destroy_client(&self, client_id: u32) -> Result<()> {
        let (devices_to_close, devices_to_clean, uid) = {
            let mut state = self.state.lock();
            if !state.clients.contains_key(&client_id) {
                return Err(Error::InvalidClient);
            }
            let mut to_close = Vec::new();
            let mut to_clean = Vec::new();
            for (&device_id, context) in &state.contexts {
                if context.clients.contains(&client_id) {
                    if context.clients.len() == 1 {
                        to_close.push(device_id);
                    }
                    to_clean.push(device_id);
                }
            }
            let uid = state
                .resources
                .get(&client_id)
                .map(|r| r.uid)
                .unwrap_or_default();
            state.clients.remove(&client_id);
            (to_close, to_clean, uid)
        };

        for device_id in &devices_to_close {
            if let Err(e) = self.manager.close_device(*device_id) {
                tracing::warn!(device_id, "driver close during client teardown failed: {e}");
            }
        }

        let last_client_left = {
            let mut state = self.state.lock();
            for device_id in devices_to_clean {
                cleanup_device_for_client(&self.manager, &mut state, client_id, device_id);
            }
            let app_now_empty = state
                .app_clients
                .get_mut(&uid)
                .map(|app| {
                    app.remove(&client_id);
                    app.is_empty()
                })
                .unwrap_or(false);
            if app_now_empty {
                state.app_clients.remove(&uid);
            }
            state.resources.remove(&client_id);
            state.clients.is_empty()
        };

        tracing::info!(client_id, "client destroyed");
        if last_client_left {
            self.unload.schedule();
        }
        Ok(())
    }

    /// Hotplug fan-out. Removal also evicts the dead device's session
    /// state; callbacks run outside the lock.
    pub fn notify_device_change(&self, change: DeviceChange, device: DeviceInformation) {
        let notifiers = {
            let mut state = self.state.lock();
            if change == DeviceChange::Removed {
                tracing::info!(device_id = device.device_id, "device removed");
                state.active_ble.retain(|_, &mut id| id != device.device_id);
                if let Some(mut context) = state.contexts.remove(&device.device_id) {
                    for client_id in &context.clients {
                        if let Some(resources) = state.resources.get_mut(client_id) {
                            resources.open_devices.remove(&device.device_id);
                        }
                    }
                    context.teardown();
                }
            }
            state.snapshot_notifiers()
        };
        for client in notifiers {
            client.notify(ClientNotification::DeviceChange {
                change,
                device: device.clone(),
            });
        }
    }

    /// Broadcast a service error to every client.
    pub fn notify_error(&self, code: i32) {
        let notifiers = self.state.lock().snapshot_notifiers();
        for client in notifiers {
            client.notify(ClientNotification::Error { code });
        }
    }

    fn create_ring(
        &self,
        client_id: u32,
        device_id: i64,
        port_index: u32,
        direction: &str,
    ) -> Result<Arc<SharedRing>> {
        // Names must stay unique across re-opens of the same attachment
        // and across controller instances in one process.
        static RING_SEQUENCE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let sequence = RING_SEQUENCE.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let name = format!(
            "{}_{}_c{}_d{}_p{}_{}",
            std::process::id(),
            sequence,
            client_id,
            device_id,
            port_index,
            direction
        );
        Ok(Arc::new(SharedRing::create(&name, self.ring_capacity)?))
    }
}

fn close_input_port_inner(
    manager: &DeviceManager,
    state: &mut SessionState,
    client_id: u32,
    device_id: i64,
    port_index: u32,
) -> Result<()> {
    let context = state
        .contexts
        .get_mut(&device_id)
        .ok_or(Error::InvalidDeviceHandle)?;
    if !context.clients.contains(&client_id) {
        return Err(Error::InvalidArg);
    }

    let Some(connection) = context.inputs.get(&port_index).cloned() else {
        return Ok(());
    };
    if connection.remove_client(client_id).is_none() {
        return Ok(());
    }
    if connection.is_empty() {
        manager.close_input_port(device_id, port_index)?;
        context.inputs.remove(&port_index);
        tracing::info!(device_id, port_index, "input port closed");
    }
    if let Some(resources) = state.resources.get_mut(&client_id) {
        resources.open_port_count = resources.open_port_count.saturating_sub(1);
    }
    Ok(())
}

fn close_output_port_inner(
    manager: &DeviceManager,
    state: &mut SessionState,
    client_id: u32,
    device_id: i64,
    port_index: u32,
) -> Result<()> {
    let context = state
        .contexts
        .get_mut(&device_id)
        .ok_or(Error::InvalidDeviceHandle)?;
    if !context.clients.contains(&client_id) {
        return Err(Error::InvalidArg);
    }

    let Some(connection) = context.outputs.get(&port_index).cloned() else {
        return Ok(());
    };
    if connection.remove_client(client_id).is_none() {
        return Ok(());
    }
    if connection.is_empty() {
        connection.stop();
        manager.close_output_port(device_id, port_index)?;
        context.outputs.remove(&port_index);
        tracing::info!(device_id, port_index, "output port closed");
    }
    if let Some(resources) = state.resources.get_mut(&client_id) {
        resources.open_port_count = resources.open_port_count.saturating_sub(1);
    }
    Ok(())
}

/// Close every port attachment the client has on one device.
fn close_ports_for_device(
    manager: &DeviceManager,
    state: &mut SessionState,
    client_id: u32,
    device_id: i64,
) {
    let (input_ports, output_ports) = match state.contexts.get(&device_id) {
        Some(context) => (
            context.inputs.keys().copied().collect::<Vec<_>>(),
            context.outputs.keys().copied().collect::<Vec<_>>(),
        ),
        None => return,
    };
    for port_index in input_ports {
        if let Err(e) = close_input_port_inner(manager, state, client_id, device_id, port_index) {
            tracing::warn!(device_id, port_index, "input close during teardown failed: {e}");
        }
    }
    for port_index in output_ports {
        if let Err(e) = close_output_port_inner(manager, state, client_id, device_id, port_index) {
            tracing::warn!(device_id, port_index, "output close during teardown failed: {e}");
        }
    }
}

/// Detach a (possibly dead) client from one device, dropping the context
/// when it empties. The driver device itself was closed in the unlocked
/// phase when this client was the last holder.
fn cleanup_device_for_client(
    manager: &DeviceManager,
    state: &mut SessionState,
    client_id: u32,
    device_id: i64,
) {
    close_ports_for_device(manager, state, client_id, device_id);
    let now_empty = match state.contexts.get_mut(&device_id) {
        Some(context) => {
            context.clients.remove(&client_id);
            context.clients.is_empty()
        }
        None => return,
    };
    if let Some(resources) = state.resources.get_mut(&client_id) {
        resources.open_devices.remove(&device_id);
    }
    if now_empty {
        if let Some(mut context) = state.contexts.remove(&device_id) {
            context.teardown();
        }
        state.active_ble.retain(|_, &mut id| id != device_id);
    }
}
