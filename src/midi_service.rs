//! Top-level service object.

use std::sync::Arc;

use unison_service::{Result, SessionController};

use crate::client::MidiClient;
use crate::MidiServiceBuilder;

/// One running broker instance.
///
/// Owns the session controller; clients connect through
/// [`MidiService::connect`] and talk to the controller through their
/// [`MidiClient`] handle exactly the way a remote process would over
/// IPC.
pub struct MidiService {
    controller: Arc<SessionController>,
}

impl MidiService {
    pub(crate) fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    pub fn builder() -> MidiServiceBuilder {
        MidiServiceBuilder::default()
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Re-pull device enumeration from every driver and fan out hotplug
    /// notifications.
    pub fn refresh_devices(&self) {
        self.controller.device_manager().refresh_devices();
    }

    /// Register a client under an application uid.
    pub fn connect(&self, uid: u32) -> Result<MidiClient> {
        let (client_id, notifications) = self.controller.create_client(uid)?;
        Ok(MidiClient::new(
            Arc::clone(&self.controller),
            client_id,
            notifications,
        ))
    }
}
