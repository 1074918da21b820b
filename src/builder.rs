//! Service configuration builder.

use std::sync::Arc;

use unison_driver::TransportDriver;
use unison_service::{
    AllowAll, DeviceManager, Error, Permissions, Result, SessionController, UnloadHandler,
    UNLOAD_DELAY_DEFAULT_MS,
};

use crate::MidiService;

const DEFAULT_RING_CAPACITY: usize = 4096;

pub struct MidiServiceBuilder {
    unload_delay_ms: u64,
    ring_capacity: usize,
    permissions: Arc<dyn Permissions>,
    unload_handler: Option<UnloadHandler>,
    drivers: Vec<Arc<dyn TransportDriver>>,
}

impl Default for MidiServiceBuilder {
    fn default() -> Self {
        Self {
            unload_delay_ms: UNLOAD_DELAY_DEFAULT_MS,
            ring_capacity: DEFAULT_RING_CAPACITY,
            permissions: Arc::new(AllowAll),
            unload_handler: None,
            drivers: Vec::new(),
        }
    }
}

impl MidiServiceBuilder {
    /// Delay before the service unloads itself after the last client
    /// leaves. Zero fires immediately.
    pub fn unload_delay_ms(mut self, delay_ms: u64) -> Self {
        self.unload_delay_ms = delay_ms;
        self
    }

    /// Per-attachment ring size in bytes (power of two, at least one
    /// page).
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn Permissions>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Invoked when the self-unload timer expires; hosts request process
    /// shutdown here.
    pub fn on_unload(mut self, handler: UnloadHandler) -> Self {
        self.unload_handler = Some(handler);
        self
    }

    /// Register a transport driver. One driver per transport kind.
    pub fn driver(mut self, driver: Arc<dyn TransportDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn build(self) -> Result<MidiService> {
        if !self.ring_capacity.is_power_of_two() || self.ring_capacity < 4096 {
            return Err(Error::InvalidArg);
        }

        let manager = DeviceManager::new();
        for driver in self.drivers {
            manager.register_driver(driver);
        }

        let unload_handler = self
            .unload_handler
            .unwrap_or_else(|| Arc::new(|| tracing::info!("service idle, unload requested")));

        let controller = SessionController::new(
            manager,
            self.permissions,
            self.unload_delay_ms,
            unload_handler,
            self.ring_capacity,
        );
        controller.device_manager().refresh_devices();

        Ok(MidiService::new(controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build() {
        let service = MidiServiceBuilder::default().build().unwrap();
        assert!(service.controller().get_devices().is_empty());
    }

    #[test]
    fn test_invalid_ring_capacity_rejected() {
        assert!(matches!(
            MidiServiceBuilder::default().ring_capacity(1000).build(),
            Err(Error::InvalidArg)
        ));
        assert!(matches!(
            MidiServiceBuilder::default().ring_capacity(2048).build(),
            Err(Error::InvalidArg)
        ));
    }
}
