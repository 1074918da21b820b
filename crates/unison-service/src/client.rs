//! Client-facing notification plumbing.
//!
//! Each registered client owns one FIFO channel back to its process;
//! device-change and error broadcasts ride it in arrival order.

use crossbeam_channel::Sender;

use unison_driver::DeviceInformation;

use crate::DeviceChange;

#[derive(Clone, Debug)]
pub enum ClientNotification {
    DeviceChange {
        change: DeviceChange,
        device: DeviceInformation,
    },
    Error {
        code: i32,
    },
}

/// Server-side record of one client.
pub(crate) struct ClientHandle {
    pub uid: u32,
    pub notifications: Sender<ClientNotification>,
}

impl ClientHandle {
    pub fn notify(&self, notification: ClientNotification) {
        // A full or disconnected channel means the peer is gone; the
        // death path cleans the row up.
        let _ = self.notifications.send(notification);
    }
}
