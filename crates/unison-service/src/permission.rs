//! Caller permission checks.
//!
//! The host platform decides what an application uid may touch; the
//! controller only asks. The default grants everything, which is what
//! embedded deployments without a permission service want.

pub trait Permissions: Send + Sync {
    /// May this uid reach Bluetooth transports?
    fn bluetooth_allowed(&self, uid: u32) -> bool;
}

/// Grants every request.
pub struct AllowAll;

impl Permissions for AllowAll {
    fn bluetooth_allowed(&self, _uid: u32) -> bool {
        true
    }
}

/// Denies Bluetooth for every uid. Used in tests.
pub struct DenyBluetooth;

impl Permissions for DenyBluetooth {
    fn bluetooth_allowed(&self, _uid: u32) -> bool {
        false
    }
}
