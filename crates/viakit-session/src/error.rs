//! Error types for the session manager.

use viakit_client::ConnectError;
use viakit_transport::{DeviceId, TransportError};

use crate::DeviceState;

/// Errors that can occur while discovering, opening or closing devices.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The id is not (or no longer) in the device list. Unplugged devices
    /// are forgotten, so this is also what a stale id yields.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// The requested operation would skip a lifecycle state.
    #[error("{device}: cannot go from {from} to {to}")]
    InvalidTransition {
        device: DeviceId,
        from: DeviceState,
        to: DeviceState,
    },

    /// The handshake failed. The device is `Closed`.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Enumerating or opening through the HID backend failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
