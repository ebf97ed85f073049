//! Error types for the client layer.

use std::time::Duration;

use viakit_macro::{DecodeError, ValidationError};
use viakit_protocol::{Feature, LightingValue, ProtocolError};
use viakit_transport::{DeviceId, TransportError};

/// A request the negotiated capabilities rule out. Raised before any
/// report is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The command belongs to a feature the protocol version lacks.
    #[error("{command} requires {feature}, device speaks protocol {version}")]
    Feature {
        command: &'static str,
        feature: Feature,
        version: u16,
    },

    /// The device profile does not list this lighting value.
    #[error("lighting value {value} is not supported by this device")]
    LightingValue { value: LightingValue },

    /// A macro contains delays the protocol version cannot encode.
    #[error("macro delays require protocol 11, device speaks protocol {version}")]
    MacroDelay { version: u16 },
}

/// Errors returned by [`ProtocolSession`](crate::ProtocolSession)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No matching reply arrived within the per-command timeout.
    #[error("{command} timed out after {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },

    /// The device went away or the session was closed. The session is
    /// dead; open a new one.
    #[error("connection to {0} lost")]
    ConnectionLost(DeviceId),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The firmware's reply was malformed, unhandled or short.
    #[error(transparent)]
    Device(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An argument outside what the device reported during the handshake.
    #[error("{what} {value} is out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// The device profile has no matrix dimensions.
    #[error("device profile has no matrix size")]
    NoMatrix,
}

impl ClientError {
    /// Returns `true` if the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::ConnectionLost(_))
    }
}

/// Why a session could not be established. No session exists afterwards.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The handshake did not finish within the handshake timeout.
    #[error("handshake with {device} timed out after {timeout:?}")]
    Timeout { device: DeviceId, timeout: Duration },

    /// The firmware reported a protocol version we do not speak.
    #[error("{device} speaks protocol {version}, need at least {min}")]
    UnsupportedVersion {
        device: DeviceId,
        version: u16,
        min: u16,
    },

    /// The version reply (or another handshake reply) was malformed.
    #[error("handshake with {device} failed: {source}")]
    Handshake {
        device: DeviceId,
        #[source]
        source: ClientError,
    },
}
