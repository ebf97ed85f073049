//! Unified error type for viakit.

use std::path::PathBuf;

use viakit_client::{ClientError, ConnectError};
use viakit_macro::{DecodeError, ValidationError};
use viakit_protocol::ProtocolError;
use viakit_session::SessionError;
use viakit_transport::TransportError;

/// A configuration file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error that wraps all crate-specific errors.
///
/// Each variant has a `From` impl, so `?` converts errors from any layer.
#[derive(Debug, thiserror::Error)]
pub enum ViakitError {
    /// HID enumeration, open, read or write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command could not be framed or a reply made no sense.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Macro text or tokens were rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Macro bytes from the device are corrupt.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A session operation failed (timeout, lost connection, capability).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The handshake with a device failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Device lookup or lifecycle error.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
