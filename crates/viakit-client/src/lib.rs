//! VIA command protocol client for viakit.
//!
//! [`connect`] turns an open [`HidDevice`](viakit_transport::HidDevice)
//! into a [`ProtocolSession`]. Each session is a Tokio actor that owns the
//! device and keeps exactly one command in flight: a second call queues
//! behind the first, replies are matched by their echoed command id, and
//! stale reports are discarded.
//!
//! # Architecture
//!
//! ```text
//! ProtocolSession ──mpsc──▶ session actor ──write_report──▶ device
//!        ▲                       │
//!        └──────oneshot──────────┘◀──────read_report─────────┘
//! ```
//!
//! Commands are checked against [`Capabilities`] before they are queued, so
//! a command the device cannot serve never reaches the wire.

mod actor;
mod capability;
mod config;
mod error;
mod session;

pub use capability::Capabilities;
pub use config::{ClientConfig, DeviceProfile, Matrix};
pub use error::{CapabilityError, ClientError, ConnectError};
pub use session::{connect, ProtocolSession};
