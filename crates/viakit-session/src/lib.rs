//! Device discovery and session lifecycle for viakit.
//!
//! [`DeviceManager`] sits on top of a [`HidBackend`](viakit_transport::HidBackend):
//!
//! 1. **Discovery**: lists VIA interfaces, refreshed lazily after hot-plug
//!    notifications.
//! 2. **Lifecycle**: tracks each device through [`DeviceState`] and opens
//!    [`ProtocolSession`](viakit_client::ProtocolSession)s on request.
//! 3. **Teardown**: closes a device's session when it is unplugged.
//!
//! ```text
//! Application (above)  ← list / open / close
//!     ↕
//! Session manager (this crate)  ← device states, hot-plug handling
//!     ↕
//! Client + transport (below)  ← sessions, HID backend
//! ```

mod config;
mod error;
mod manager;
mod state;

pub use config::ManagerConfig;
pub use error::SessionError;
pub use manager::{DeviceManager, DeviceSummary};
pub use state::DeviceState;
