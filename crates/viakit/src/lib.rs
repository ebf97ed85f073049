//! # viakit
//!
//! Host-side core for configuring VIA keyboards over raw HID.
//!
//! The layers, bottom up:
//!
//! - [`transport`]: HID backends and devices exchanging fixed-size reports
//! - [`protocol`]: VIA commands, replies and report framing
//! - [`macros`]: macro text, tokens and firmware bytecode
//! - [`client`]: per-device protocol sessions
//! - [`session`]: device discovery and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use viakit::prelude::*;
//!
//! # async fn run<B: HidBackend>(backend: B) -> Result<(), ViakitError> {
//! viakit::init_tracing();
//! let config = ViakitConfig::from_json_file("viakit.json")?;
//! let manager = DeviceManager::new(backend, config.manager_config());
//! for device in manager.list_devices().await? {
//!     let session = manager.open(device.info.id).await?;
//!     let macros = session.read_macros().await?;
//!     println!("{} macros", macros.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `sim`: in-memory backend and a virtual keyboard
//! - `hidapi`: real devices through `hidapi`

mod config;
mod error;
mod logging;

pub use config::ViakitConfig;
pub use error::{ConfigError, ViakitError};
pub use logging::{init_tracing, init_tracing_with, DEFAULT_LOG_FILTER};

pub use viakit_client as client;
pub use viakit_macro as macros;
pub use viakit_protocol as protocol;
pub use viakit_session as session;
pub use viakit_transport as transport;

pub mod prelude {
    pub use crate::{init_tracing, ViakitConfig, ViakitError};
    pub use viakit_client::{
        connect, Capabilities, ClientConfig, ClientError, DeviceProfile, ProtocolSession,
    };
    pub use viakit_macro::{KeycodeTable, MacroExpression, MacroToken};
    pub use viakit_protocol::{Command, Feature, KeyboardValue, LightingValue};
    pub use viakit_session::{DeviceManager, DeviceState, ManagerConfig};
    pub use viakit_transport::{DeviceId, DeviceInfo, HidBackend, HidDevice};
}
