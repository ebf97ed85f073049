//! Configuration files.
//!
//! One JSON document configures the whole stack:
//!
//! ```json
//! {
//!   "client": { "command_timeout_ms": 500, "lighting_settle_ms": 200 },
//!   "profiles": [
//!     { "name": "Planck", "vendor_id": 18003, "product_id": 1,
//!       "matrix": { "rows": 4, "cols": 12 }, "lighting": ["brightness"] }
//!   ],
//!   "keycodes": { "KC_HYPR_F": 104 },
//!   "log_filter": "viakit=debug"
//! }
//! ```
//!
//! Every field is optional.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use viakit_client::{ClientConfig, DeviceProfile};
use viakit_macro::{Keycode, KeycodeTable};
use viakit_session::ManagerConfig;

use crate::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViakitConfig {
    pub client: ClientConfig,

    pub profiles: Vec<DeviceProfile>,

    /// Keycode names added on top of the QMK basic table.
    pub keycodes: BTreeMap<String, u8>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

impl ViakitConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(
            path = %path.display(),
            profiles = config.profiles.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Settings for a [`DeviceManager`](viakit_session::DeviceManager).
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            client: self.client.clone(),
            profiles: self.profiles.clone(),
        }
    }

    /// The QMK basic table with the configured names added.
    pub fn keycode_table(&self) -> KeycodeTable {
        let mut table = KeycodeTable::basic();
        for (name, code) in &self.keycodes {
            table.insert(name.as_str(), Keycode(*code));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viakit_protocol::LightingValue;

    #[test]
    fn test_from_json_str_empty_object_is_default() {
        let config = ViakitConfig::from_json_str("{}").expect("parse");
        assert_eq!(config, ViakitConfig::default());
    }

    #[test]
    fn test_from_json_str_full() {
        let config = ViakitConfig::from_json_str(
            r#"{
                "client": { "command_timeout_ms": 100 },
                "profiles": [{
                    "vendor_id": 18003, "product_id": 1,
                    "matrix": { "rows": 4, "cols": 12 },
                    "lighting": ["brightness", "color1"]
                }],
                "keycodes": { "kc_custom": 165 },
                "log_filter": "viakit=debug"
            }"#,
        )
        .expect("parse");

        assert_eq!(config.client.command_timeout_ms, 100);
        let manager = config.manager_config();
        let profile = manager.profile_for(0x4653, 0x0001);
        assert_eq!(profile.lighting, vec![LightingValue::Brightness, LightingValue::Color1]);
        assert_eq!(config.keycode_table().lookup("KC_CUSTOM"), Some(Keycode(165)));
        assert_eq!(config.log_filter.as_deref(), Some("viakit=debug"));
    }

    #[test]
    fn test_from_json_str_rejects_bad_lighting_name() {
        let err = ViakitConfig::from_json_str(r#"{"profiles":[{"lighting":["disco"]}]}"#)
            .expect_err("unknown value");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_json_file_missing_is_io_error() {
        let err = ViakitConfig::from_json_file("/nonexistent/viakit.json").expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
