//! Client configuration and device profiles.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use viakit_protocol::LightingValue;

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Tuning for one protocol session.
///
/// Durations are plain milliseconds so configuration files stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long `send` waits for the matching reply.
    pub command_timeout_ms: u64,

    /// Upper bound on the whole connection handshake.
    pub handshake_timeout_ms: u64,

    /// Minimum gap between two lighting writes.
    pub lighting_settle_ms: u64,

    /// Capacity of the command queue. Callers wait when it is full.
    pub queue_size: usize,

    /// Oldest protocol version accepted at connect time.
    pub min_protocol_version: u16,
}

impl ClientConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn lighting_settle(&self) -> Duration {
        Duration::from_millis(self.lighting_settle_ms)
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_lighting_settle(mut self, settle: Duration) -> Self {
        self.lighting_settle_ms = settle.as_millis() as u64;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 500,
            handshake_timeout_ms: 2_000,
            lighting_settle_ms: 200,
            queue_size: 32,
            min_protocol_version: 9,
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceProfile
// ---------------------------------------------------------------------------

/// Switch matrix dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: u8,
    pub cols: u8,
}

impl Matrix {
    pub fn keys(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// Host-side description of a keyboard model.
///
/// The firmware cannot be asked which lighting values it implements or how
/// big its matrix is, so that knowledge comes from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub name: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub matrix: Option<Matrix>,
    pub lighting: Vec<LightingValue>,
}

impl DeviceProfile {
    /// An empty profile for `vendor_id:product_id`: no lighting, unknown
    /// matrix.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_matrix(mut self, rows: u8, cols: u8) -> Self {
        self.matrix = Some(Matrix { rows, cols });
        self
    }

    pub fn with_lighting(mut self, values: &[LightingValue]) -> Self {
        self.lighting = values.to_vec();
        self
    }

    /// Returns `true` if this profile describes `vendor_id:product_id`.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
        assert_eq!(config.lighting_settle(), Duration::from_millis(200));
        assert_eq!(config.min_protocol_version, 9);
    }

    #[test]
    fn test_client_config_partial_json_keeps_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"command_timeout_ms": 50}"#).expect("valid json");
        assert_eq!(config.command_timeout(), Duration::from_millis(50));
        assert_eq!(config.queue_size, 32);
    }

    #[test]
    fn test_device_profile_from_json() {
        let profile: DeviceProfile = serde_json::from_str(
            r#"{
                "name": "Planck",
                "vendor_id": 18003,
                "product_id": 1,
                "matrix": { "rows": 4, "cols": 12 },
                "lighting": ["brightness", "effect", "color1"]
            }"#,
        )
        .expect("valid json");
        assert!(profile.matches(0x4653, 0x0001));
        assert_eq!(profile.matrix.map(|m| m.keys()), Some(48));
        assert_eq!(profile.lighting[2], LightingValue::Color1);
    }
}
