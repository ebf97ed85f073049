//! What a connected device can do.

use std::collections::BTreeSet;

use viakit_protocol::{Command, Feature, LightingValue};

use crate::CapabilityError;

/// Capabilities resolved during the handshake.
///
/// Version-derived features come from the protocol version alone; lighting
/// values come from the device profile and are only usable while
/// [`Feature::LegacyLighting`] is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub protocol_version: u16,
    pub layer_count: u8,
    pub macro_count: u8,
    pub macro_buffer_size: u16,
    pub lighting_values: BTreeSet<LightingValue>,
}

impl Capabilities {
    /// Returns `true` if the negotiated version has `feature`.
    pub fn supports(&self, feature: Feature) -> bool {
        feature.available_at(self.protocol_version)
    }

    /// All features available at the negotiated version.
    pub fn features(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|f| self.supports(*f))
            .collect()
    }

    /// Returns `true` if `value` can be read and written on this device.
    pub fn supports_lighting(&self, value: LightingValue) -> bool {
        self.supports(Feature::LegacyLighting) && self.lighting_values.contains(&value)
    }

    /// Lighting values usable on this device.
    pub fn lighting(&self) -> Vec<LightingValue> {
        if self.supports(Feature::LegacyLighting) {
            self.lighting_values.iter().copied().collect()
        } else {
            Vec::new()
        }
    }

    /// Rejects commands the device cannot serve.
    pub fn check(&self, command: &Command) -> Result<(), CapabilityError> {
        if let Some(feature) = command.required_feature() {
            if !self.supports(feature) {
                return Err(CapabilityError::Feature {
                    command: command.name(),
                    feature,
                    version: self.protocol_version,
                });
            }
        }
        match command {
            Command::SetLightingValue { value, .. } | Command::GetLightingValue { value } => {
                if !self.lighting_values.contains(value) {
                    return Err(CapabilityError::LightingValue { value: *value });
                }
            }
            _ => {}
        }
        Ok(())
    }
}
