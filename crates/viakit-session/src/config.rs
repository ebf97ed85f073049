//! Manager configuration.

use serde::{Deserialize, Serialize};
use viakit_client::{ClientConfig, DeviceProfile};

/// Settings for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Settings for every session the manager opens.
    pub client: ClientConfig,

    /// Known keyboard models. Devices without a profile get an empty one:
    /// no lighting values, unknown matrix.
    pub profiles: Vec<DeviceProfile>,
}

impl ManagerConfig {
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// The profile for `vendor_id:product_id`, or an empty one.
    pub fn profile_for(&self, vendor_id: u16, product_id: u16) -> DeviceProfile {
        self.profiles
            .iter()
            .find(|p| p.matches(vendor_id, product_id))
            .cloned()
            .unwrap_or_else(|| DeviceProfile::new(vendor_id, product_id))
    }
}
