//! Per-device lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Where a device is in its lifecycle.
///
/// ```text
/// Discovered → Opening → Ready → Closed
///                 │                ▲
///                 └────────────────┘  (handshake failed)
/// ```
///
/// A `Closed` device that is still attached comes back as a new
/// `Discovered` entry on the next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Discovered,
    Opening,
    Ready,
    Closed,
}

impl DeviceState {
    /// Returns `true` if a session is open.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// The state that follows on success, `None` for `Closed`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Discovered => Some(Self::Opening),
            Self::Opening => Some(Self::Ready),
            Self::Ready => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (self == Self::Opening && target == Self::Closed)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Opening => write!(f, "Opening"),
            Self::Ready => write!(f, "Ready"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_follows_lifecycle() {
        assert_eq!(DeviceState::Discovered.next(), Some(DeviceState::Opening));
        assert_eq!(DeviceState::Opening.next(), Some(DeviceState::Ready));
        assert_eq!(DeviceState::Ready.next(), Some(DeviceState::Closed));
        assert_eq!(DeviceState::Closed.next(), None);
    }

    #[test]
    fn test_can_transition_to_never_skips_opening() {
        assert!(!DeviceState::Discovered.can_transition_to(DeviceState::Ready));
        assert!(!DeviceState::Discovered.can_transition_to(DeviceState::Closed));
        assert!(DeviceState::Opening.can_transition_to(DeviceState::Closed));
        assert!(DeviceState::Ready.can_transition_to(DeviceState::Closed));
        assert!(!DeviceState::Closed.can_transition_to(DeviceState::Discovered));
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceState::Opening.to_string(), "Opening");
    }
}
