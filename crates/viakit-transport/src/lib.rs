//! HID transport abstraction layer for viakit.
//!
//! Provides the [`HidBackend`] and [`HidDevice`] traits that abstract over
//! the host's HID stack. The protocol client above only ever sees fixed-size
//! reports going out and coming back in.
//!
//! # Feature Flags
//!
//! - `mock`: in-memory backend and devices for tests and demos
//! - `hidapi`: real devices through the `hidapi` crate

mod error;
#[cfg(feature = "hidapi")]
mod native;
#[cfg(feature = "mock")]
pub mod mock;

pub use error::TransportError;
#[cfg(feature = "hidapi")]
pub use native::{HidapiBackend, HidapiDevice};

use std::fmt;
use std::future::Future;

use tokio::sync::broadcast;

/// HID usage page of the VIA raw interface.
pub const VIA_USAGE_PAGE: u16 = 0xFF60;

/// HID usage of the VIA raw interface.
pub const VIA_USAGE: u16 = 0x61;

/// Report size used by VIA firmware on every device class we know of.
pub const DEFAULT_REPORT_SIZE: usize = 32;

/// Opaque identifier for an attached device.
///
/// Stable only for the lifetime of the OS device handle: unplugging and
/// plugging the same keyboard back in yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Creates a new `DeviceId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hid-{}", self.0)
    }
}

/// What the backend knows about an attached HID interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Returns `true` if this interface is the VIA raw HID endpoint.
    pub fn is_via_interface(&self) -> bool {
        self.usage_page == VIA_USAGE_PAGE && self.usage == VIA_USAGE
    }

    /// Product name for display, falling back to the USB ids.
    pub fn display_name(&self) -> String {
        match &self.product {
            Some(name) => name.clone(),
            None => format!("{:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }
}

/// Hot-plug notification from a [`HidBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device was attached.
    Arrived(DeviceInfo),
    /// A device was detached. Any handle to it is now dead.
    Removed(DeviceId),
}

/// Enumerates, opens and watches HID devices.
///
/// Futures are `Send` so sessions can run on spawned Tokio tasks.
pub trait HidBackend: Send + Sync + 'static {
    /// The device handle produced by this backend.
    type Device: HidDevice;

    /// Lists every attached HID interface.
    fn enumerate(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceInfo>, TransportError>> + Send;

    /// Opens a device for exclusive report exchange.
    fn open(
        &self,
        info: &DeviceInfo,
    ) -> impl Future<Output = Result<Self::Device, TransportError>> + Send;

    /// Subscribes to hot-plug notifications.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

/// An open device that exchanges fixed-size reports.
pub trait HidDevice: Send + Sync + 'static {
    /// Writes one output report. `report` must be exactly
    /// [`report_size`](Self::report_size) bytes.
    fn write_report(
        &self,
        report: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next input report.
    ///
    /// Returns `Ok(None)` once the device has been unplugged. Must be
    /// cancel-safe: dropping the future never loses a report.
    fn read_report(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Releases the device.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Describes the device this handle is bound to.
    fn info(&self) -> &DeviceInfo;

    /// Size of every report in both directions.
    fn report_size(&self) -> usize {
        DEFAULT_REPORT_SIZE
    }
}
