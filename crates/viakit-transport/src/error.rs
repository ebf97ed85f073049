/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device is gone (unplugged, or the handle was closed).
    #[error("device disconnected")]
    Disconnected,

    /// Opening the device failed.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// Writing a report failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a report failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A report did not have the size the device expects.
    #[error("report must be {expected} bytes, got {actual}")]
    ReportSize {
        /// The device's fixed report size.
        expected: usize,
        /// The length that was supplied.
        actual: usize,
    },

    /// The HID backend itself failed (enumeration, initialisation).
    #[error("hid backend error: {0}")]
    Backend(String),
}
