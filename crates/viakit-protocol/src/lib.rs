//! Wire protocol for viakit.
//!
//! This crate defines what travels inside a VIA raw-HID report:
//!
//! - **Types** ([`Command`], [`Reply`], [`Response`], value ids and
//!   [`Feature`]s): one tagged variant per command id.
//! - **Codec** ([`ReportCodec`]): framing a command into a fixed-size
//!   report and interpreting the report that comes back.
//! - **Errors** ([`ProtocolError`]): replies that do not make sense.
//!
//! It does not own a device or wait for anything; that is the client's
//! job.
//!
//! ```text
//! Transport (reports) → Protocol (Command / Reply) → Client (session)
//! ```
//!
//! # Feature Flags
//!
//! - `sim`: [`sim::VirtualKeyboard`], firmware that runs against a
//!   [`viakit_transport::mock::MockPeer`]

mod codec;
mod error;
#[cfg(feature = "sim")]
pub mod sim;
mod types;

pub use codec::ReportCodec;
pub use error::ProtocolError;
pub use types::{
    opcode, Command, Feature, KeyboardValue, LightingValue, Reply, ReplyStatus, Response,
    BUFFER_HEADER_LEN,
};
