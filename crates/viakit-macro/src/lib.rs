//! VIA macro codec for viakit.
//!
//! Converts between three forms of a keyboard macro:
//!
//! - text a user edits (`Hello{KC_ENT}`), see [`MacroExpression::parse`]
//!   and [`MacroExpression::to_text`],
//! - the [`MacroExpression`] token model,
//! - the bytecode stored in the firmware's macro buffer, see [`encode`],
//!   [`decode`] and [`EncodedMacroBuffer`].
//!
//! The byte layout depends on the negotiated protocol version; see
//! [`codec`] for the table.
//!
//! # How a macro moves through the stack
//!
//! A user types `hi{KC_ENT}` into an editor. [`MacroExpression::parse`]
//! resolves `KC_ENT` against a [`KeycodeTable`], checks every plain
//! character against the ASCII keycode map, and refuses tokens the
//! device's protocol version cannot carry (delays before protocol 11).
//! The resulting expression is what the rest of the program works with:
//! it is canonical, so equal expressions always produce equal bytes.
//!
//! [`encode`] lays the expression out as firmware bytecode, one slot
//! ending in [`MACRO_TERMINATOR`]. A device holds all its slots back to
//! back in one buffer; [`EncodedMacroBuffer`] builds and splits that
//! buffer. Reading goes the other way: [`EncodedMacroBuffer::decode_slots`]
//! then [`MacroExpression::to_text`].
//!
//! ```
//! use viakit_macro::{decode, encode, Keycode, KeycodeTable, MacroExpression, MacroToken};
//!
//! let table = KeycodeTable::basic();
//! let expr = MacroExpression::parse("hi{KC_ENT}", &table, 11)?;
//! assert_eq!(
//!     expr.tokens(),
//!     &[MacroToken::Literal("hi".into()), MacroToken::Tap(Keycode(0x28))]
//! );
//!
//! let bytes = encode(&expr, 11)?;
//! assert_eq!(bytes.as_bytes(), b"hi\x01\x01\x28\x00");
//! assert_eq!(decode(bytes.as_bytes(), 11)?, expr);
//! assert_eq!(expr.to_text(&table), "hi{KC_ENT}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Nothing here talks to a device; the client crate moves the bytes.

mod buffer;
pub mod codec;
mod error;
mod expression;
mod keycode;
mod text;

pub use buffer::EncodedMacroBuffer;
pub use codec::{decode, encode, DELAY_PROTOCOL_VERSION, MACRO_TERMINATOR, MAX_DELAY_MS};
pub use error::{DecodeError, ValidationError};
pub use expression::{MacroExpression, MacroToken};
pub use keycode::{ascii_to_keycode, Keycode, KeycodeTable};
pub use text::{append_enter, strip_trailing_enter, ENTER_TOKEN};
