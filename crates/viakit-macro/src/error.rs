//! Error types for the macro codec.
//!
//! Two families, mirroring the two directions of the codec:
//! [`ValidationError`] for text or tokens that cannot be encoded, and
//! [`DecodeError`] for bytes read back from a device that cannot be
//! decoded. Parse errors carry a character `position` in the source text;
//! encode errors carry the `index` of the offending token.

/// A macro expression that cannot be sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A `{` with no matching `}` before the next `{` or end of text.
    #[error("unclosed block at position {position}: missing '}}'")]
    UnclosedBlock { position: usize },

    /// `{}` with nothing inside.
    #[error("empty block at position {position}; use \\{{ to type a literal brace")]
    EmptyBlock { position: usize },

    /// Block content that matches no directive, e.g. `{+}` or `{+KC_A,KC_B}`.
    #[error("malformed block {{{text}}} at position {position}")]
    MalformedBlock { text: String, position: usize },

    /// A keycode name missing from the keycode table.
    #[error("unknown keycode {name} at position {position}")]
    UnknownKeycode { name: String, position: usize },

    /// A keycode whose byte collides with the slot terminator.
    #[error("keycode {name} at position {position} cannot be used in a macro")]
    ReservedKeycode { name: String, position: usize },

    /// The same key listed twice in one chord.
    #[error("keycode {name} appears twice in the chord at position {position}")]
    DuplicateKeycode { name: String, position: usize },

    /// A plain character with no ASCII-to-keycode mapping.
    #[error("character {ch:?} at position {position} cannot be typed")]
    UnsupportedCharacter { ch: char, position: usize },

    /// `{NNNN}` written for a device that predates delay support.
    #[error("delay {{{text}}} at position {position} needs protocol 11, device speaks {version}")]
    DelayUnsupported {
        text: String,
        position: usize,
        version: u16,
    },

    /// `{NNNN}` larger than the wire format can carry.
    #[error("delay {{{text}}} at position {position} exceeds {max} ms")]
    DelayOutOfRange {
        text: String,
        position: usize,
        max: u16,
    },

    /// A token the negotiated protocol cannot express.
    #[error("token {index} ({token}) is not supported by protocol {version}")]
    UnsupportedToken {
        index: usize,
        token: String,
        version: u16,
    },

    /// A token whose value cannot be encoded.
    #[error("token {index} ({token}) cannot be encoded: {reason}")]
    InvalidToken {
        index: usize,
        token: String,
        reason: &'static str,
    },

    /// The encoded macros do not fit the device's macro buffer.
    #[error("macros need {needed} bytes, device buffer holds {available}")]
    BufferOverflow { needed: usize, available: usize },
}

/// A macro buffer from the device that is not valid bytecode.
///
/// Decoding never returns a partially populated expression: any of these
/// discards the whole slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// An escape sequence cut short, by the end of the buffer or by a
    /// terminator where an argument byte was expected.
    #[error("truncated sequence at offset {offset}")]
    Truncated { offset: usize },

    /// An action code after the escape prefix that we do not understand.
    #[error("unsupported action 0x{code:02x} at offset {offset}")]
    UnsupportedAction { code: u8, offset: usize },

    /// A byte that is neither a printable character nor a control code.
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    /// The buffer ended before the slot's terminator.
    #[error("slot {slot} has no terminator")]
    MissingTerminator { slot: usize },

    /// Non-zero bytes after the terminator of a single-slot buffer.
    #[error("unexpected data after terminator at offset {offset}")]
    TrailingData { offset: usize },
}
