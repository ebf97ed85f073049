//! Error types for the protocol layer.
//!
//! A `ProtocolError` means the bytes were wrong: a command that cannot be
//! framed, or a reply that does not make sense for the command it answers.
//! Transport failures and timeouts live in other crates.

/// Errors that can occur while framing commands or interpreting replies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The command's payload does not fit in one report.
    #[error("{command}: payload of {len} bytes exceeds the {max} available")]
    PayloadTooLarge {
        command: &'static str,
        len: usize,
        max: usize,
    },

    /// The reply is the wrong size, or its echoed fields disagree with the
    /// request.
    #[error("{command}: malformed reply: {reason}")]
    MalformedReply {
        command: &'static str,
        reason: String,
    },

    /// The firmware answered with the unhandled marker.
    #[error("{command} (0x{opcode:02x}) is not handled by the firmware")]
    Unhandled { command: &'static str, opcode: u8 },

    /// A buffer reply echoed a different offset or size than requested.
    #[error(
        "{command}: requested {requested} bytes at offset {offset}, \
         device answered {echoed} bytes at offset {echoed_offset}"
    )]
    ShortTransfer {
        command: &'static str,
        offset: u16,
        requested: usize,
        echoed_offset: u16,
        echoed: usize,
    },
}
