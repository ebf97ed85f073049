//! The device's macro memory: slots laid out back to back, each ended by
//! [`MACRO_TERMINATOR`].

use crate::codec::{decode_segment, encode_into, MACRO_TERMINATOR};
use crate::error::{DecodeError, ValidationError};
use crate::expression::MacroExpression;

/// Encoded macro bytes, one terminated segment per slot.
///
/// Slot `n` starts after the `n`th terminator; the firmware finds a macro
/// by counting terminators, so slots have no fixed size:
///
/// ```text
///  slot 0        slot 1   slot 2   padding
/// | h i 00 | 01 01 28 00 |   00   | 00 00 ...
/// ```
///
/// A device buffer is usually longer than the slots in use; the trailing
/// zeros read back as empty slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedMacroBuffer {
    bytes: Vec<u8>,
}

impl EncodedMacroBuffer {
    /// Wraps raw bytes, e.g. a buffer read back from a device.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encodes `expressions` into consecutive slots.
    pub fn from_expressions(
        expressions: &[MacroExpression],
        protocol_version: u16,
    ) -> Result<Self, ValidationError> {
        let mut bytes = Vec::new();
        for expression in expressions {
            encode_into(expression, protocol_version, &mut bytes)?;
        }
        Ok(Self { bytes })
    }

    /// Number of terminated slots in the buffer, padding included.
    pub fn slot_count(&self) -> usize {
        self.bytes.iter().filter(|b| **b == MACRO_TERMINATOR).count()
    }

    /// Decodes the first `count` slots.
    ///
    /// Bytes after the last requested slot are ignored. Fails as a whole if
    /// any requested slot is corrupt or missing its terminator.
    pub fn decode_slots(
        &self,
        count: usize,
        protocol_version: u16,
    ) -> Result<Vec<MacroExpression>, DecodeError> {
        let mut slots = Vec::with_capacity(count);
        let mut start = 0;
        for slot in 0..count {
            let len = self.bytes[start..]
                .iter()
                .position(|b| *b == MACRO_TERMINATOR)
                .ok_or(DecodeError::MissingTerminator { slot })?;
            let body = &self.bytes[start..start + len];
            slots.push(decode_segment(body, start, protocol_version)?);
            start += len + 1;
        }
        tracing::trace!(count, used = start, "decoded macro slots");
        Ok(slots)
    }

    /// Bytes up to and including the last terminator of `count` slots.
    pub fn used_len(&self, count: usize) -> Option<usize> {
        let mut seen = 0;
        for (i, b) in self.bytes.iter().enumerate() {
            if seen == count {
                return Some(i);
            }
            if *b == MACRO_TERMINATOR {
                seen += 1;
            }
        }
        (seen == count).then_some(self.bytes.len())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for EncodedMacroBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for EncodedMacroBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
