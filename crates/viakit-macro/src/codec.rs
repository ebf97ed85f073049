//! Macro bytecode.
//!
//! Literal characters travel as their ASCII byte. Key actions are
//! introduced by [`SS_QMK_PREFIX`]; protocol 11 added the prefix so that
//! an action code could follow it, older firmware reads the action code
//! directly:
//!
//! | token      | < 11     | ≥ 11                              |
//! |------------|----------|-----------------------------------|
//! | tap kc     | `01 kc`  | `01 01 kc`                        |
//! | down kc    | `02 kc`  | `01 02 kc`                        |
//! | up kc      | `03 kc`  | `01 03 kc`                        |
//! | delay ms   |          | `01 04 (ms%255+1) (ms/255+1)`     |
//! | end        | `00`     | `00`                              |
//!
//! Delay bytes are offset by one so that they never collide with the
//! terminator.

use crate::buffer::EncodedMacroBuffer;
use crate::error::{DecodeError, ValidationError};
use crate::expression::{MacroExpression, MacroToken};
use crate::keycode::{ascii_to_keycode, Keycode};

/// Ends every macro slot.
pub const MACRO_TERMINATOR: u8 = 0x00;

/// Introduces a key action on protocol 11 and later.
pub const SS_QMK_PREFIX: u8 = 0x01;

/// First protocol version with the prefixed encoding and delays.
pub const DELAY_PROTOCOL_VERSION: u16 = 11;

/// Largest delay the two-byte encoding can carry: `254 * 255 + 254`.
pub const MAX_DELAY_MS: u32 = 65_024;

const ACTION_TAP: u8 = 0x01;
const ACTION_DOWN: u8 = 0x02;
const ACTION_UP: u8 = 0x03;
const ACTION_DELAY: u8 = 0x04;

/// Encodes one expression as a single-slot buffer.
///
/// The result always ends in [`MACRO_TERMINATOR`]. Fails with a
/// [`ValidationError`] rather than dropping anything the version cannot
/// express:
///
/// - a delay below [`DELAY_PROTOCOL_VERSION`], or above [`MAX_DELAY_MS`]
/// - keycode `0x00`, which would end the slot early
/// - a literal character with no ASCII keycode
///
/// ```
/// use viakit_macro::{encode, Keycode, MacroExpression, MacroToken};
///
/// let tap = MacroExpression::new(vec![MacroToken::Tap(Keycode(0x04))]);
/// assert_eq!(encode(&tap, 10)?.as_bytes(), &[0x01, 0x04, 0x00]);
/// assert_eq!(encode(&tap, 11)?.as_bytes(), &[0x01, 0x01, 0x04, 0x00]);
///
/// let wait = MacroExpression::new(vec![MacroToken::Delay(300)]);
/// assert!(encode(&wait, 10).is_err());
/// # Ok::<(), viakit_macro::ValidationError>(())
/// ```
pub fn encode(
    expression: &MacroExpression,
    protocol_version: u16,
) -> Result<EncodedMacroBuffer, ValidationError> {
    let mut bytes = Vec::new();
    encode_into(expression, protocol_version, &mut bytes)?;
    Ok(EncodedMacroBuffer::from_bytes(bytes))
}

/// Decodes a single-slot buffer.
///
/// The slot must be terminated; anything after the terminator must be
/// zero padding. Decoding is all or nothing: a truncated action, an
/// unknown action code or a non-ASCII byte yields a [`DecodeError`]
/// carrying the offset, never a partial expression.
pub fn decode(buffer: &[u8], protocol_version: u16) -> Result<MacroExpression, DecodeError> {
    let end = buffer
        .iter()
        .position(|b| *b == MACRO_TERMINATOR)
        .ok_or(DecodeError::MissingTerminator { slot: 0 })?;
    if let Some(extra) = buffer[end..].iter().position(|b| *b != MACRO_TERMINATOR) {
        return Err(DecodeError::TrailingData { offset: end + extra });
    }
    decode_segment(&buffer[..end], 0, protocol_version)
}

/// Appends the bytes of `expression` and its terminator to `out`.
pub(crate) fn encode_into(
    expression: &MacroExpression,
    protocol_version: u16,
    out: &mut Vec<u8>,
) -> Result<(), ValidationError> {
    let extended = protocol_version >= DELAY_PROTOCOL_VERSION;
    for (index, token) in expression.tokens().iter().enumerate() {
        let invalid = |reason: &'static str| ValidationError::InvalidToken {
            index,
            token: token.to_string(),
            reason,
        };
        let action = |code: u8, kc: Keycode, out: &mut Vec<u8>| {
            if kc == Keycode::NO {
                return Err(invalid("keycode 0x00 is reserved"));
            }
            if extended {
                out.push(SS_QMK_PREFIX);
            }
            out.extend_from_slice(&[code, kc.byte()]);
            Ok(())
        };

        match token {
            MacroToken::Literal(text) => {
                for ch in text.chars() {
                    if ascii_to_keycode(ch).is_none() {
                        return Err(invalid("character cannot be typed"));
                    }
                    out.push(ch as u8);
                }
            }
            MacroToken::Tap(kc) => action(ACTION_TAP, *kc, out)?,
            MacroToken::KeyDown(kc) => action(ACTION_DOWN, *kc, out)?,
            MacroToken::KeyUp(kc) => action(ACTION_UP, *kc, out)?,
            MacroToken::Chord(keys) => {
                for kc in keys {
                    action(ACTION_DOWN, *kc, out)?;
                }
                for kc in keys.iter().rev() {
                    action(ACTION_UP, *kc, out)?;
                }
            }
            MacroToken::Delay(ms) => {
                if !extended {
                    return Err(ValidationError::UnsupportedToken {
                        index,
                        token: token.to_string(),
                        version: protocol_version,
                    });
                }
                if *ms > MAX_DELAY_MS {
                    return Err(invalid("delay exceeds 65024 ms"));
                }
                out.extend_from_slice(&[
                    SS_QMK_PREFIX,
                    ACTION_DELAY,
                    (ms % 255 + 1) as u8,
                    (ms / 255 + 1) as u8,
                ]);
            }
        }
    }
    out.push(MACRO_TERMINATOR);
    Ok(())
}

/// Decodes one unterminated slot body. `base` is the body's offset in the
/// enclosing buffer and only affects error offsets.
pub(crate) fn decode_segment(
    body: &[u8],
    base: usize,
    protocol_version: u16,
) -> Result<MacroExpression, DecodeError> {
    let extended = protocol_version >= DELAY_PROTOCOL_VERSION;
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut pos = 0;

    let arg = |at: usize| body.get(at).copied().ok_or(DecodeError::Truncated { offset: base + at });

    while pos < body.len() {
        let byte = body[pos];
        let action_at = if extended && byte == SS_QMK_PREFIX {
            Some(pos + 1)
        } else if !extended && matches!(byte, ACTION_TAP | ACTION_DOWN | ACTION_UP) {
            Some(pos)
        } else {
            None
        };

        let Some(action_at) = action_at else {
            if !is_literal_byte(byte) {
                return Err(DecodeError::UnexpectedByte {
                    byte,
                    offset: base + pos,
                });
            }
            literal.push(byte as char);
            pos += 1;
            continue;
        };

        if !literal.is_empty() {
            tokens.push(MacroToken::Literal(std::mem::take(&mut literal)));
        }
        let code = arg(action_at)?;
        match code {
            ACTION_TAP | ACTION_DOWN | ACTION_UP => {
                let kc = Keycode(arg(action_at + 1)?);
                tokens.push(match code {
                    ACTION_TAP => MacroToken::Tap(kc),
                    ACTION_DOWN => MacroToken::KeyDown(kc),
                    _ => MacroToken::KeyUp(kc),
                });
                pos = action_at + 2;
            }
            ACTION_DELAY if extended => {
                let lo = arg(action_at + 1)?;
                let hi = arg(action_at + 2)?;
                if lo == 0 || hi == 0 {
                    return Err(DecodeError::Truncated {
                        offset: base + action_at + 1,
                    });
                }
                let ms = (u32::from(lo) - 1) + (u32::from(hi) - 1) * 255;
                tokens.push(MacroToken::Delay(ms));
                pos = action_at + 3;
            }
            _ => {
                return Err(DecodeError::UnsupportedAction {
                    code,
                    offset: base + action_at,
                });
            }
        }
    }
    if !literal.is_empty() {
        tokens.push(MacroToken::Literal(literal));
    }
    Ok(MacroExpression::new(tokens))
}

fn is_literal_byte(byte: u8) -> bool {
    byte.is_ascii() && ascii_to_keycode(byte as char).is_some()
}
