//! The editable text form of a macro.
//!
//! ```text
//! Hello{KC_ENT}          literal text, then tap Enter
//! {+KC_LSFT}a{-KC_LSFT}  hold shift around a literal
//! {KC_LCTL,KC_C}         chord: press in order, release in reverse
//! {250}                  pause 250 ms (protocol 11+)
//! \{ \\                  literal brace and backslash
//! ```
//!
//! Keycode names are resolved against a [`KeycodeTable`], case-insensitive.
//! `0xNN` is accepted anywhere a name is, so that every decoded macro has a
//! text form even when the table lacks a name for one of its keys.

use crate::codec::{DELAY_PROTOCOL_VERSION, MAX_DELAY_MS};
use crate::error::ValidationError;
use crate::expression::{MacroExpression, MacroToken};
use crate::keycode::{ascii_to_keycode, Keycode, KeycodeTable};

/// Token appended by [`append_enter`].
pub const ENTER_TOKEN: &str = "{KC_ENT}";

impl MacroExpression {
    /// Parses macro text for a device speaking `protocol_version`.
    pub fn parse(
        text: &str,
        table: &KeycodeTable,
        protocol_version: u16,
    ) -> Result<Self, ValidationError> {
        Parser {
            chars: text.chars().collect(),
            table,
            protocol_version,
        }
        .run()
    }

    /// Renders the expression back to text.
    ///
    /// Keys missing from `table` are written as `0xNN`.
    pub fn to_text(&self, table: &KeycodeTable) -> String {
        let name = |kc: Keycode| match table.name_of(kc) {
            Some(name) => name.to_string(),
            None => format!("0x{:02X}", kc.byte()),
        };
        let mut out = String::new();
        for token in self.tokens() {
            match token {
                MacroToken::Literal(text) => {
                    for ch in text.chars() {
                        if ch == '{' || ch == '\\' {
                            out.push('\\');
                        }
                        out.push(ch);
                    }
                }
                MacroToken::Tap(kc) => out.push_str(&format!("{{{}}}", name(*kc))),
                MacroToken::KeyDown(kc) => out.push_str(&format!("{{+{}}}", name(*kc))),
                MacroToken::KeyUp(kc) => out.push_str(&format!("{{-{}}}", name(*kc))),
                MacroToken::Chord(keys) => {
                    let names: Vec<String> = keys.iter().map(|kc| name(*kc)).collect();
                    out.push_str(&format!("{{{}}}", names.join(",")));
                }
                MacroToken::Delay(ms) => out.push_str(&format!("{{{ms}}}")),
            }
        }
        out
    }
}

/// Adds a trailing Enter tap to macro text.
pub fn append_enter(text: &str) -> String {
    format!("{text}{ENTER_TOKEN}")
}

/// Splits a trailing Enter tap off macro text.
///
/// Trailing whitespace is trimmed first. Returns the remaining text and
/// whether an Enter tap was removed.
pub fn strip_trailing_enter(text: &str) -> (&str, bool) {
    let trimmed = text.trim_end();
    match trimmed.strip_suffix(ENTER_TOKEN) {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    table: &'a KeycodeTable,
    protocol_version: u16,
}

impl Parser<'_> {
    fn run(self) -> Result<MacroExpression, ValidationError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut pos = 0;

        while pos < self.chars.len() {
            match self.chars[pos] {
                '\\' if matches!(self.chars.get(pos + 1), Some('{' | '\\')) => {
                    literal.push(self.chars[pos + 1]);
                    pos += 2;
                }
                '{' => {
                    let close = self.find_close(pos)?;
                    let content: String = self.chars[pos + 1..close].iter().collect();
                    if !literal.is_empty() {
                        tokens.push(MacroToken::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(self.block(&content, pos)?);
                    pos = close + 1;
                }
                ch => {
                    if ascii_to_keycode(ch).is_none() {
                        return Err(ValidationError::UnsupportedCharacter { ch, position: pos });
                    }
                    literal.push(ch);
                    pos += 1;
                }
            }
        }
        if !literal.is_empty() {
            tokens.push(MacroToken::Literal(literal));
        }
        Ok(MacroExpression::new(tokens))
    }

    fn find_close(&self, open: usize) -> Result<usize, ValidationError> {
        for (i, ch) in self.chars.iter().enumerate().skip(open + 1) {
            match ch {
                '}' => return Ok(i),
                '{' => break,
                _ => {}
            }
        }
        Err(ValidationError::UnclosedBlock { position: open })
    }

    fn block(&self, content: &str, position: usize) -> Result<MacroToken, ValidationError> {
        let inner = content.trim();
        if inner.is_empty() {
            return Err(ValidationError::EmptyBlock { position });
        }
        let malformed = || ValidationError::MalformedBlock {
            text: content.to_string(),
            position,
        };

        if inner.bytes().all(|b| b.is_ascii_digit()) {
            return self.delay(inner, position);
        }

        if let Some(rest) = inner.strip_prefix('+').or_else(|| inner.strip_prefix('-')) {
            let rest = rest.trim();
            if rest.is_empty() || rest.contains(',') {
                return Err(malformed());
            }
            let kc = self.keycode(rest, position)?;
            return Ok(if inner.starts_with('+') {
                MacroToken::KeyDown(kc)
            } else {
                MacroToken::KeyUp(kc)
            });
        }

        if inner.contains(',') {
            let mut keys: Vec<Keycode> = Vec::new();
            for name in inner.split(',').map(str::trim) {
                if name.is_empty() {
                    return Err(malformed());
                }
                let kc = self.keycode(name, position)?;
                if keys.contains(&kc) {
                    return Err(ValidationError::DuplicateKeycode {
                        name: name.to_string(),
                        position,
                    });
                }
                keys.push(kc);
            }
            return Ok(MacroToken::Chord(keys));
        }

        Ok(MacroToken::Tap(self.keycode(inner, position)?))
    }

    fn delay(&self, digits: &str, position: usize) -> Result<MacroToken, ValidationError> {
        if self.protocol_version < DELAY_PROTOCOL_VERSION {
            return Err(ValidationError::DelayUnsupported {
                text: digits.to_string(),
                position,
                version: self.protocol_version,
            });
        }
        match digits.parse::<u32>() {
            Ok(ms) if ms <= MAX_DELAY_MS => Ok(MacroToken::Delay(ms)),
            _ => Err(ValidationError::DelayOutOfRange {
                text: digits.to_string(),
                position,
                max: MAX_DELAY_MS as u16,
            }),
        }
    }

    fn keycode(&self, name: &str, position: usize) -> Result<Keycode, ValidationError> {
        let hex = name
            .strip_prefix("0x")
            .or_else(|| name.strip_prefix("0X"))
            .and_then(|digits| u8::from_str_radix(digits, 16).ok());
        let kc = hex
            .map(Keycode)
            .or_else(|| self.table.lookup(name))
            .ok_or_else(|| ValidationError::UnknownKeycode {
                name: name.to_string(),
                position,
            })?;
        if kc == Keycode::NO {
            return Err(ValidationError::ReservedKeycode {
                name: name.to_string(),
                position,
            });
        }
        Ok(kc)
    }
}
