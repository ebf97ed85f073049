//! The macro expression model.
//!
//! A [`MacroExpression`] is always held in canonical form, so two
//! expressions that make the keyboard emit the same key events compare
//! equal. Canonicalisation:
//!
//! 1. chords are expanded into their presses and releases,
//! 2. adjacent literals are merged and empty ones dropped,
//! 3. every run of two or more distinct key-downs that is immediately
//!    followed by the same keys released in reverse order is folded back
//!    into a [`MacroToken::Chord`].
//!
//! The byte decoder goes through the same constructor, which is what makes
//! `decode(encode(e)) == e` hold for every expression.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keycode::Keycode;

/// One step of a macro.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MacroToken {
    /// Text typed character by character.
    Literal(String),
    /// Press and release a key.
    Tap(Keycode),
    /// Press a key and keep it held.
    KeyDown(Keycode),
    /// Release a held key.
    KeyUp(Keycode),
    /// Press the keys in order, release them in reverse.
    Chord(Vec<Keycode>),
    /// Pause, in milliseconds. Needs protocol 11.
    Delay(u32),
}

impl MacroToken {
    /// Returns `true` for tokens that only protocol 11 and later can carry.
    pub fn needs_extended_encoding(&self) -> bool {
        matches!(self, MacroToken::Delay(_))
    }
}

/// Compact rendering with hex keycodes, used in diagnostics.
impl fmt::Display for MacroToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroToken::Literal(text) => write!(f, "{text:?}"),
            MacroToken::Tap(kc) => write!(f, "{{{kc}}}"),
            MacroToken::KeyDown(kc) => write!(f, "{{+{kc}}}"),
            MacroToken::KeyUp(kc) => write!(f, "{{-{kc}}}"),
            MacroToken::Chord(keys) => {
                f.write_str("{")?;
                for (i, kc) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{kc}")?;
                }
                f.write_str("}")
            }
            MacroToken::Delay(ms) => write!(f, "{{{ms}}}"),
        }
    }
}

/// An ordered, canonical sequence of [`MacroToken`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<MacroToken>", into = "Vec<MacroToken>")]
pub struct MacroExpression {
    tokens: Vec<MacroToken>,
}

impl MacroExpression {
    /// Builds an expression, canonicalising `tokens`.
    pub fn new(tokens: Vec<MacroToken>) -> Self {
        Self {
            tokens: fold_chords(merge_literals(expand_chords(tokens))),
        }
    }

    /// The empty macro.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[MacroToken] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<MacroToken> {
        self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if any token is a delay.
    pub fn has_delay(&self) -> bool {
        self.tokens.iter().any(MacroToken::needs_extended_encoding)
    }

    /// Lowest protocol version able to carry this expression.
    pub fn min_protocol_version(&self) -> u16 {
        if self.has_delay() {
            crate::codec::DELAY_PROTOCOL_VERSION
        } else {
            0
        }
    }
}

impl From<Vec<MacroToken>> for MacroExpression {
    fn from(tokens: Vec<MacroToken>) -> Self {
        Self::new(tokens)
    }
}

impl From<MacroExpression> for Vec<MacroToken> {
    fn from(expr: MacroExpression) -> Self {
        expr.tokens
    }
}

impl FromIterator<MacroToken> for MacroExpression {
    fn from_iter<I: IntoIterator<Item = MacroToken>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Canonicalisation
// ---------------------------------------------------------------------------

fn expand_chords(tokens: Vec<MacroToken>) -> Vec<MacroToken> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            MacroToken::Chord(keys) => {
                out.extend(keys.iter().copied().map(MacroToken::KeyDown));
                out.extend(keys.iter().rev().copied().map(MacroToken::KeyUp));
            }
            other => out.push(other),
        }
    }
    out
}

fn merge_literals(tokens: Vec<MacroToken>) -> Vec<MacroToken> {
    let mut out: Vec<MacroToken> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            MacroToken::Literal(text) if text.is_empty() => {}
            MacroToken::Literal(text) => {
                if let Some(MacroToken::Literal(prev)) = out.last_mut() {
                    prev.push_str(&text);
                } else {
                    out.push(MacroToken::Literal(text));
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn fold_chords(tokens: Vec<MacroToken>) -> Vec<MacroToken> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let Some(keys) = chord_at(&tokens, i) {
            i += keys.len() * 2;
            out.push(MacroToken::Chord(keys));
        } else {
            out.push(tokens[i].clone());
            i += 1;
        }
    }
    out
}

/// Matches the whole key-down run starting at `start` against the
/// releases that follow it.
fn chord_at(tokens: &[MacroToken], start: usize) -> Option<Vec<Keycode>> {
    let downs: Vec<Keycode> = tokens[start..]
        .iter()
        .map_while(|t| match t {
            MacroToken::KeyDown(kc) => Some(*kc),
            _ => None,
        })
        .collect();
    if downs.len() < 2 {
        return None;
    }
    for (i, kc) in downs.iter().enumerate() {
        if downs[..i].contains(kc) {
            return None;
        }
    }
    let ups = tokens.get(start + downs.len()..start + downs.len() * 2)?;
    let released_in_reverse = ups
        .iter()
        .zip(downs.iter().rev())
        .all(|(t, kc)| *t == MacroToken::KeyUp(*kc));
    released_in_reverse.then_some(downs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Keycode = Keycode(0x04);
    const B: Keycode = Keycode(0x05);
    const C: Keycode = Keycode(0x06);

    fn lit(s: &str) -> MacroToken {
        MacroToken::Literal(s.to_string())
    }

    #[test]
    fn test_new_merges_adjacent_literals() {
        let expr = MacroExpression::new(vec![lit("ab"), lit(""), lit("c"), MacroToken::Tap(A)]);
        assert_eq!(expr.tokens(), &[lit("abc"), MacroToken::Tap(A)]);
    }

    #[test]
    fn test_new_folds_press_release_run_into_chord() {
        let expr = MacroExpression::new(vec![
            MacroToken::KeyDown(A),
            MacroToken::KeyDown(B),
            MacroToken::KeyUp(B),
            MacroToken::KeyUp(A),
        ]);
        assert_eq!(expr.tokens(), &[MacroToken::Chord(vec![A, B])]);
    }

    #[test]
    fn test_new_keeps_held_prefix_outside_chord() {
        let expr = MacroExpression::new(vec![
            MacroToken::KeyDown(A),
            MacroToken::Chord(vec![B, C]),
        ]);
        assert_eq!(
            expr.tokens(),
            &[MacroToken::KeyDown(A), MacroToken::Chord(vec![B, C])]
        );
    }

    #[test]
    fn test_new_single_key_chord_becomes_down_up() {
        let expr = MacroExpression::new(vec![MacroToken::Chord(vec![A])]);
        assert_eq!(
            expr.tokens(),
            &[MacroToken::KeyDown(A), MacroToken::KeyUp(A)]
        );
    }

    #[test]
    fn test_new_out_of_order_release_is_not_a_chord() {
        let tokens = vec![
            MacroToken::KeyDown(A),
            MacroToken::KeyDown(B),
            MacroToken::KeyUp(A),
            MacroToken::KeyUp(B),
        ];
        let expr = MacroExpression::new(tokens.clone());
        assert_eq!(expr.tokens(), tokens.as_slice());
    }

    #[test]
    fn test_new_is_idempotent() {
        let expr = MacroExpression::new(vec![
            lit("x"),
            MacroToken::Chord(vec![A, B]),
            MacroToken::Chord(vec![]),
            lit("y"),
            MacroToken::Delay(10),
        ]);
        assert_eq!(MacroExpression::new(expr.tokens().to_vec()), expr);
    }

    #[test]
    fn test_has_delay() {
        assert!(!MacroExpression::new(vec![MacroToken::Tap(A)]).has_delay());
        assert!(MacroExpression::new(vec![MacroToken::Delay(0)]).has_delay());
    }

    #[test]
    fn test_serde_canonicalises_on_deserialize() {
        let json = r#"[{"type":"literal","value":"a"},{"type":"literal","value":"b"}]"#;
        let expr: MacroExpression = serde_json::from_str(json).expect("valid json");
        assert_eq!(expr.tokens(), &[lit("ab")]);
    }
}
