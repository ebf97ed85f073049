//! Keycodes and the name ↔ byte table the text grammar resolves against.
//!
//! The table is supplied by the caller (VIA ships one per keyboard
//! definition version); [`KeycodeTable::basic`] covers the QMK basic
//! keycodes that every VIA firmware understands in macros.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single-byte keycode as carried in macro bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keycode(pub u8);

impl Keycode {
    /// `KC_NO`. Its byte is the slot terminator, so macros cannot carry it.
    pub const NO: Keycode = Keycode(0x00);

    /// `KC_ENT`.
    pub const ENTER: Keycode = Keycode(0x28);

    /// Returns the raw byte.
    pub fn byte(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Keycode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Symbolic keycode names mapped to bytes.
///
/// Lookups are case-insensitive. When several names share a byte, the
/// first one registered is used when rendering back to text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, u8>", into = "BTreeMap<String, u8>")]
pub struct KeycodeTable {
    by_name: HashMap<String, Keycode>,
    by_code: BTreeMap<Keycode, String>,
}

impl KeycodeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(name, byte)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, byte) in pairs {
            table.insert(name, Keycode(byte));
        }
        table
    }

    /// Registers a name. Re-registering a name overwrites its byte.
    ///
    /// If the name was the one rendered for its previous byte, that byte
    /// falls back to another alias (the alphabetically first), or loses
    /// its name when none is left. Rendering never yields a name that
    /// parses to a different byte.
    pub fn insert(&mut self, name: impl Into<String>, keycode: Keycode) {
        let name = name.into().to_ascii_uppercase();
        let previous = self.by_name.insert(name.clone(), keycode);
        if let Some(old) = previous.filter(|old| *old != keycode) {
            if self.by_code.get(&old) == Some(&name) {
                let alias = self
                    .by_name
                    .iter()
                    .filter(|(_, code)| **code == old)
                    .map(|(alias, _)| alias)
                    .min()
                    .cloned();
                match alias {
                    Some(alias) => self.by_code.insert(old, alias),
                    None => self.by_code.remove(&old),
                };
            }
        }
        self.by_code.entry(keycode).or_insert(name);
    }

    /// Resolves a name such as `KC_ENT` (any case).
    pub fn lookup(&self, name: &str) -> Option<Keycode> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// The canonical name for a byte, if the table has one.
    pub fn name_of(&self, keycode: Keycode) -> Option<&str> {
        self.by_code.get(&keycode).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// The QMK basic keycode set (HID usage page 0x07 plus modifiers).
    pub fn basic() -> Self {
        let mut table = Self::new();
        table.insert("KC_NO", Keycode::NO);
        for (i, letter) in ('A'..='Z').enumerate() {
            table.insert(format!("KC_{letter}"), Keycode(0x04 + i as u8));
        }
        for (i, digit) in ['1', '2', '3', '4', '5', '6', '7', '8', '9', '0'].iter().enumerate() {
            table.insert(format!("KC_{digit}"), Keycode(0x1E + i as u8));
        }
        for (i, n) in (1..=12).enumerate() {
            table.insert(format!("KC_F{n}"), Keycode(0x3A + i as u8));
        }
        for (i, n) in (13..=24).enumerate() {
            table.insert(format!("KC_F{n}"), Keycode(0x68 + i as u8));
        }
        for (i, n) in (1..=9).enumerate() {
            table.insert(format!("KC_P{n}"), Keycode(0x59 + i as u8));
        }

        const NAMED: &[(&str, u8)] = &[
            ("KC_ENT", 0x28),
            ("KC_ENTER", 0x28),
            ("KC_ESC", 0x29),
            ("KC_ESCAPE", 0x29),
            ("KC_BSPC", 0x2A),
            ("KC_BACKSPACE", 0x2A),
            ("KC_TAB", 0x2B),
            ("KC_SPC", 0x2C),
            ("KC_SPACE", 0x2C),
            ("KC_MINS", 0x2D),
            ("KC_EQL", 0x2E),
            ("KC_LBRC", 0x2F),
            ("KC_RBRC", 0x30),
            ("KC_BSLS", 0x31),
            ("KC_NUHS", 0x32),
            ("KC_SCLN", 0x33),
            ("KC_QUOT", 0x34),
            ("KC_GRV", 0x35),
            ("KC_COMM", 0x36),
            ("KC_DOT", 0x37),
            ("KC_SLSH", 0x38),
            ("KC_CAPS", 0x39),
            ("KC_PSCR", 0x46),
            ("KC_SCRL", 0x47),
            ("KC_PAUS", 0x48),
            ("KC_INS", 0x49),
            ("KC_HOME", 0x4A),
            ("KC_PGUP", 0x4B),
            ("KC_DEL", 0x4C),
            ("KC_END", 0x4D),
            ("KC_PGDN", 0x4E),
            ("KC_RGHT", 0x4F),
            ("KC_RIGHT", 0x4F),
            ("KC_LEFT", 0x50),
            ("KC_DOWN", 0x51),
            ("KC_UP", 0x52),
            ("KC_NUM", 0x53),
            ("KC_PSLS", 0x54),
            ("KC_PAST", 0x55),
            ("KC_PMNS", 0x56),
            ("KC_PPLS", 0x57),
            ("KC_PENT", 0x58),
            ("KC_P0", 0x62),
            ("KC_PDOT", 0x63),
            ("KC_NUBS", 0x64),
            ("KC_APP", 0x65),
            ("KC_PEQL", 0x67),
            ("KC_LCTL", 0xE0),
            ("KC_LSFT", 0xE1),
            ("KC_LALT", 0xE2),
            ("KC_LGUI", 0xE3),
            ("KC_RCTL", 0xE4),
            ("KC_RSFT", 0xE5),
            ("KC_RALT", 0xE6),
            ("KC_RGUI", 0xE7),
        ];
        for (name, byte) in NAMED {
            table.insert(*name, Keycode(*byte));
        }
        table
    }
}

impl From<BTreeMap<String, u8>> for KeycodeTable {
    fn from(map: BTreeMap<String, u8>) -> Self {
        Self::from_pairs(map)
    }
}

impl From<KeycodeTable> for BTreeMap<String, u8> {
    fn from(table: KeycodeTable) -> Self {
        table
            .by_name
            .into_iter()
            .map(|(name, code)| (name, code.0))
            .collect()
    }
}

/// Maps a typed character to the key that produces it.
///
/// Returns `(keycode, needs_shift)`, or `None` when the character cannot be
/// typed on a US layout. Characters outside this table are rejected from
/// macro text.
pub fn ascii_to_keycode(ch: char) -> Option<(Keycode, bool)> {
    let code = |b: u8| Keycode(b);
    match ch {
        'a'..='z' => Some((code(0x04 + (ch as u8 - b'a')), false)),
        'A'..='Z' => Some((code(0x04 + (ch as u8 - b'A')), true)),
        '1'..='9' => Some((code(0x1E + (ch as u8 - b'1')), false)),
        '0' => Some((code(0x27), false)),
        '\n' => Some((code(0x28), false)),
        '\t' => Some((code(0x2B), false)),
        ' ' => Some((code(0x2C), false)),
        '-' => Some((code(0x2D), false)),
        '=' => Some((code(0x2E), false)),
        '[' => Some((code(0x2F), false)),
        ']' => Some((code(0x30), false)),
        '\\' => Some((code(0x31), false)),
        ';' => Some((code(0x33), false)),
        '\'' => Some((code(0x34), false)),
        '`' => Some((code(0x35), false)),
        ',' => Some((code(0x36), false)),
        '.' => Some((code(0x37), false)),
        '/' => Some((code(0x38), false)),
        '!' => Some((code(0x1E), true)),
        '@' => Some((code(0x1F), true)),
        '#' => Some((code(0x20), true)),
        '$' => Some((code(0x21), true)),
        '%' => Some((code(0x22), true)),
        '^' => Some((code(0x23), true)),
        '&' => Some((code(0x24), true)),
        '*' => Some((code(0x25), true)),
        '(' => Some((code(0x26), true)),
        ')' => Some((code(0x27), true)),
        '_' => Some((code(0x2D), true)),
        '+' => Some((code(0x2E), true)),
        '{' => Some((code(0x2F), true)),
        '}' => Some((code(0x30), true)),
        '|' => Some((code(0x31), true)),
        ':' => Some((code(0x33), true)),
        '"' => Some((code(0x34), true)),
        '~' => Some((code(0x35), true)),
        '<' => Some((code(0x36), true)),
        '>' => Some((code(0x37), true)),
        '?' => Some((code(0x38), true)),
        _ => None,
    }
}
