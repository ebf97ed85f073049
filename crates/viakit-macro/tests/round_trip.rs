//! Seeded randomised round-trip tests for the macro codec.
//!
//! Expressions are generated from a fixed seed so failures reproduce.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use viakit_macro::{
    decode, encode, EncodedMacroBuffer, Keycode, KeycodeTable, MacroExpression, MacroToken,
    MAX_DELAY_MS,
};

// =========================================================================
// Helpers
// =========================================================================

const PRINTABLE: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~\n\t";

fn keycode(rng: &mut StdRng) -> Keycode {
    Keycode(rng.random_range(1..=0xFF))
}

fn token(rng: &mut StdRng, with_delay: bool) -> MacroToken {
    let kinds = if with_delay { 6 } else { 5 };
    match rng.random_range(0..kinds) {
        0 => {
            let len = rng.random_range(0..6);
            let text = (0..len)
                .map(|_| PRINTABLE[rng.random_range(0..PRINTABLE.len())] as char)
                .collect();
            MacroToken::Literal(text)
        }
        1 => MacroToken::Tap(keycode(rng)),
        2 => MacroToken::KeyDown(keycode(rng)),
        3 => MacroToken::KeyUp(keycode(rng)),
        4 => {
            let len = rng.random_range(0..5);
            MacroToken::Chord((0..len).map(|_| keycode(rng)).collect())
        }
        _ => MacroToken::Delay(rng.random_range(0..=MAX_DELAY_MS)),
    }
}

fn expression(rng: &mut StdRng, with_delay: bool) -> MacroExpression {
    let len = rng.random_range(0..12);
    (0..len).map(|_| token(rng, with_delay)).collect()
}

// =========================================================================
// Bytes
// =========================================================================

#[test]
fn test_byte_round_trip_extended_protocol() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0011);
    for _ in 0..2_000 {
        let expr = expression(&mut rng, true);
        let buffer = encode(&expr, 12).expect("encode");
        let decoded = decode(buffer.as_bytes(), 12).expect("decode");
        assert_eq!(decoded, expr, "bytes: {:02x?}", buffer.as_bytes());
    }
}

#[test]
fn test_byte_round_trip_legacy_protocol() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0009);
    for _ in 0..2_000 {
        let expr = expression(&mut rng, false);
        let buffer = encode(&expr, 9).expect("encode");
        let decoded = decode(buffer.as_bytes(), 9).expect("decode");
        assert_eq!(decoded, expr, "bytes: {:02x?}", buffer.as_bytes());
    }
}

#[test]
fn test_multi_slot_round_trip() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let count = rng.random_range(1..16);
        let slots: Vec<MacroExpression> = (0..count).map(|_| expression(&mut rng, true)).collect();
        let buffer = EncodedMacroBuffer::from_expressions(&slots, 11).expect("encode");
        assert_eq!(buffer.slot_count(), count);

        // Device memory is zero padded past the last slot.
        let mut padded = buffer.into_bytes();
        padded.resize(padded.len() + 64, 0);
        let decoded = EncodedMacroBuffer::from_bytes(padded)
            .decode_slots(count, 11)
            .expect("decode");
        assert_eq!(decoded, slots);
    }
}

// =========================================================================
// Text
// =========================================================================

#[test]
fn test_text_round_trip() {
    let table = KeycodeTable::basic();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..2_000 {
        let expr = expression(&mut rng, true);
        let text = expr.to_text(&table);
        let parsed = MacroExpression::parse(&text, &table, 11)
            .unwrap_or_else(|e| panic!("{text:?} failed to parse: {e}"));
        assert_eq!(parsed, expr, "text: {text:?}");
    }
}

#[test]
fn test_text_to_bytes_to_text_is_stable() {
    let table = KeycodeTable::basic();
    let source = "git commit -m \"wip\"{KC_ENT}{250}{KC_LCTL,KC_S}{+KC_LSFT}abc{-KC_LSFT}";
    let expr = MacroExpression::parse(source, &table, 11).expect("parse");
    let bytes = encode(&expr, 11).expect("encode");
    let text = decode(bytes.as_bytes(), 11).expect("decode").to_text(&table);
    assert_eq!(text, source);
}
