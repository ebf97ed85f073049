//! Golden buffers pinning the macro wire format.
//!
//! Any change here is a change to what the firmware receives.

use viakit_macro::{
    decode, encode, DecodeError, EncodedMacroBuffer, KeycodeTable, MacroExpression, MacroToken,
    ValidationError,
};

fn encode_text(text: &str, version: u16) -> Vec<u8> {
    let expr = MacroExpression::parse(text, &KeycodeTable::basic(), version).expect("parse");
    encode(&expr, version).expect("encode").into_bytes()
}

// =========================================================================
// Protocol 11+
// =========================================================================

#[test]
fn test_golden_literal() {
    assert_eq!(encode_text("Hi!\n", 11), b"Hi!\n\x00");
}

#[test]
fn test_golden_tap_down_up_extended() {
    assert_eq!(
        encode_text("{KC_A}{+KC_LSFT}{-KC_LSFT}", 11),
        [0x01, 0x01, 0x04, 0x01, 0x02, 0xE1, 0x01, 0x03, 0xE1, 0x00]
    );
}

#[test]
fn test_golden_chord_releases_in_reverse() {
    assert_eq!(
        encode_text("{KC_LCTL,KC_LSFT,KC_ESC}", 12),
        [
            0x01, 0x02, 0xE0, 0x01, 0x02, 0xE1, 0x01, 0x02, 0x29, //
            0x01, 0x03, 0x29, 0x01, 0x03, 0xE1, 0x01, 0x03, 0xE0, //
            0x00
        ]
    );
}

#[test]
fn test_golden_delay() {
    // 1000 = 3 * 255 + 235
    assert_eq!(encode_text("{1000}", 11), [0x01, 0x04, 236, 4, 0x00]);
    assert_eq!(encode_text("{0}", 11), [0x01, 0x04, 1, 1, 0x00]);
    assert_eq!(encode_text("{255}", 11), [0x01, 0x04, 1, 2, 0x00]);
}

// =========================================================================
// Protocol < 11
// =========================================================================

#[test]
fn test_golden_tap_down_up_legacy() {
    assert_eq!(
        encode_text("x{KC_A}{+KC_LSFT}{-KC_LSFT}", 10),
        [b'x', 0x01, 0x04, 0x02, 0xE1, 0x03, 0xE1, 0x00]
    );
}

#[test]
fn test_golden_chord_legacy() {
    assert_eq!(
        encode_text("{KC_LALT,KC_TAB}", 9),
        [0x02, 0xE2, 0x02, 0x2B, 0x03, 0x2B, 0x03, 0xE2, 0x00]
    );
}

#[test]
fn test_delay_rejected_before_protocol_11() {
    let expr = MacroExpression::new(vec![MacroToken::Delay(10)]);
    assert!(matches!(
        encode(&expr, 10),
        Err(ValidationError::UnsupportedToken { index: 0, version: 10, .. })
    ));
}

// =========================================================================
// Decoding device buffers
// =========================================================================

#[test]
fn test_golden_decode_device_buffer() {
    let table = KeycodeTable::basic();
    let bytes = vec![
        b'o', b'k', 0x01, 0x01, 0x28, 0x00, // slot 0
        0x00, // slot 1
        0x01, 0x02, 0xE0, 0x01, 0x02, 0x06, 0x01, 0x03, 0x06, 0x01, 0x03, 0xE0, 0x00, // slot 2
        0x00, 0x00, 0x00,
    ];
    let slots = EncodedMacroBuffer::from_bytes(bytes)
        .decode_slots(3, 11)
        .expect("decode");
    let text: Vec<String> = slots.iter().map(|s| s.to_text(&table)).collect();
    assert_eq!(text, ["ok{KC_ENT}", "", "{KC_LCTL,KC_C}"]);
}

#[test]
fn test_decode_same_bytes_differ_by_version() {
    let bytes = [0x01, 0x01, 0x04, 0x00];
    // Protocol 11: prefixed tap of KC_A.
    assert_eq!(
        decode(&bytes, 11).expect("decode").tokens(),
        &[MacroToken::Tap(viakit_macro::Keycode(0x04))]
    );
    // Protocol 10: tap of 0x01, then a stray 0x04.
    assert_eq!(
        decode(&bytes, 10).unwrap_err(),
        DecodeError::UnexpectedByte { byte: 0x04, offset: 2 }
    );
}

#[test]
fn test_decode_never_returns_partial_expression() {
    // Valid literal followed by a cut-off delay.
    assert_eq!(
        decode(&[b'a', b'b', 0x01, 0x04, 0x05, 0x00], 11).unwrap_err(),
        DecodeError::Truncated { offset: 5 }
    );
}
