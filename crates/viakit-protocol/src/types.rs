//! Core protocol types for the VIA raw-HID wire format.
//!
//! Every exchange is one output report from the host followed by one input
//! report from the firmware. Byte 0 of both is the command id; the firmware
//! echoes it back, or replaces it with [`opcode::UNHANDLED`] when it does not
//! know the command. The rest of the reply is usually the request echoed
//! with values filled in.
//!
//! A layer-count query on a 32-byte report looks like this:
//!
//! ```text
//! host → 11 00 00 00 ... 00
//! fw   → 11 04 00 00 ... 00     four layers
//! ```
//!
//! and a macro buffer read of 28 bytes at offset 56:
//!
//! ```text
//! host → 0E 00 38 1C 00 ... 00
//! fw   → 0E 00 38 1C <28 bytes of buffer>
//! ```
//!
//! Buffer replies echo the offset and size header, which is how a short or
//! misdirected transfer is detected.
//!
//! The firmware does not tell the host which commands it knows. The host
//! infers that from the protocol version ([`Feature`]) and, for lighting,
//! from a device profile kept on the host.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Command ids
// ---------------------------------------------------------------------------

/// Command ids as carried in byte 0 of a report.
pub mod opcode {
    pub const GET_PROTOCOL_VERSION: u8 = 0x01;
    pub const GET_KEYBOARD_VALUE: u8 = 0x02;
    pub const SET_KEYBOARD_VALUE: u8 = 0x03;
    pub const DYNAMIC_KEYMAP_GET_KEYCODE: u8 = 0x04;
    pub const DYNAMIC_KEYMAP_SET_KEYCODE: u8 = 0x05;
    pub const DYNAMIC_KEYMAP_RESET: u8 = 0x06;
    /// `LIGHTING_SET_VALUE` before protocol 12, `CUSTOM_SET_VALUE` after.
    pub const CUSTOM_SET_VALUE: u8 = 0x07;
    /// `LIGHTING_GET_VALUE` before protocol 12, `CUSTOM_GET_VALUE` after.
    pub const CUSTOM_GET_VALUE: u8 = 0x08;
    /// `LIGHTING_SAVE` before protocol 12, `CUSTOM_SAVE` after.
    pub const CUSTOM_SAVE: u8 = 0x09;
    pub const EEPROM_RESET: u8 = 0x0A;
    pub const BOOTLOADER_JUMP: u8 = 0x0B;
    pub const DYNAMIC_KEYMAP_MACRO_GET_COUNT: u8 = 0x0C;
    pub const DYNAMIC_KEYMAP_MACRO_GET_BUFFER_SIZE: u8 = 0x0D;
    pub const DYNAMIC_KEYMAP_MACRO_GET_BUFFER: u8 = 0x0E;
    pub const DYNAMIC_KEYMAP_MACRO_SET_BUFFER: u8 = 0x0F;
    pub const DYNAMIC_KEYMAP_MACRO_RESET: u8 = 0x10;
    pub const DYNAMIC_KEYMAP_GET_LAYER_COUNT: u8 = 0x11;
    pub const DYNAMIC_KEYMAP_GET_BUFFER: u8 = 0x12;
    pub const DYNAMIC_KEYMAP_SET_BUFFER: u8 = 0x13;
    pub const DYNAMIC_KEYMAP_GET_ENCODER: u8 = 0x14;
    pub const DYNAMIC_KEYMAP_SET_ENCODER: u8 = 0x15;
    /// Written into byte 0 of a reply by firmware that does not know the
    /// command.
    pub const UNHANDLED: u8 = 0xFF;
}

/// Bytes of header in front of buffer data: opcode, offset (2), size.
pub const BUFFER_HEADER_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Value ids
// ---------------------------------------------------------------------------

/// Sub-commands of `GET_KEYBOARD_VALUE` / `SET_KEYBOARD_VALUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardValue {
    Uptime,
    LayoutOptions,
    SwitchMatrixState,
    FirmwareVersion,
    DeviceIndication,
}

impl KeyboardValue {
    pub fn id(self) -> u8 {
        match self {
            KeyboardValue::Uptime => 0x01,
            KeyboardValue::LayoutOptions => 0x02,
            KeyboardValue::SwitchMatrixState => 0x03,
            KeyboardValue::FirmwareVersion => 0x04,
            KeyboardValue::DeviceIndication => 0x05,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x01 => KeyboardValue::Uptime,
            0x02 => KeyboardValue::LayoutOptions,
            0x03 => KeyboardValue::SwitchMatrixState,
            0x04 => KeyboardValue::FirmwareVersion,
            0x05 => KeyboardValue::DeviceIndication,
            _ => return None,
        })
    }
}

/// Lighting settings addressable through the pre-12 lighting commands.
///
/// Ids `0x07..=0x0E` belong to the backlight / RGB matrix driver,
/// `0x80..=0x83` to the RGB light driver. Which of them a keyboard actually
/// implements is a property of its firmware build, recorded in the device
/// profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingValue {
    DisableWhenUsbSuspended,
    DisableAfterTimeout,
    Brightness,
    Effect,
    EffectSpeed,
    Color1,
    Color2,
    CapsLockIndicatorColor,
    RgblightBrightness,
    RgblightEffect,
    RgblightEffectSpeed,
    RgblightColor,
}

impl LightingValue {
    pub const ALL: [LightingValue; 12] = [
        LightingValue::DisableWhenUsbSuspended,
        LightingValue::DisableAfterTimeout,
        LightingValue::Brightness,
        LightingValue::Effect,
        LightingValue::EffectSpeed,
        LightingValue::Color1,
        LightingValue::Color2,
        LightingValue::CapsLockIndicatorColor,
        LightingValue::RgblightBrightness,
        LightingValue::RgblightEffect,
        LightingValue::RgblightEffectSpeed,
        LightingValue::RgblightColor,
    ];

    pub fn id(self) -> u8 {
        match self {
            LightingValue::DisableWhenUsbSuspended => 0x07,
            LightingValue::DisableAfterTimeout => 0x08,
            LightingValue::Brightness => 0x09,
            LightingValue::Effect => 0x0A,
            LightingValue::EffectSpeed => 0x0B,
            LightingValue::Color1 => 0x0C,
            LightingValue::Color2 => 0x0D,
            LightingValue::CapsLockIndicatorColor => 0x0E,
            LightingValue::RgblightBrightness => 0x80,
            LightingValue::RgblightEffect => 0x81,
            LightingValue::RgblightEffectSpeed => 0x82,
            LightingValue::RgblightColor => 0x83,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    /// Number of data bytes the value occupies: colors are hue and
    /// saturation, everything else is a single byte.
    pub fn value_len(self) -> usize {
        match self {
            LightingValue::Color1
            | LightingValue::Color2
            | LightingValue::CapsLockIndicatorColor
            | LightingValue::RgblightColor => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for LightingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.id())
    }
}

// ---------------------------------------------------------------------------
// Feature: what a protocol version can do
// ---------------------------------------------------------------------------

/// A protocol feature whose availability depends on the negotiated version.
///
/// | feature          | versions |
/// |------------------|----------|
/// | `KeymapBuffer`   | 9+       |
/// | `LegacyLighting` | 9..=11   |
/// | `Encoders`       | 10+      |
/// | `MacroDelay`     | 11+      |
/// | `CustomMenus`    | 12+      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// `{NNNN}` delays and the prefixed macro encoding.
    MacroDelay,
    /// `LIGHTING_*` commands with a bare value id.
    LegacyLighting,
    /// `CUSTOM_*` commands addressed by channel and value id.
    CustomMenus,
    /// `DYNAMIC_KEYMAP_GET_ENCODER` / `SET_ENCODER`.
    Encoders,
    /// `DYNAMIC_KEYMAP_GET_BUFFER` / `SET_BUFFER`.
    KeymapBuffer,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::MacroDelay,
        Feature::LegacyLighting,
        Feature::CustomMenus,
        Feature::Encoders,
        Feature::KeymapBuffer,
    ];

    /// Inclusive version range in which the feature exists.
    pub fn versions(self) -> (u16, Option<u16>) {
        match self {
            Feature::MacroDelay => (11, None),
            Feature::LegacyLighting => (9, Some(11)),
            Feature::CustomMenus => (12, None),
            Feature::Encoders => (10, None),
            Feature::KeymapBuffer => (9, None),
        }
    }

    /// Returns `true` if a device speaking `version` has the feature.
    ///
    /// ```
    /// use viakit_protocol::Feature;
    ///
    /// assert!(Feature::LegacyLighting.available_at(11));
    /// assert!(!Feature::LegacyLighting.available_at(12));
    /// assert!(Feature::CustomMenus.available_at(12));
    /// ```
    pub fn available_at(self, version: u16) -> bool {
        let (min, max) = self.versions();
        version >= min && max.is_none_or(|max| version <= max)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min, max) = self.versions();
        match max {
            Some(max) => write!(f, "{self:?} (protocol {min}..={max})"),
            None => write!(f, "{self:?} (protocol {min}+)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command: host → firmware
// ---------------------------------------------------------------------------

/// One request, tagged by command id.
///
/// Offsets and keycodes are big-endian on the wire. Buffer commands move at
/// most `report_size - 4` bytes; the codec rejects anything larger.
///
/// Lighting and custom-menu commands share command ids `0x07..=0x09`;
/// which meaning the firmware applies depends on its protocol version, so
/// callers check [`Command::required_feature`] against the negotiated
/// version before sending. Keymap entries are addressed by layer, row and
/// column; encoders by layer, encoder index and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetProtocolVersion,
    GetKeyboardValue { value: KeyboardValue },
    SetKeyboardValue { value: KeyboardValue, data: Vec<u8> },
    GetKeycode { layer: u8, row: u8, col: u8 },
    SetKeycode { layer: u8, row: u8, col: u8, keycode: u16 },
    ResetKeymap,
    SetLightingValue { value: LightingValue, data: Vec<u8> },
    GetLightingValue { value: LightingValue },
    SaveLighting,
    SetCustomValue { channel: u8, value_id: u8, data: Vec<u8> },
    GetCustomValue { channel: u8, value_id: u8 },
    SaveCustomValues { channel: u8 },
    ResetEeprom,
    JumpToBootloader,
    GetMacroCount,
    GetMacroBufferSize,
    GetMacroBuffer { offset: u16, size: u8 },
    SetMacroBuffer { offset: u16, data: Vec<u8> },
    ResetMacros,
    GetLayerCount,
    GetKeymapBuffer { offset: u16, size: u8 },
    SetKeymapBuffer { offset: u16, data: Vec<u8> },
    GetEncoder { layer: u8, encoder: u8, clockwise: bool },
    SetEncoder { layer: u8, encoder: u8, clockwise: bool, keycode: u16 },
}

impl Command {
    /// The command id written to byte 0.
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match self {
            Command::GetProtocolVersion => GET_PROTOCOL_VERSION,
            Command::GetKeyboardValue { .. } => GET_KEYBOARD_VALUE,
            Command::SetKeyboardValue { .. } => SET_KEYBOARD_VALUE,
            Command::GetKeycode { .. } => DYNAMIC_KEYMAP_GET_KEYCODE,
            Command::SetKeycode { .. } => DYNAMIC_KEYMAP_SET_KEYCODE,
            Command::ResetKeymap => DYNAMIC_KEYMAP_RESET,
            Command::SetLightingValue { .. } | Command::SetCustomValue { .. } => CUSTOM_SET_VALUE,
            Command::GetLightingValue { .. } | Command::GetCustomValue { .. } => CUSTOM_GET_VALUE,
            Command::SaveLighting | Command::SaveCustomValues { .. } => CUSTOM_SAVE,
            Command::ResetEeprom => EEPROM_RESET,
            Command::JumpToBootloader => BOOTLOADER_JUMP,
            Command::GetMacroCount => DYNAMIC_KEYMAP_MACRO_GET_COUNT,
            Command::GetMacroBufferSize => DYNAMIC_KEYMAP_MACRO_GET_BUFFER_SIZE,
            Command::GetMacroBuffer { .. } => DYNAMIC_KEYMAP_MACRO_GET_BUFFER,
            Command::SetMacroBuffer { .. } => DYNAMIC_KEYMAP_MACRO_SET_BUFFER,
            Command::ResetMacros => DYNAMIC_KEYMAP_MACRO_RESET,
            Command::GetLayerCount => DYNAMIC_KEYMAP_GET_LAYER_COUNT,
            Command::GetKeymapBuffer { .. } => DYNAMIC_KEYMAP_GET_BUFFER,
            Command::SetKeymapBuffer { .. } => DYNAMIC_KEYMAP_SET_BUFFER,
            Command::GetEncoder { .. } => DYNAMIC_KEYMAP_GET_ENCODER,
            Command::SetEncoder { .. } => DYNAMIC_KEYMAP_SET_ENCODER,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetProtocolVersion => "get_protocol_version",
            Command::GetKeyboardValue { .. } => "get_keyboard_value",
            Command::SetKeyboardValue { .. } => "set_keyboard_value",
            Command::GetKeycode { .. } => "get_keycode",
            Command::SetKeycode { .. } => "set_keycode",
            Command::ResetKeymap => "reset_keymap",
            Command::SetLightingValue { .. } => "set_lighting_value",
            Command::GetLightingValue { .. } => "get_lighting_value",
            Command::SaveLighting => "save_lighting",
            Command::SetCustomValue { .. } => "set_custom_value",
            Command::GetCustomValue { .. } => "get_custom_value",
            Command::SaveCustomValues { .. } => "save_custom_values",
            Command::ResetEeprom => "reset_eeprom",
            Command::JumpToBootloader => "jump_to_bootloader",
            Command::GetMacroCount => "get_macro_count",
            Command::GetMacroBufferSize => "get_macro_buffer_size",
            Command::GetMacroBuffer { .. } => "get_macro_buffer",
            Command::SetMacroBuffer { .. } => "set_macro_buffer",
            Command::ResetMacros => "reset_macros",
            Command::GetLayerCount => "get_layer_count",
            Command::GetKeymapBuffer { .. } => "get_keymap_buffer",
            Command::SetKeymapBuffer { .. } => "set_keymap_buffer",
            Command::GetEncoder { .. } => "get_encoder",
            Command::SetEncoder { .. } => "set_encoder",
        }
    }

    /// The feature the negotiated version must have for this command.
    pub fn required_feature(&self) -> Option<Feature> {
        match self {
            Command::SetLightingValue { .. }
            | Command::GetLightingValue { .. }
            | Command::SaveLighting => Some(Feature::LegacyLighting),
            Command::SetCustomValue { .. }
            | Command::GetCustomValue { .. }
            | Command::SaveCustomValues { .. } => Some(Feature::CustomMenus),
            Command::GetEncoder { .. } | Command::SetEncoder { .. } => Some(Feature::Encoders),
            Command::GetKeymapBuffer { .. } | Command::SetKeymapBuffer { .. } => {
                Some(Feature::KeymapBuffer)
            }
            _ => None,
        }
    }

    /// Returns `true` for lighting writes, which need time to settle.
    pub fn is_lighting_write(&self) -> bool {
        matches!(self, Command::SetLightingValue { .. })
    }

    /// The bytes following the command id.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Command::GetProtocolVersion
            | Command::ResetKeymap
            | Command::SaveLighting
            | Command::ResetEeprom
            | Command::JumpToBootloader
            | Command::GetMacroCount
            | Command::GetMacroBufferSize
            | Command::ResetMacros
            | Command::GetLayerCount => {}
            Command::GetKeyboardValue { value } => out.push(value.id()),
            Command::SetKeyboardValue { value, data } => {
                out.push(value.id());
                out.extend_from_slice(data);
            }
            Command::GetKeycode { layer, row, col } => out.extend_from_slice(&[*layer, *row, *col]),
            Command::SetKeycode {
                layer,
                row,
                col,
                keycode,
            } => {
                out.extend_from_slice(&[*layer, *row, *col]);
                out.extend_from_slice(&keycode.to_be_bytes());
            }
            Command::SetLightingValue { value, data } => {
                out.push(value.id());
                out.extend_from_slice(data);
            }
            Command::GetLightingValue { value } => out.push(value.id()),
            Command::SetCustomValue {
                channel,
                value_id,
                data,
            } => {
                out.extend_from_slice(&[*channel, *value_id]);
                out.extend_from_slice(data);
            }
            Command::GetCustomValue { channel, value_id } => {
                out.extend_from_slice(&[*channel, *value_id])
            }
            Command::SaveCustomValues { channel } => out.push(*channel),
            Command::GetMacroBuffer { offset, size } | Command::GetKeymapBuffer { offset, size } => {
                out.extend_from_slice(&offset.to_be_bytes());
                out.push(*size);
            }
            Command::SetMacroBuffer { offset, data } | Command::SetKeymapBuffer { offset, data } => {
                out.extend_from_slice(&offset.to_be_bytes());
                // The codec rejects data longer than a report before this
                // byte could wrap.
                out.push(data.len() as u8);
                out.extend_from_slice(data);
            }
            Command::GetEncoder {
                layer,
                encoder,
                clockwise,
            } => out.extend_from_slice(&[*layer, *encoder, u8::from(*clockwise)]),
            Command::SetEncoder {
                layer,
                encoder,
                clockwise,
                keycode,
            } => {
                out.extend_from_slice(&[*layer, *encoder, u8::from(*clockwise)]);
                out.extend_from_slice(&keycode.to_be_bytes());
            }
        }
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.opcode())
    }
}

// ---------------------------------------------------------------------------
// Reply: firmware → host
// ---------------------------------------------------------------------------

/// How the firmware answered, read from byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The firmware echoed this command id.
    Echo(u8),
    /// The firmware did not recognise the command.
    Unhandled,
}

/// One input report, split into status and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: ReplyStatus,
    /// Bytes `1..report_size` of the report.
    pub payload: Vec<u8>,
}

impl Reply {
    /// Returns `true` if this reply answers `command`.
    ///
    /// An unhandled reply answers whatever is in flight; VIA firmware
    /// overwrites only byte 0.
    pub fn answers(&self, command: &Command) -> bool {
        match self.status {
            ReplyStatus::Echo(op) => op == command.opcode(),
            ReplyStatus::Unhandled => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Response: typed view of a reply
// ---------------------------------------------------------------------------

/// A reply interpreted in light of the command it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The command had no data to return.
    Ack,
    ProtocolVersion(u16),
    KeyboardValue { value: KeyboardValue, data: Vec<u8> },
    Keycode(u16),
    LightingValue { value: LightingValue, data: Vec<u8> },
    CustomValue { channel: u8, value_id: u8, data: Vec<u8> },
    MacroCount(u8),
    MacroBufferSize(u16),
    LayerCount(u8),
    /// A chunk of macro or keymap memory.
    Buffer { offset: u16, data: Vec<u8> },
    Encoder(u16),
}

impl Response {
    /// Reads a big-endian `u32` from the start of keyboard value data,
    /// as used by uptime, layout options and firmware version.
    pub fn value_u32(data: &[u8]) -> Option<u32> {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}
