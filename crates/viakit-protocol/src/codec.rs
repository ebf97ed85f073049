//! Report framing.
//!
//! [`ReportCodec`] turns a [`Command`] into one zero-padded output report
//! and turns an input report back into a [`Reply`], then into a typed
//! [`Response`] once the command it answers is known.

use crate::types::{BUFFER_HEADER_LEN, Command, Reply, ReplyStatus, Response, opcode};
use crate::ProtocolError;

/// Frames commands and parses replies for one report size.
///
/// The codec is stateless; one per device is enough. It does not wait for
/// anything: pairing a reply with its command is the caller's job.
///
/// ```
/// use viakit_protocol::{Command, ReportCodec, Response};
///
/// let codec = ReportCodec::new(32);
/// let report = codec.encode(&Command::GetLayerCount)?;
/// assert_eq!(report.len(), 32);
/// assert_eq!(report[0], 0x11);
///
/// let mut answer = vec![0u8; 32];
/// answer[0] = 0x11;
/// answer[1] = 4;
/// let reply = codec.decode_reply(&answer)?;
/// assert_eq!(
///     codec.interpret(&Command::GetLayerCount, &reply)?,
///     Response::LayerCount(4)
/// );
/// # Ok::<(), viakit_protocol::ProtocolError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportCodec {
    report_size: usize,
}

impl ReportCodec {
    /// Creates a codec for `report_size`-byte reports.
    ///
    /// Sizes below the buffer header plus one data byte are raised to that
    /// minimum.
    pub fn new(report_size: usize) -> Self {
        Self {
            report_size: report_size.max(BUFFER_HEADER_LEN + 1),
        }
    }

    pub fn report_size(&self) -> usize {
        self.report_size
    }

    /// Largest number of buffer bytes one exchange can move.
    pub fn max_chunk(&self) -> usize {
        (self.report_size - BUFFER_HEADER_LEN).min(u8::MAX as usize)
    }

    /// Encodes `command` as one report of exactly `report_size` bytes.
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        let payload = command.payload();
        let max = self.report_size - 1;
        let buffer_data = match command {
            Command::SetMacroBuffer { data, .. } | Command::SetKeymapBuffer { data, .. } => {
                Some(data.len())
            }
            Command::GetMacroBuffer { size, .. } | Command::GetKeymapBuffer { size, .. } => {
                Some(*size as usize)
            }
            _ => None,
        };
        if let Some(len) = buffer_data {
            if len > self.max_chunk() {
                return Err(ProtocolError::PayloadTooLarge {
                    command: command.name(),
                    len,
                    max: self.max_chunk(),
                });
            }
        }
        if payload.len() > max {
            return Err(ProtocolError::PayloadTooLarge {
                command: command.name(),
                len: payload.len(),
                max,
            });
        }

        let mut report = vec![0u8; self.report_size];
        report[0] = command.opcode();
        report[1..=payload.len()].copy_from_slice(&payload);
        tracing::trace!(command = %command, ?report, "encoded report");
        Ok(report)
    }

    /// Splits an input report into status and payload.
    pub fn decode_reply(&self, report: &[u8]) -> Result<Reply, ProtocolError> {
        if report.len() != self.report_size {
            return Err(ProtocolError::MalformedReply {
                command: "reply",
                reason: format!(
                    "report is {} bytes, expected {}",
                    report.len(),
                    self.report_size
                ),
            });
        }
        let status = match report[0] {
            opcode::UNHANDLED => ReplyStatus::Unhandled,
            op => ReplyStatus::Echo(op),
        };
        Ok(Reply {
            status,
            payload: report[1..].to_vec(),
        })
    }

    /// Interprets `reply` as the answer to `command`.
    pub fn interpret(&self, command: &Command, reply: &Reply) -> Result<Response, ProtocolError> {
        let name = command.name();
        match reply.status {
            ReplyStatus::Unhandled => {
                return Err(ProtocolError::Unhandled {
                    command: name,
                    opcode: command.opcode(),
                });
            }
            ReplyStatus::Echo(op) if op != command.opcode() => {
                return Err(malformed(name, format!("echoed command 0x{op:02x}")));
            }
            ReplyStatus::Echo(_) => {}
        }

        let p = &reply.payload;
        let response = match command {
            Command::GetProtocolVersion => Response::ProtocolVersion(be_u16(name, p, 0)?),
            Command::GetKeyboardValue { value } => {
                expect_echo(name, p, &[value.id()])?;
                Response::KeyboardValue {
                    value: *value,
                    data: p[1..].to_vec(),
                }
            }
            Command::GetKeycode { layer, row, col } => {
                expect_echo(name, p, &[*layer, *row, *col])?;
                Response::Keycode(be_u16(name, p, 3)?)
            }
            Command::GetLightingValue { value } => {
                expect_echo(name, p, &[value.id()])?;
                Response::LightingValue {
                    value: *value,
                    data: slice(name, p, 1, value.value_len())?.to_vec(),
                }
            }
            Command::GetCustomValue { channel, value_id } => {
                expect_echo(name, p, &[*channel, *value_id])?;
                Response::CustomValue {
                    channel: *channel,
                    value_id: *value_id,
                    data: p[2..].to_vec(),
                }
            }
            Command::GetMacroCount => Response::MacroCount(slice(name, p, 0, 1)?[0]),
            Command::GetMacroBufferSize => Response::MacroBufferSize(be_u16(name, p, 0)?),
            Command::GetLayerCount => Response::LayerCount(slice(name, p, 0, 1)?[0]),
            Command::GetMacroBuffer { offset, size } | Command::GetKeymapBuffer { offset, size } => {
                let size = *size as usize;
                expect_buffer_echo(name, p, *offset, size)?;
                Response::Buffer {
                    offset: *offset,
                    data: p[3..3 + size].to_vec(),
                }
            }
            Command::SetMacroBuffer { offset, data } | Command::SetKeymapBuffer { offset, data } => {
                expect_buffer_echo(name, p, *offset, data.len())?;
                Response::Ack
            }
            Command::GetEncoder {
                layer,
                encoder,
                clockwise,
            } => {
                expect_echo(name, p, &[*layer, *encoder, u8::from(*clockwise)])?;
                Response::Encoder(be_u16(name, p, 3)?)
            }
            Command::SetKeyboardValue { .. }
            | Command::SetKeycode { .. }
            | Command::ResetKeymap
            | Command::SetLightingValue { .. }
            | Command::SaveLighting
            | Command::SetCustomValue { .. }
            | Command::SaveCustomValues { .. }
            | Command::ResetEeprom
            | Command::JumpToBootloader
            | Command::ResetMacros
            | Command::SetEncoder { .. } => Response::Ack,
        };
        Ok(response)
    }
}

impl Default for ReportCodec {
    fn default() -> Self {
        Self::new(viakit_transport::DEFAULT_REPORT_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn malformed(command: &'static str, reason: String) -> ProtocolError {
    ProtocolError::MalformedReply { command, reason }
}

fn slice<'a>(
    command: &'static str,
    payload: &'a [u8],
    start: usize,
    len: usize,
) -> Result<&'a [u8], ProtocolError> {
    payload
        .get(start..start + len)
        .ok_or_else(|| malformed(command, format!("reply too short for bytes {start}..{}", start + len)))
}

fn be_u16(command: &'static str, payload: &[u8], start: usize) -> Result<u16, ProtocolError> {
    let b = slice(command, payload, start, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn expect_echo(command: &'static str, payload: &[u8], expected: &[u8]) -> Result<(), ProtocolError> {
    let echoed = slice(command, payload, 0, expected.len())?;
    if echoed != expected {
        return Err(malformed(
            command,
            format!("echoed {echoed:02x?}, expected {expected:02x?}"),
        ));
    }
    Ok(())
}

fn expect_buffer_echo(
    command: &'static str,
    payload: &[u8],
    offset: u16,
    size: usize,
) -> Result<(), ProtocolError> {
    let echoed_offset = be_u16(command, payload, 0)?;
    let echoed = slice(command, payload, 2, 1)?[0] as usize;
    let available = payload.len().saturating_sub(3);
    if echoed_offset != offset || echoed != size || available < size {
        return Err(ProtocolError::ShortTransfer {
            command,
            offset,
            requested: size,
            echoed_offset,
            echoed: echoed.min(available),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyboardValue, LightingValue};

    fn reply(codec: &ReportCodec, bytes: &[u8]) -> Reply {
        let mut report = vec![0u8; codec.report_size()];
        report[..bytes.len()].copy_from_slice(bytes);
        codec.decode_reply(&report).expect("reply")
    }

    #[test]
    fn test_encode_pads_to_report_size() {
        let codec = ReportCodec::default();
        let report = codec
            .encode(&Command::GetKeycode {
                layer: 0,
                row: 1,
                col: 2,
            })
            .expect("encode");
        assert_eq!(report.len(), 32);
        assert_eq!(&report[..4], &[0x04, 0, 1, 2]);
        assert!(report[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_rejects_oversized_chunk() {
        let codec = ReportCodec::default();
        assert_eq!(codec.max_chunk(), 28);
        let err = codec
            .encode(&Command::SetMacroBuffer {
                offset: 0,
                data: vec![1; 29],
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadTooLarge { len: 29, max: 28, .. }
        ));
        assert!(codec
            .encode(&Command::GetMacroBuffer { offset: 0, size: 29 })
            .is_err());
    }

    #[test]
    fn test_encode_rejects_oversized_custom_value() {
        let codec = ReportCodec::new(8);
        let err = codec
            .encode(&Command::SetCustomValue {
                channel: 1,
                value_id: 2,
                data: vec![0; 6],
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 8, max: 7, .. }));
    }

    #[test]
    fn test_decode_reply_rejects_wrong_length() {
        let codec = ReportCodec::default();
        assert!(matches!(
            codec.decode_reply(&[0x01, 0x00, 0x0b]),
            Err(ProtocolError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_interpret_protocol_version() {
        let codec = ReportCodec::default();
        let r = reply(&codec, &[0x01, 0x00, 0x0C]);
        assert_eq!(
            codec.interpret(&Command::GetProtocolVersion, &r),
            Ok(Response::ProtocolVersion(12))
        );
    }

    #[test]
    fn test_interpret_unhandled() {
        let codec = ReportCodec::default();
        let r = reply(&codec, &[0xFF, 0x00]);
        assert_eq!(
            codec.interpret(&Command::GetLayerCount, &r),
            Err(ProtocolError::Unhandled {
                command: "get_layer_count",
                opcode: 0x11
            })
        );
    }

    #[test]
    fn test_interpret_keycode_checks_position_echo() {
        let codec = ReportCodec::default();
        let cmd = Command::GetKeycode {
            layer: 1,
            row: 2,
            col: 3,
        };
        let good = reply(&codec, &[0x04, 1, 2, 3, 0x00, 0x29]);
        assert_eq!(codec.interpret(&cmd, &good), Ok(Response::Keycode(0x29)));
        let bad = reply(&codec, &[0x04, 1, 2, 4, 0x00, 0x29]);
        assert!(matches!(
            codec.interpret(&cmd, &bad),
            Err(ProtocolError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_interpret_buffer_short_transfer() {
        let codec = ReportCodec::default();
        let cmd = Command::GetMacroBuffer {
            offset: 28,
            size: 28,
        };
        let short = reply(&codec, &[0x0E, 0x00, 28, 20]);
        assert_eq!(
            codec.interpret(&cmd, &short),
            Err(ProtocolError::ShortTransfer {
                command: "get_macro_buffer",
                offset: 28,
                requested: 28,
                echoed_offset: 28,
                echoed: 20
            })
        );
        let mut full = vec![0x0E, 0x00, 28, 28];
        full.extend(1..=28u8);
        match codec.interpret(&cmd, &reply(&codec, &full)) {
            Ok(Response::Buffer { offset, data }) => {
                assert_eq!(offset, 28);
                assert_eq!(data, (1..=28u8).collect::<Vec<_>>());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_interpret_lighting_value_length() {
        let codec = ReportCodec::default();
        let cmd = Command::GetLightingValue {
            value: LightingValue::Color1,
        };
        let r = reply(&codec, &[0x08, 0x0C, 10, 200]);
        assert_eq!(
            codec.interpret(&cmd, &r),
            Ok(Response::LightingValue {
                value: LightingValue::Color1,
                data: vec![10, 200]
            })
        );
    }

    #[test]
    fn test_interpret_keyboard_value_u32() {
        let codec = ReportCodec::default();
        let cmd = Command::GetKeyboardValue {
            value: KeyboardValue::Uptime,
        };
        let r = reply(&codec, &[0x02, 0x01, 0x00, 0x01, 0x00, 0x00]);
        let Ok(Response::KeyboardValue { data, .. }) = codec.interpret(&cmd, &r) else {
            panic!("expected keyboard value");
        };
        assert_eq!(Response::value_u32(&data), Some(65_536));
    }
}
