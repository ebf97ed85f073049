//! [`ProtocolSession`]: the public handle to one connected keyboard.
//!
//! A session is created by [`connect`], which spawns the session actor and
//! runs the handshake. The handle is cheap to clone; every clone talks to
//! the same actor and the commands they send are serialised in arrival
//! order.

use std::ops::Range;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use viakit_macro::{EncodedMacroBuffer, MacroExpression, ValidationError, MACRO_TERMINATOR};
use viakit_protocol::{
    Command, Feature, KeyboardValue, LightingValue, ProtocolError, Reply, ReportCodec, Response,
};
use viakit_transport::{DeviceId, DeviceInfo, HidDevice};

use crate::actor::{spawn_session, Request};
use crate::{Capabilities, CapabilityError, ClientConfig, ClientError, ConnectError, DeviceProfile};

/// Marks the last macro buffer byte while a write is in progress.
const MACRO_WRITE_IN_PROGRESS: u8 = 0xFF;

/// Buffer offsets travel as big-endian u16.
const BUFFER_OFFSET_SPACE: usize = u16::MAX as usize + 1;

/// Handle to an open device session.
#[derive(Clone)]
pub struct ProtocolSession {
    info: DeviceInfo,
    capabilities: Capabilities,
    profile: DeviceProfile,
    config: ClientConfig,
    codec: ReportCodec,
    sender: mpsc::Sender<Request>,
    closed: Arc<watch::Sender<bool>>,
}

/// Opens a protocol session on `device`.
///
/// Spawns the session actor, then reads the protocol version, layer
/// count, macro count and macro buffer size. The whole handshake is
/// bounded by [`ClientConfig::handshake_timeout`]. On failure the actor is
/// stopped and the device released; no session exists.
pub async fn connect<D: HidDevice>(
    device: D,
    config: &ClientConfig,
    profile: DeviceProfile,
) -> Result<ProtocolSession, ConnectError> {
    let info = device.info().clone();
    let codec = ReportCodec::new(device.report_size());
    let (closed, _) = watch::channel(false);
    let closed = Arc::new(closed);
    let sender = spawn_session(device, config, Arc::clone(&closed));
    tracing::info!(device = %info.id, product = %info.display_name(), "connecting");

    let handshake = handshake(&sender, &info, codec, config, &profile);
    let capabilities = match tokio::time::timeout(config.handshake_timeout(), handshake).await {
        Ok(Ok(capabilities)) => capabilities,
        Ok(Err(e)) => {
            closed.send_replace(true);
            tracing::warn!(device = %info.id, error = %e, "handshake failed");
            return Err(e);
        }
        Err(_) => {
            closed.send_replace(true);
            tracing::warn!(device = %info.id, "handshake timed out");
            return Err(ConnectError::Timeout {
                device: info.id,
                timeout: config.handshake_timeout(),
            });
        }
    };

    tracing::info!(
        device = %info.id,
        protocol = capabilities.protocol_version,
        layers = capabilities.layer_count,
        macros = capabilities.macro_count,
        macro_buffer = capabilities.macro_buffer_size,
        "session ready"
    );
    Ok(ProtocolSession {
        info,
        capabilities,
        profile,
        config: config.clone(),
        codec,
        sender,
        closed,
    })
}

async fn handshake(
    sender: &mpsc::Sender<Request>,
    info: &DeviceInfo,
    codec: ReportCodec,
    config: &ClientConfig,
    profile: &DeviceProfile,
) -> Result<Capabilities, ConnectError> {
    let device = info.id;
    let failed = |source: ClientError| ConnectError::Handshake { device, source };
    let ask = |command: Command| async move {
        let reply = submit(sender, device, command.clone()).await?;
        Ok::<_, ClientError>(codec.interpret(&command, &reply)?)
    };

    let protocol_version = match ask(Command::GetProtocolVersion).await.map_err(failed)? {
        Response::ProtocolVersion(v) => v,
        other => return Err(failed(unexpected("get_protocol_version", other))),
    };
    if protocol_version < config.min_protocol_version {
        return Err(ConnectError::UnsupportedVersion {
            device,
            version: protocol_version,
            min: config.min_protocol_version,
        });
    }
    tracing::debug!(%device, protocol_version, "protocol version negotiated");

    let layer_count = match ask(Command::GetLayerCount).await.map_err(failed)? {
        Response::LayerCount(n) => n,
        other => return Err(failed(unexpected("get_layer_count", other))),
    };
    let macro_count = match ask(Command::GetMacroCount).await.map_err(failed)? {
        Response::MacroCount(n) => n,
        other => return Err(failed(unexpected("get_macro_count", other))),
    };
    let macro_buffer_size = match ask(Command::GetMacroBufferSize).await.map_err(failed)? {
        Response::MacroBufferSize(n) => n,
        other => return Err(failed(unexpected("get_macro_buffer_size", other))),
    };

    Ok(Capabilities {
        protocol_version,
        layer_count,
        macro_count,
        macro_buffer_size,
        lighting_values: profile.lighting.iter().copied().collect(),
    })
}

/// Queues `command` on the actor and waits for its reply.
async fn submit(
    sender: &mpsc::Sender<Request>,
    device: DeviceId,
    command: Command,
) -> Result<Reply, ClientError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    sender
        .send(Request {
            command,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ClientError::ConnectionLost(device))?;
    reply_rx
        .await
        .map_err(|_| ClientError::ConnectionLost(device))?
}

fn unexpected(command: &'static str, response: Response) -> ClientError {
    ClientError::Device(ProtocolError::MalformedReply {
        command,
        reason: format!("unexpected response {response:?}"),
    })
}

fn out_of_range(what: &'static str, value: usize, limit: usize) -> ClientError {
    ClientError::OutOfRange { what, value, limit }
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

/// The two chunked memories the firmware exposes.
#[derive(Debug, Clone, Copy)]
enum BufferKind {
    Macro,
    Keymap,
}

impl BufferKind {
    fn read(self, offset: u16, size: u8) -> Command {
        match self {
            BufferKind::Macro => Command::GetMacroBuffer { offset, size },
            BufferKind::Keymap => Command::GetKeymapBuffer { offset, size },
        }
    }

    fn write(self, offset: u16, data: Vec<u8>) -> Command {
        match self {
            BufferKind::Macro => Command::SetMacroBuffer { offset, data },
            BufferKind::Keymap => Command::SetKeymapBuffer { offset, data },
        }
    }

    fn name(self) -> &'static str {
        match self {
            BufferKind::Macro => "macro buffer",
            BufferKind::Keymap => "keymap buffer",
        }
    }
}

impl ProtocolSession {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn device_id(&self) -> DeviceId {
        self.info.id
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn protocol_version(&self) -> u16 {
        self.capabilities.protocol_version
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the session. The in-flight command and everything queued
    /// behind it fail with [`ClientError::ConnectionLost`]. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!(device = %self.info.id, "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// A receiver that flips to `true` when the session closes for any
    /// reason, including device loss.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    // -- Raw exchange --------------------------------------------------------

    /// Sends one command and returns the firmware's raw reply.
    ///
    /// The command is checked against the negotiated capabilities first;
    /// a rejected command never reaches the device.
    pub async fn send(&self, command: Command) -> Result<Reply, ClientError> {
        self.capabilities.check(&command)?;
        submit(&self.sender, self.info.id, command).await
    }

    /// Sends one command and interprets the reply.
    pub async fn request(&self, command: Command) -> Result<Response, ClientError> {
        let reply = self.send(command.clone()).await?;
        Ok(self.codec.interpret(&command, &reply)?)
    }

    async fn ack(&self, command: Command) -> Result<(), ClientError> {
        match self.request(command).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("ack", other)),
        }
    }

    // -- Handshake values ----------------------------------------------------

    pub async fn get_protocol_version(&self) -> Result<u16, ClientError> {
        match self.request(Command::GetProtocolVersion).await? {
            Response::ProtocolVersion(v) => Ok(v),
            other => Err(unexpected("get_protocol_version", other)),
        }
    }

    pub async fn get_layer_count(&self) -> Result<u8, ClientError> {
        match self.request(Command::GetLayerCount).await? {
            Response::LayerCount(n) => Ok(n),
            other => Err(unexpected("get_layer_count", other)),
        }
    }

    pub async fn get_macro_count(&self) -> Result<u8, ClientError> {
        match self.request(Command::GetMacroCount).await? {
            Response::MacroCount(n) => Ok(n),
            other => Err(unexpected("get_macro_count", other)),
        }
    }

    pub async fn get_macro_buffer_size(&self) -> Result<u16, ClientError> {
        match self.request(Command::GetMacroBufferSize).await? {
            Response::MacroBufferSize(n) => Ok(n),
            other => Err(unexpected("get_macro_buffer_size", other)),
        }
    }

    // -- Keyboard values -----------------------------------------------------

    /// Reads a keyboard value. The returned bytes follow the value id.
    pub async fn get_keyboard_value(&self, value: KeyboardValue) -> Result<Vec<u8>, ClientError> {
        match self.request(Command::GetKeyboardValue { value }).await? {
            Response::KeyboardValue { data, .. } => Ok(data),
            other => Err(unexpected("get_keyboard_value", other)),
        }
    }

    async fn get_keyboard_u32(&self, value: KeyboardValue) -> Result<u32, ClientError> {
        let data = self.get_keyboard_value(value).await?;
        Response::value_u32(&data).ok_or_else(|| {
            ClientError::Device(ProtocolError::MalformedReply {
                command: "get_keyboard_value",
                reason: format!("{value:?} needs 4 bytes, got {}", data.len()),
            })
        })
    }

    /// Milliseconds since the firmware booted.
    pub async fn get_uptime(&self) -> Result<u32, ClientError> {
        self.get_keyboard_u32(KeyboardValue::Uptime).await
    }

    pub async fn get_firmware_version(&self) -> Result<u32, ClientError> {
        self.get_keyboard_u32(KeyboardValue::FirmwareVersion).await
    }

    /// The layout option bitfield.
    pub async fn get_layout_options(&self) -> Result<u32, ClientError> {
        self.get_keyboard_u32(KeyboardValue::LayoutOptions).await
    }

    pub async fn set_layout_options(&self, options: u32) -> Result<(), ClientError> {
        self.ack(Command::SetKeyboardValue {
            value: KeyboardValue::LayoutOptions,
            data: options.to_be_bytes().to_vec(),
        })
        .await
    }

    /// Raw switch matrix state, one bit per key.
    pub async fn get_switch_matrix_state(&self) -> Result<Vec<u8>, ClientError> {
        self.get_keyboard_value(KeyboardValue::SwitchMatrixState).await
    }

    // -- Keymap --------------------------------------------------------------

    fn check_key(&self, layer: u8, row: u8, col: u8) -> Result<(), ClientError> {
        let layers = self.capabilities.layer_count as usize;
        if layer as usize >= layers {
            return Err(out_of_range("layer", layer as usize, layers));
        }
        if let Some(matrix) = self.profile.matrix {
            if row >= matrix.rows {
                return Err(out_of_range("row", row as usize, matrix.rows as usize));
            }
            if col >= matrix.cols {
                return Err(out_of_range("column", col as usize, matrix.cols as usize));
            }
        }
        Ok(())
    }

    /// Reads the keycode at one keymap position.
    pub async fn get_keycode(&self, layer: u8, row: u8, col: u8) -> Result<u16, ClientError> {
        self.check_key(layer, row, col)?;
        match self.request(Command::GetKeycode { layer, row, col }).await? {
            Response::Keycode(kc) => Ok(kc),
            other => Err(unexpected("get_keycode", other)),
        }
    }

    /// Writes the keycode at one keymap position.
    pub async fn set_keycode(
        &self,
        layer: u8,
        row: u8,
        col: u8,
        keycode: u16,
    ) -> Result<(), ClientError> {
        self.check_key(layer, row, col)?;
        self.ack(Command::SetKeycode {
            layer,
            row,
            col,
            keycode,
        })
        .await?;
        tracing::debug!(device = %self.info.id, layer, row, col, keycode, "keycode written");
        Ok(())
    }

    /// Addressable size of the keymap buffer in bytes.
    ///
    /// The matrix size when the profile has one, never more than a u16
    /// offset can reach.
    fn keymap_len(&self) -> usize {
        self.profile
            .matrix
            .map_or(BUFFER_OFFSET_SPACE, |m| {
                self.capabilities.layer_count as usize * m.keys() * 2
            })
            .min(BUFFER_OFFSET_SPACE)
    }

    pub async fn get_keymap_buffer(&self, range: Range<usize>) -> Result<Vec<u8>, ClientError> {
        self.read_buffer(BufferKind::Keymap, range, self.keymap_len())
            .await
    }

    pub async fn set_keymap_buffer(&self, offset: usize, bytes: &[u8]) -> Result<(), ClientError> {
        self.write_buffer(BufferKind::Keymap, offset, bytes, self.keymap_len())
            .await
    }

    /// Reads one layer, row-major, using the profile's matrix size.
    ///
    /// Uses the bulk keymap buffer when the protocol version has it and
    /// falls back to one exchange per key otherwise.
    pub async fn read_layer(&self, layer: u8) -> Result<Vec<u16>, ClientError> {
        let matrix = self.profile.matrix.ok_or(ClientError::NoMatrix)?;
        let layers = self.capabilities.layer_count as usize;
        if layer as usize >= layers {
            return Err(out_of_range("layer", layer as usize, layers));
        }

        if self.capabilities.supports(Feature::KeymapBuffer) {
            let len = matrix.keys() * 2;
            let start = layer as usize * len;
            let bytes = self.get_keymap_buffer(start..start + len).await?;
            return Ok(bytes
                .chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect());
        }

        let mut keys = Vec::with_capacity(matrix.keys());
        for row in 0..matrix.rows {
            for col in 0..matrix.cols {
                keys.push(self.get_keycode(layer, row, col).await?);
            }
        }
        Ok(keys)
    }

    /// Restores the firmware's default keymap.
    pub async fn reset_keymap(&self) -> Result<(), ClientError> {
        self.ack(Command::ResetKeymap).await?;
        tracing::info!(device = %self.info.id, "keymap reset");
        Ok(())
    }

    pub async fn get_encoder(
        &self,
        layer: u8,
        encoder: u8,
        clockwise: bool,
    ) -> Result<u16, ClientError> {
        let command = Command::GetEncoder {
            layer,
            encoder,
            clockwise,
        };
        match self.request(command).await? {
            Response::Encoder(kc) => Ok(kc),
            other => Err(unexpected("get_encoder", other)),
        }
    }

    pub async fn set_encoder(
        &self,
        layer: u8,
        encoder: u8,
        clockwise: bool,
        keycode: u16,
    ) -> Result<(), ClientError> {
        self.ack(Command::SetEncoder {
            layer,
            encoder,
            clockwise,
            keycode,
        })
        .await
    }

    // -- Macros --------------------------------------------------------------

    /// Reads `range` of the macro buffer.
    pub async fn get_macro_buffer(&self, range: Range<usize>) -> Result<Vec<u8>, ClientError> {
        let limit = self.capabilities.macro_buffer_size as usize;
        self.read_buffer(BufferKind::Macro, range, limit).await
    }

    /// Writes `bytes` into the macro buffer at `offset`.
    pub async fn set_macro_buffer(&self, offset: usize, bytes: &[u8]) -> Result<(), ClientError> {
        let limit = self.capabilities.macro_buffer_size as usize;
        self.write_buffer(BufferKind::Macro, offset, bytes, limit).await
    }

    /// Reads and decodes every macro slot.
    ///
    /// Stops reading as soon as all slots have been seen, so a mostly
    /// empty buffer costs one or two exchanges.
    pub async fn read_macros(&self) -> Result<Vec<MacroExpression>, ClientError> {
        let count = self.capabilities.macro_count as usize;
        let size = self.capabilities.macro_buffer_size as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let step = self.codec.max_chunk();
        let mut bytes = Vec::new();
        let mut terminators = 0;
        while bytes.len() < size && terminators < count {
            let start = bytes.len();
            let chunk = self.get_macro_buffer(start..(start + step).min(size)).await?;
            terminators += chunk.iter().filter(|b| **b == MACRO_TERMINATOR).count();
            bytes.extend_from_slice(&chunk);
        }

        let macros = EncodedMacroBuffer::from_bytes(bytes)
            .decode_slots(count, self.capabilities.protocol_version)?;
        tracing::debug!(device = %self.info.id, count, "macros read");
        Ok(macros)
    }

    /// Replaces the macro buffer with `macros`, slot 0 first. Slots past
    /// the end of `macros` are left empty.
    pub async fn write_macros(&self, macros: &[MacroExpression]) -> Result<(), ClientError> {
        let version = self.capabilities.protocol_version;
        let count = self.capabilities.macro_count as usize;
        if macros.len() > count {
            return Err(out_of_range("macro slot count", macros.len(), count));
        }
        if macros.iter().any(MacroExpression::has_delay)
            && !self.capabilities.supports(Feature::MacroDelay)
        {
            return Err(CapabilityError::MacroDelay { version }.into());
        }

        let encoded = EncodedMacroBuffer::from_expressions(macros, version)?;
        let size = self.capabilities.macro_buffer_size as usize;
        let available = size.saturating_sub(1);
        if size == 0 || encoded.len() > available {
            return Err(ValidationError::BufferOverflow {
                needed: encoded.len(),
                available,
            }
            .into());
        }

        self.ack(Command::ResetMacros).await?;
        self.set_macro_buffer(available, &[MACRO_WRITE_IN_PROGRESS]).await?;
        self.set_macro_buffer(0, encoded.as_bytes()).await?;
        self.set_macro_buffer(available, &[0x00]).await?;
        tracing::info!(
            device = %self.info.id,
            slots = macros.len(),
            bytes = encoded.len(),
            "macros written"
        );
        Ok(())
    }

    /// Clears every macro slot.
    pub async fn reset_macros(&self) -> Result<(), ClientError> {
        self.ack(Command::ResetMacros).await?;
        tracing::info!(device = %self.info.id, "macros reset");
        Ok(())
    }

    async fn read_buffer(
        &self,
        kind: BufferKind,
        range: Range<usize>,
        limit: usize,
    ) -> Result<Vec<u8>, ClientError> {
        if range.start > range.end {
            return Err(out_of_range(kind.name(), range.start, range.end));
        }
        if range.end > limit {
            return Err(out_of_range(kind.name(), range.end, limit));
        }

        let step = self.codec.max_chunk();
        let mut out = Vec::with_capacity(range.len());
        let mut offset = range.start;
        while offset < range.end {
            let size = step.min(range.end - offset);
            let at = u16::try_from(offset)
                .map_err(|_| out_of_range(kind.name(), offset, BUFFER_OFFSET_SPACE))?;
            match self.request(kind.read(at, size as u8)).await? {
                Response::Buffer { data, .. } => out.extend_from_slice(&data),
                other => return Err(unexpected(kind.name(), other)),
            }
            offset += size;
        }
        tracing::trace!(device = %self.info.id, buffer = kind.name(), ?range, "buffer read");
        Ok(out)
    }

    async fn write_buffer(
        &self,
        kind: BufferKind,
        offset: usize,
        bytes: &[u8],
        limit: usize,
    ) -> Result<(), ClientError> {
        let end = offset.saturating_add(bytes.len());
        if end > limit {
            return Err(out_of_range(kind.name(), end, limit));
        }

        let step = self.codec.max_chunk();
        for (i, chunk) in bytes.chunks(step).enumerate() {
            let at = offset + i * step;
            let at = u16::try_from(at)
                .map_err(|_| out_of_range(kind.name(), at, BUFFER_OFFSET_SPACE))?;
            self.ack(kind.write(at, chunk.to_vec())).await?;
        }
        tracing::trace!(device = %self.info.id, buffer = kind.name(), offset, len = bytes.len(), "buffer written");
        Ok(())
    }

    // -- Lighting ------------------------------------------------------------

    pub async fn get_lighting_value(&self, value: LightingValue) -> Result<Vec<u8>, ClientError> {
        match self.request(Command::GetLightingValue { value }).await? {
            Response::LightingValue { data, .. } => Ok(data),
            other => Err(unexpected("get_lighting_value", other)),
        }
    }

    /// Writes a lighting value. Consecutive writes are spaced by the
    /// configured settle delay.
    pub async fn set_lighting_value(
        &self,
        value: LightingValue,
        data: &[u8],
    ) -> Result<(), ClientError> {
        if data.len() != value.value_len() {
            return Err(out_of_range("lighting value length", data.len(), value.value_len()));
        }
        self.ack(Command::SetLightingValue {
            value,
            data: data.to_vec(),
        })
        .await
    }

    /// Persists lighting values to EEPROM.
    pub async fn save_lighting(&self) -> Result<(), ClientError> {
        self.ack(Command::SaveLighting).await
    }

    // -- Custom menus --------------------------------------------------------

    pub async fn get_custom_value(&self, channel: u8, value_id: u8) -> Result<Vec<u8>, ClientError> {
        match self.request(Command::GetCustomValue { channel, value_id }).await? {
            Response::CustomValue { data, .. } => Ok(data),
            other => Err(unexpected("get_custom_value", other)),
        }
    }

    pub async fn set_custom_value(
        &self,
        channel: u8,
        value_id: u8,
        data: &[u8],
    ) -> Result<(), ClientError> {
        self.ack(Command::SetCustomValue {
            channel,
            value_id,
            data: data.to_vec(),
        })
        .await
    }

    pub async fn save_custom_values(&self, channel: u8) -> Result<(), ClientError> {
        self.ack(Command::SaveCustomValues { channel }).await
    }

    // -- Device control ------------------------------------------------------

    /// Clears keymap, macros and settings stored in EEPROM.
    pub async fn reset_eeprom(&self) -> Result<(), ClientError> {
        self.ack(Command::ResetEeprom).await?;
        tracing::info!(device = %self.info.id, "eeprom reset");
        Ok(())
    }

    /// Reboots the keyboard into its bootloader and closes the session.
    ///
    /// The firmware usually resets before answering, so a timeout or a
    /// lost connection counts as success.
    pub async fn jump_to_bootloader(&self) -> Result<(), ClientError> {
        let result = self.send(Command::JumpToBootloader).await;
        self.close();
        match result {
            Ok(_) | Err(ClientError::Timeout { .. }) | Err(ClientError::ConnectionLost(_)) => {
                tracing::info!(device = %self.info.id, "jumped to bootloader");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("device", &self.info.id)
            .field("capabilities", &self.capabilities)
            .field("closed", &self.is_closed())
            .finish()
    }
}
