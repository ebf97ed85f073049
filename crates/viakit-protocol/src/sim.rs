//! A virtual VIA keyboard on top of the mock transport.
//!
//! [`VirtualKeyboard`] answers reports the way QMK's VIA module does: the
//! request is echoed back with values filled in, unknown commands get
//! [`opcode::UNHANDLED`] in byte 0. [`Fault`]s make it misbehave on purpose
//! so clients can be tested against broken firmware.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use viakit_transport::mock::MockPeer;

use crate::types::{opcode, BUFFER_HEADER_LEN, KeyboardValue, LightingValue};

/// `KC_TRNS` in the QMK keycode space.
const KC_TRNS: u16 = 0x0001;

/// Ways the virtual keyboard can misbehave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Read reports but never answer.
    Silent,
    /// Answer this command id with the unhandled marker.
    Unhandled(u8),
    /// Echo half the requested size on buffer reads and writes.
    TruncateBuffers,
    /// Send an unrelated report before every real reply.
    StaleReply,
    /// Wait this long before each reply.
    Delay(Duration),
}

/// Firmware state of a simulated keyboard.
#[derive(Debug, Clone)]
pub struct VirtualKeyboard {
    protocol_version: u16,
    report_size: usize,
    layers: u8,
    rows: u8,
    cols: u8,
    keymap: Vec<u16>,
    encoders: u8,
    encoder_map: Vec<u16>,
    macro_count: u8,
    macro_buffer: Vec<u8>,
    lighting: BTreeMap<u8, Vec<u8>>,
    custom: BTreeMap<(u8, u8), Vec<u8>>,
    layout_options: u32,
    firmware_version: u32,
    booted_at: Instant,
    faults: Vec<Fault>,
    received: Vec<Vec<u8>>,
    lighting_saves: usize,
    custom_saves: usize,
    eeprom_resets: usize,
    bootloader_jumps: usize,
}

impl VirtualKeyboard {
    /// A 4-layer, 5×12 keyboard with 16 macros in 1 KiB and QMK backlight
    /// values.
    pub fn new(protocol_version: u16) -> Self {
        let mut kb = Self {
            protocol_version,
            report_size: viakit_transport::DEFAULT_REPORT_SIZE,
            layers: 4,
            rows: 5,
            cols: 12,
            keymap: Vec::new(),
            encoders: 2,
            encoder_map: Vec::new(),
            macro_count: 16,
            macro_buffer: vec![0; 1024],
            lighting: BTreeMap::new(),
            custom: BTreeMap::new(),
            layout_options: 0,
            firmware_version: 0x0001_0000,
            booted_at: Instant::now(),
            faults: Vec::new(),
            received: Vec::new(),
            lighting_saves: 0,
            custom_saves: 0,
            eeprom_resets: 0,
            bootloader_jumps: 0,
        };
        kb = kb.with_lighting(&[
            LightingValue::Brightness,
            LightingValue::Effect,
            LightingValue::EffectSpeed,
            LightingValue::Color1,
        ]);
        kb.reset_keymap();
        kb
    }

    pub fn with_matrix(mut self, layers: u8, rows: u8, cols: u8) -> Self {
        self.layers = layers;
        self.rows = rows;
        self.cols = cols;
        self.reset_keymap();
        self
    }

    pub fn with_encoders(mut self, encoders: u8) -> Self {
        self.encoders = encoders;
        self.reset_keymap();
        self
    }

    pub fn with_macros(mut self, count: u8, buffer_size: usize) -> Self {
        self.macro_count = count;
        self.macro_buffer = vec![0; buffer_size];
        self
    }

    /// Replaces the set of lighting values the firmware implements.
    pub fn with_lighting(mut self, values: &[LightingValue]) -> Self {
        self.lighting = values
            .iter()
            .map(|v| (v.id(), vec![0; v.value_len()]))
            .collect();
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn set_faults(&mut self, faults: Vec<Fault>) {
        self.faults = faults;
    }

    /// Every report received so far, in order.
    pub fn received(&self) -> &[Vec<u8>] {
        &self.received
    }

    pub fn keycode(&self, layer: u8, row: u8, col: u8) -> Option<u16> {
        self.key_index(layer, row, col).map(|i| self.keymap[i])
    }

    pub fn encoder(&self, layer: u8, encoder: u8, clockwise: bool) -> Option<u16> {
        self.encoder_index(layer, encoder, clockwise)
            .map(|i| self.encoder_map[i])
    }

    pub fn macro_buffer(&self) -> &[u8] {
        &self.macro_buffer
    }

    /// Overwrites macro memory from offset 0.
    pub fn load_macro_bytes(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.macro_buffer.len());
        self.macro_buffer[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn lighting(&self, value: LightingValue) -> Option<&[u8]> {
        self.lighting.get(&value.id()).map(Vec::as_slice)
    }

    pub fn custom_value(&self, channel: u8, value_id: u8) -> Option<&[u8]> {
        self.custom.get(&(channel, value_id)).map(Vec::as_slice)
    }

    pub fn layout_options(&self) -> u32 {
        self.layout_options
    }

    pub fn lighting_saves(&self) -> usize {
        self.lighting_saves
    }

    pub fn custom_saves(&self) -> usize {
        self.custom_saves
    }

    pub fn eeprom_resets(&self) -> usize {
        self.eeprom_resets
    }

    pub fn bootloader_jumps(&self) -> usize {
        self.bootloader_jumps
    }

    fn reset_keymap(&mut self) {
        let per_layer = self.rows as usize * self.cols as usize;
        self.keymap = (0..self.layers as usize * per_layer)
            .map(|i| {
                if i < per_layer {
                    0x04 + (i % 0x60) as u16
                } else {
                    KC_TRNS
                }
            })
            .collect();
        self.encoder_map = vec![KC_TRNS; self.layers as usize * self.encoders as usize * 2];
    }

    fn key_index(&self, layer: u8, row: u8, col: u8) -> Option<usize> {
        (layer < self.layers && row < self.rows && col < self.cols).then(|| {
            (layer as usize * self.rows as usize + row as usize) * self.cols as usize
                + col as usize
        })
    }

    fn encoder_index(&self, layer: u8, encoder: u8, clockwise: bool) -> Option<usize> {
        (layer < self.layers && encoder < self.encoders).then(|| {
            (layer as usize * self.encoders as usize + encoder as usize) * 2
                + usize::from(clockwise)
        })
    }

    fn keymap_bytes(&self) -> Vec<u8> {
        self.keymap.iter().flat_map(|kc| kc.to_be_bytes()).collect()
    }

    /// Processes one output report and returns the input reports to send
    /// back, in order. An empty vector means no answer.
    pub fn handle(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        self.received.push(request.to_vec());
        if self.faults.contains(&Fault::Silent) || request.is_empty() {
            return Vec::new();
        }

        let mut reply = request.to_vec();
        reply.resize(self.report_size, 0);
        let op = request[0];

        if self.faults.contains(&Fault::Unhandled(op)) {
            reply[0] = opcode::UNHANDLED;
        } else if !self.process(&mut reply) {
            reply[0] = opcode::UNHANDLED;
        }

        let mut out = Vec::with_capacity(2);
        if self.faults.contains(&Fault::StaleReply) {
            let mut stale = vec![0u8; self.report_size];
            stale[0] = op.wrapping_add(0x20);
            out.push(stale);
        }
        out.push(reply);
        out
    }

    /// Fills in `report`. Returns `false` if the command is not handled.
    fn process(&mut self, report: &mut [u8]) -> bool {
        let req = report.to_vec();
        let be16 = |at: usize| u16::from_be_bytes([req[at], req[at + 1]]);
        let truncate = self.faults.contains(&Fault::TruncateBuffers);
        let chunk_max = self.report_size - BUFFER_HEADER_LEN;

        match req[0] {
            opcode::GET_PROTOCOL_VERSION => {
                report[1..3].copy_from_slice(&self.protocol_version.to_be_bytes());
            }
            opcode::GET_KEYBOARD_VALUE => match KeyboardValue::from_id(req[1]) {
                Some(KeyboardValue::Uptime) => {
                    let ms = self.booted_at.elapsed().as_millis() as u32;
                    report[2..6].copy_from_slice(&ms.to_be_bytes());
                }
                Some(KeyboardValue::LayoutOptions) => {
                    report[2..6].copy_from_slice(&self.layout_options.to_be_bytes());
                }
                Some(KeyboardValue::FirmwareVersion) => {
                    report[2..6].copy_from_slice(&self.firmware_version.to_be_bytes());
                }
                Some(KeyboardValue::SwitchMatrixState) => report[2..].fill(0),
                _ => return false,
            },
            opcode::SET_KEYBOARD_VALUE => match KeyboardValue::from_id(req[1]) {
                Some(KeyboardValue::LayoutOptions) => {
                    self.layout_options = u32::from_be_bytes([req[2], req[3], req[4], req[5]]);
                }
                Some(KeyboardValue::DeviceIndication) => {}
                _ => return false,
            },
            opcode::DYNAMIC_KEYMAP_GET_KEYCODE => {
                let kc = self.keycode(req[1], req[2], req[3]).unwrap_or(0);
                report[4..6].copy_from_slice(&kc.to_be_bytes());
            }
            opcode::DYNAMIC_KEYMAP_SET_KEYCODE => {
                if let Some(i) = self.key_index(req[1], req[2], req[3]) {
                    self.keymap[i] = be16(4);
                }
            }
            opcode::DYNAMIC_KEYMAP_RESET => self.reset_keymap(),
            opcode::CUSTOM_SET_VALUE if self.protocol_version < 12 => {
                if let Some(stored) = self.lighting.get_mut(&req[1]) {
                    let len = stored.len();
                    stored.copy_from_slice(&req[2..2 + len]);
                }
            }
            opcode::CUSTOM_GET_VALUE if self.protocol_version < 12 => {
                if let Some(stored) = self.lighting.get(&req[1]) {
                    report[2..2 + stored.len()].copy_from_slice(stored);
                }
            }
            opcode::CUSTOM_SAVE if self.protocol_version < 12 => self.lighting_saves += 1,
            opcode::CUSTOM_SET_VALUE => {
                self.custom.insert((req[1], req[2]), req[3..].to_vec());
            }
            opcode::CUSTOM_GET_VALUE => {
                let stored = self.custom.get(&(req[1], req[2])).cloned().unwrap_or_default();
                let n = stored.len().min(report.len() - 3);
                report[3..3 + n].copy_from_slice(&stored[..n]);
            }
            opcode::CUSTOM_SAVE => self.custom_saves += 1,
            opcode::EEPROM_RESET => {
                self.eeprom_resets += 1;
                self.reset_keymap();
                self.macro_buffer.fill(0);
            }
            opcode::BOOTLOADER_JUMP => self.bootloader_jumps += 1,
            opcode::DYNAMIC_KEYMAP_MACRO_GET_COUNT => report[1] = self.macro_count,
            opcode::DYNAMIC_KEYMAP_MACRO_GET_BUFFER_SIZE => {
                let size = self.macro_buffer.len() as u16;
                report[1..3].copy_from_slice(&size.to_be_bytes());
            }
            opcode::DYNAMIC_KEYMAP_MACRO_GET_BUFFER | opcode::DYNAMIC_KEYMAP_GET_BUFFER => {
                let (offset, size) = (be16(1) as usize, req[3] as usize);
                if size > chunk_max {
                    return false;
                }
                let source = if req[0] == opcode::DYNAMIC_KEYMAP_GET_BUFFER {
                    self.keymap_bytes()
                } else {
                    self.macro_buffer.clone()
                };
                let data = &mut report[BUFFER_HEADER_LEN..BUFFER_HEADER_LEN + size];
                data.fill(0);
                if offset < source.len() {
                    let end = (offset + size).min(source.len());
                    data[..end - offset].copy_from_slice(&source[offset..end]);
                }
                if truncate {
                    report[3] = (size / 2) as u8;
                }
            }
            opcode::DYNAMIC_KEYMAP_MACRO_SET_BUFFER | opcode::DYNAMIC_KEYMAP_SET_BUFFER => {
                let (offset, size) = (be16(1) as usize, req[3] as usize);
                if size > chunk_max {
                    return false;
                }
                let written = if truncate { size / 2 } else { size };
                let data = &req[BUFFER_HEADER_LEN..BUFFER_HEADER_LEN + written];
                if req[0] == opcode::DYNAMIC_KEYMAP_SET_BUFFER {
                    let mut bytes = self.keymap_bytes();
                    write_clipped(&mut bytes, offset, data);
                    self.keymap = bytes
                        .chunks_exact(2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]]))
                        .collect();
                } else {
                    write_clipped(&mut self.macro_buffer, offset, data);
                }
                report[3] = written as u8;
            }
            opcode::DYNAMIC_KEYMAP_MACRO_RESET => self.macro_buffer.fill(0),
            opcode::DYNAMIC_KEYMAP_GET_LAYER_COUNT => report[1] = self.layers,
            opcode::DYNAMIC_KEYMAP_GET_ENCODER if self.protocol_version >= 10 => {
                let kc = self.encoder(req[1], req[2], req[3] != 0).unwrap_or(0);
                report[4..6].copy_from_slice(&kc.to_be_bytes());
            }
            opcode::DYNAMIC_KEYMAP_SET_ENCODER if self.protocol_version >= 10 => {
                if let Some(i) = self.encoder_index(req[1], req[2], req[3] != 0) {
                    self.encoder_map[i] = be16(4);
                }
            }
            _ => return false,
        }
        true
    }

    /// Runs the keyboard against `peer` on a Tokio task.
    pub fn spawn(self, mut peer: MockPeer) -> SimHandle {
        let state = Arc::new(StdMutex::new(self));
        let task_state = Arc::clone(&state);
        let device = peer.info().id;

        let task = tokio::spawn(async move {
            while let Some(request) = peer.next_write().await {
                let (replies, delay) = {
                    let mut kb = lock(&task_state);
                    let delay = kb.faults.iter().find_map(|f| match f {
                        Fault::Delay(d) => Some(*d),
                        _ => None,
                    });
                    (kb.handle(&request), delay)
                };
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                for reply in replies {
                    if peer.reply(&reply).is_err() {
                        return;
                    }
                }
            }
            tracing::debug!(%device, "virtual keyboard stopped");
        });

        SimHandle { state, task }
    }
}

fn write_clipped(target: &mut [u8], offset: usize, data: &[u8]) {
    if offset >= target.len() {
        return;
    }
    let end = (offset + data.len()).min(target.len());
    target[offset..end].copy_from_slice(&data[..end - offset]);
}

fn lock(state: &StdMutex<VirtualKeyboard>) -> MutexGuard<'_, VirtualKeyboard> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Access to a running [`VirtualKeyboard`].
pub struct SimHandle {
    state: Arc<StdMutex<VirtualKeyboard>>,
    task: JoinHandle<()>,
}

impl SimHandle {
    /// Locks the firmware state for inspection or modification.
    pub fn state(&self) -> MutexGuard<'_, VirtualKeyboard> {
        lock(&self.state)
    }

    pub fn set_faults(&self, faults: Vec<Fault>) {
        self.state().set_faults(faults);
    }

    /// Stops answering.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
