//! Integration tests: the report codec against a virtual keyboard over the
//! mock transport.

use std::time::Duration;

use viakit_protocol::sim::{Fault, VirtualKeyboard};
use viakit_protocol::{Command, LightingValue, ReportCodec, Response};
use viakit_transport::mock::{pair, via_device_info};
use viakit_transport::{HidDevice, mock::MockDevice};

// =========================================================================
// Helpers
// =========================================================================

async fn exchange(device: &MockDevice, codec: &ReportCodec, command: &Command) -> Response {
    let report = codec.encode(command).expect("encode");
    device.write_report(&report).await.expect("write");
    let raw = device.read_report().await.expect("read").expect("report");
    let reply = codec.decode_reply(&raw).expect("reply");
    codec.interpret(command, &reply).expect("interpret")
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_virtual_keyboard_answers_handshake_commands() {
    let (device, peer) = pair(via_device_info(0x4653, 0x0001, "sim"));
    let _sim = VirtualKeyboard::new(12)
        .with_matrix(3, 4, 10)
        .with_macros(8, 512)
        .spawn(peer);
    let codec = ReportCodec::default();

    assert_eq!(
        exchange(&device, &codec, &Command::GetProtocolVersion).await,
        Response::ProtocolVersion(12)
    );
    assert_eq!(
        exchange(&device, &codec, &Command::GetLayerCount).await,
        Response::LayerCount(3)
    );
    assert_eq!(
        exchange(&device, &codec, &Command::GetMacroCount).await,
        Response::MacroCount(8)
    );
    assert_eq!(
        exchange(&device, &codec, &Command::GetMacroBufferSize).await,
        Response::MacroBufferSize(512)
    );
}

#[tokio::test]
async fn test_virtual_keyboard_keeps_keycode_writes() {
    let (device, peer) = pair(via_device_info(0x4653, 0x0002, "sim"));
    let sim = VirtualKeyboard::new(11).spawn(peer);
    let codec = ReportCodec::default();

    let set = Command::SetKeycode {
        layer: 1,
        row: 2,
        col: 3,
        keycode: 0x0029,
    };
    assert_eq!(exchange(&device, &codec, &set).await, Response::Ack);
    let get = Command::GetKeycode {
        layer: 1,
        row: 2,
        col: 3,
    };
    assert_eq!(exchange(&device, &codec, &get).await, Response::Keycode(0x0029));
    assert_eq!(sim.state().keycode(1, 2, 3), Some(0x0029));
}

#[tokio::test]
async fn test_virtual_keyboard_legacy_lighting() {
    let (device, peer) = pair(via_device_info(0x4653, 0x0003, "sim"));
    let sim = VirtualKeyboard::new(10).spawn(peer);
    let codec = ReportCodec::default();

    let set = Command::SetLightingValue {
        value: LightingValue::Brightness,
        data: vec![0x80],
    };
    exchange(&device, &codec, &set).await;
    exchange(&device, &codec, &Command::SaveLighting).await;

    let get = Command::GetLightingValue {
        value: LightingValue::Brightness,
    };
    assert_eq!(
        exchange(&device, &codec, &get).await,
        Response::LightingValue {
            value: LightingValue::Brightness,
            data: vec![0x80]
        }
    );
    assert_eq!(sim.state().lighting_saves(), 1);
}

#[tokio::test]
async fn test_stale_reply_fault_precedes_real_reply() {
    let (device, peer) = pair(via_device_info(0x4653, 0x0004, "sim"));
    let _sim = VirtualKeyboard::new(11)
        .with_fault(Fault::StaleReply)
        .spawn(peer);
    let codec = ReportCodec::default();

    let report = codec.encode(&Command::GetLayerCount).expect("encode");
    device.write_report(&report).await.expect("write");
    let first = device.read_report().await.expect("read").expect("report");
    let second = device.read_report().await.expect("read").expect("report");
    let stale = codec.decode_reply(&first).expect("reply");
    let real = codec.decode_reply(&second).expect("reply");
    assert!(!stale.answers(&Command::GetLayerCount));
    assert!(real.answers(&Command::GetLayerCount));
}

#[tokio::test(start_paused = true)]
async fn test_delay_fault_holds_reply() {
    let (device, peer) = pair(via_device_info(0x4653, 0x0005, "sim"));
    let _sim = VirtualKeyboard::new(11)
        .with_fault(Fault::Delay(Duration::from_secs(2)))
        .spawn(peer);
    let codec = ReportCodec::default();

    let report = codec.encode(&Command::GetProtocolVersion).expect("encode");
    device.write_report(&report).await.expect("write");
    let early = tokio::time::timeout(Duration::from_secs(1), device.read_report()).await;
    assert!(early.is_err(), "reply arrived before the delay elapsed");
    let late = tokio::time::timeout(Duration::from_secs(2), device.read_report()).await;
    assert!(late.is_ok());
}
