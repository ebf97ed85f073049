//! Integration tests for the in-memory backend, driven through the
//! [`HidBackend`] and [`HidDevice`] traits only.

use viakit_transport::mock::{pair_with_report_size, via_device_info, MockBackend};
use viakit_transport::{DeviceEvent, DeviceInfo, HidBackend, HidDevice, TransportError};

// =========================================================================
// Helpers
// =========================================================================

fn report(first: u8) -> Vec<u8> {
    let mut report = vec![0u8; 32];
    report[0] = first;
    report
}

async fn enumerated(backend: &MockBackend) -> Vec<DeviceInfo> {
    backend.enumerate().await.expect("enumerate")
}

// =========================================================================
// Backend
// =========================================================================

#[tokio::test]
async fn test_enumerate_lists_every_plugged_device() {
    let backend = MockBackend::new();
    let first = via_device_info(0x4653, 0x0001, "first");
    let second = via_device_info(0x4653, 0x0002, "second");
    let _p1 = backend.plug(first.clone());
    let _p2 = backend.plug(second.clone());

    let devices = enumerated(&backend).await;
    assert_eq!(devices, vec![first, second]);
    assert!(devices.iter().all(DeviceInfo::is_via_interface));
}

#[tokio::test]
async fn test_open_unattached_device_fails() {
    let backend = MockBackend::new();
    let info = via_device_info(1, 2, "ghost");

    let err = backend.open(&info).await.err().expect("not attached");
    assert!(matches!(err, TransportError::OpenFailed(_)));
}

#[tokio::test]
async fn test_reopened_device_shares_the_link() {
    let backend = MockBackend::new();
    let info = via_device_info(1, 2, "reopen");
    let mut peer = backend.plug(info.clone());

    let device = backend.open(&info).await.expect("open");
    device.write_report(&report(0x01)).await.expect("write");
    device.close().await.expect("close");
    assert_eq!(peer.next_write().await.expect("first write")[0], 0x01);

    let device = backend.open(&info).await.expect("reopen");
    peer.reply(&[0x02]).expect("reply");
    let read = device.read_report().await.expect("read").expect("report");
    assert_eq!(read[0], 0x02);
}

#[tokio::test]
async fn test_unplug_fails_writes_and_ends_reads() {
    let backend = MockBackend::new();
    let mut events = backend.subscribe();
    let info = via_device_info(1, 2, "unplug");
    let _peer = backend.plug(info.clone());
    let device = backend.open(&info).await.expect("open");

    assert!(backend.unplug(info.id));
    assert!(matches!(
        device.write_report(&report(0x01)).await,
        Err(TransportError::Disconnected)
    ));
    assert!(device.read_report().await.expect("read").is_none());

    assert_eq!(events.recv().await.expect("arrived"), DeviceEvent::Arrived(info.clone()));
    assert_eq!(events.recv().await.expect("removed"), DeviceEvent::Removed(info.id));
}

// =========================================================================
// Device pair
// =========================================================================

#[tokio::test]
async fn test_custom_report_size_is_enforced_both_ways() {
    let (device, peer) = pair_with_report_size(via_device_info(1, 2, "wide"), 64);
    assert_eq!(device.report_size(), 64);
    assert_eq!(peer.report_size(), 64);

    assert!(matches!(
        device.write_report(&report(0x01)).await,
        Err(TransportError::ReportSize { expected: 64, actual: 32 })
    ));
    assert!(matches!(
        peer.reply(&[0u8; 65]),
        Err(TransportError::ReportSize { expected: 64, actual: 65 })
    ));
}

#[tokio::test]
async fn test_reports_arrive_in_order() {
    let (device, peer) = pair_with_report_size(via_device_info(1, 2, "order"), 32);
    for first in 1..=3 {
        peer.reply(&[first]).expect("reply");
    }
    for first in 1..=3 {
        let read = device.read_report().await.expect("read").expect("report");
        assert_eq!(read[0], first);
    }
}
