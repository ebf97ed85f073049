//! In-memory HID backend.
//!
//! Each plugged device is a pair of channels: the host side is a
//! [`MockDevice`] (what the protocol client talks to), the firmware side
//! is a [`MockPeer`] (what a test or a virtual keyboard drives).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc, watch, Mutex};

use crate::{
    DeviceEvent, DeviceId, DeviceInfo, HidBackend, HidDevice, TransportError,
    DEFAULT_REPORT_SIZE, VIA_USAGE, VIA_USAGE_PAGE,
};

/// Counter for generating unique device IDs.
static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

const EVENT_CHANNEL_SIZE: usize = 64;

/// Returns a [`DeviceInfo`] for a VIA interface with a fresh id.
pub fn via_device_info(vendor_id: u16, product_id: u16, product: &str) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId::new(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)),
        vendor_id,
        product_id,
        usage_page: VIA_USAGE_PAGE,
        usage: VIA_USAGE,
        manufacturer: Some("viakit".to_string()),
        product: Some(product.to_string()),
        serial_number: None,
    }
}

/// Creates a connected host/firmware pair for a single device.
pub fn pair(info: DeviceInfo) -> (MockDevice, MockPeer) {
    pair_with_report_size(info, DEFAULT_REPORT_SIZE)
}

/// Like [`pair`], with a non-default report size.
pub fn pair_with_report_size(info: DeviceInfo, report_size: usize) -> (MockDevice, MockPeer) {
    let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();
    let (to_device_tx, to_device_rx) = mpsc::unbounded_channel();
    let (link_tx, link_rx) = watch::channel(true);
    let link_tx = Arc::new(link_tx);

    let device = MockDevice {
        info: info.clone(),
        report_size,
        inbound: Arc::new(Mutex::new(to_host_rx)),
        outbound: to_device_tx,
        link: link_rx,
    };
    let peer = MockPeer {
        info,
        report_size,
        from_host: to_device_rx,
        to_host: to_host_tx,
        link: link_tx,
    };
    (device, peer)
}

// ---------------------------------------------------------------------------
// MockDevice
// ---------------------------------------------------------------------------

/// Host side of an in-memory device.
///
/// Cloning yields another handle onto the same channels, which is how the
/// backend lets a device be reopened after a session closes.
#[derive(Clone)]
pub struct MockDevice {
    info: DeviceInfo,
    report_size: usize,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    link: watch::Receiver<bool>,
}

impl MockDevice {
    fn is_linked(&self) -> bool {
        *self.link.borrow()
    }
}

impl HidDevice for MockDevice {
    async fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        if !self.is_linked() {
            return Err(TransportError::Disconnected);
        }
        if report.len() != self.report_size {
            return Err(TransportError::ReportSize {
                expected: self.report_size,
                actual: report.len(),
            });
        }
        tracing::trace!(device = %self.info.id, ?report, "mock write");
        self.outbound
            .send(report.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn read_report(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut link = self.link.clone();
        if !*link.borrow_and_update() {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            report = inbound.recv() => Ok(report),
            _ = wait_unlinked(&mut link) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::debug!(device = %self.info.id, "mock device closed");
        Ok(())
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn report_size(&self) -> usize {
        self.report_size
    }
}

async fn wait_unlinked(link: &mut watch::Receiver<bool>) {
    loop {
        if !*link.borrow_and_update() {
            return;
        }
        if link.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// MockPeer
// ---------------------------------------------------------------------------

/// Firmware side of an in-memory device.
pub struct MockPeer {
    info: DeviceInfo,
    report_size: usize,
    from_host: mpsc::UnboundedReceiver<Vec<u8>>,
    to_host: mpsc::UnboundedSender<Vec<u8>>,
    link: Arc<watch::Sender<bool>>,
}

impl MockPeer {
    /// The device this peer plays.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Report size shared with the host side.
    pub fn report_size(&self) -> usize {
        self.report_size
    }

    /// Waits for the next report written by the host.
    ///
    /// Returns `None` once every host handle is gone.
    pub async fn next_write(&mut self) -> Option<Vec<u8>> {
        self.from_host.recv().await
    }

    /// Returns a report written by the host if one is already queued.
    pub fn try_next_write(&mut self) -> Option<Vec<u8>> {
        self.from_host.try_recv().ok()
    }

    /// Sends an input report to the host, zero-padded to the report size.
    pub fn reply(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.report_size {
            return Err(TransportError::ReportSize {
                expected: self.report_size,
                actual: data.len(),
            });
        }
        let mut report = vec![0u8; self.report_size];
        report[..data.len()].copy_from_slice(data);
        self.to_host
            .send(report)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Sends raw bytes without padding. Lets tests deliver short reports.
    pub fn reply_raw(&self, report: Vec<u8>) -> Result<(), TransportError> {
        self.to_host
            .send(report)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Cuts the link as if the cable was pulled, without a hot-plug event.
    pub fn disconnect(&self) {
        self.link.send_replace(false);
    }

    /// Returns `true` while the link is up.
    pub fn is_connected(&self) -> bool {
        *self.link.borrow()
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

struct PluggedDevice {
    device: MockDevice,
    link: Arc<watch::Sender<bool>>,
}

/// In-memory [`HidBackend`] with explicit plug/unplug.
#[derive(Clone)]
pub struct MockBackend {
    devices: Arc<StdMutex<BTreeMap<DeviceId, PluggedDevice>>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl MockBackend {
    /// Creates a backend with nothing attached.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            devices: Arc::new(StdMutex::new(BTreeMap::new())),
            events,
        }
    }

    /// Attaches a device and announces it. Returns the firmware side.
    pub fn plug(&self, info: DeviceInfo) -> MockPeer {
        let (device, peer) = pair(info.clone());
        let plugged = PluggedDevice {
            device,
            link: Arc::clone(&peer.link),
        };
        self.lock().insert(info.id, plugged);
        tracing::debug!(device = %info.id, "mock device plugged");
        let _ = self.events.send(DeviceEvent::Arrived(info));
        peer
    }

    /// Detaches a device: the link drops and a removal is announced.
    pub fn unplug(&self, id: DeviceId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(plugged) => {
                plugged.link.send_replace(false);
                tracing::debug!(device = %id, "mock device unplugged");
                let _ = self.events.send(DeviceEvent::Removed(id));
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<DeviceId, PluggedDevice>> {
        // A poisoned registry only means a test panicked mid-update.
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HidBackend for MockBackend {
    type Device = MockDevice;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        Ok(self
            .lock()
            .values()
            .map(|plugged| plugged.device.info.clone())
            .collect())
    }

    async fn open(&self, info: &DeviceInfo) -> Result<MockDevice, TransportError> {
        self.lock()
            .get(&info.id)
            .map(|plugged| plugged.device.clone())
            .ok_or_else(|| TransportError::OpenFailed(format!("{} is not attached", info.id)))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_is_padded_to_report_size() {
        let (device, peer) = pair(via_device_info(1, 2, "pad"));
        peer.reply(&[0x01, 0x00, 0x0b]).expect("reply");
        let report = device.read_report().await.expect("read").expect("report");
        assert_eq!(report.len(), DEFAULT_REPORT_SIZE);
        assert_eq!(&report[..3], &[0x01, 0x00, 0x0b]);
        assert!(report[3..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_write_report_rejects_wrong_size() {
        let (device, _peer) = pair(via_device_info(1, 2, "size"));
        let err = device.write_report(&[0u8; 8]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ReportSize { expected: 32, actual: 8 }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_wakes_pending_read() {
        let (device, peer) = pair(via_device_info(1, 2, "unplug"));
        let reader = tokio::spawn(async move { device.read_report().await });
        tokio::task::yield_now().await;
        peer.disconnect();
        let result = reader.await.expect("task").expect("read");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_backend_unplug_announces_removal() {
        let backend = MockBackend::new();
        let mut events = backend.subscribe();
        let info = via_device_info(1, 2, "hotplug");
        let id = info.id;
        let peer = backend.plug(info.clone());

        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Arrived(info));
        assert!(backend.unplug(id));
        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Removed(id));
        assert!(!peer.is_connected());
        assert!(backend.enumerate().await.unwrap().is_empty());
        assert!(!backend.unplug(id));
    }
}
