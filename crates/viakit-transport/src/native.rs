//! Real HID devices through `hidapi`.
//!
//! `hidapi` is blocking, so the library context lives on its own thread
//! and every open device gets an I/O thread that shuttles reports between
//! the OS handle and Tokio channels. Hot-plug is detected by polling.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::{DeviceEvent, DeviceId, DeviceInfo, HidBackend, HidDevice, TransportError};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

const EVENT_CHANNEL_SIZE: usize = 64;

/// How long the I/O thread blocks in a single read before servicing writes.
const READ_SLICE_MS: i32 = 5;

type Enumerated = Vec<(CString, DeviceInfo)>;

enum ApiRequest {
    Enumerate(oneshot::Sender<Result<Enumerated, TransportError>>),
    Open(CString, oneshot::Sender<Result<::hidapi::HidDevice, TransportError>>),
}

/// Path → id assignments for currently attached interfaces.
#[derive(Default)]
struct Registry {
    ids: HashMap<CString, DeviceId>,
    paths: HashMap<DeviceId, CString>,
}

impl Registry {
    fn id_for(&mut self, path: &CString) -> DeviceId {
        if let Some(id) = self.ids.get(path) {
            return *id;
        }
        let id = DeviceId::new(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        self.ids.insert(path.clone(), id);
        self.paths.insert(id, path.clone());
        id
    }

    fn forget(&mut self, id: DeviceId) {
        if let Some(path) = self.paths.remove(&id) {
            self.ids.remove(&path);
        }
    }
}

/// [`HidBackend`] over the host's HID stack.
pub struct HidapiBackend {
    requests: mpsc::UnboundedSender<ApiRequest>,
    registry: Arc<StdMutex<Registry>>,
    events: broadcast::Sender<DeviceEvent>,
    poller: JoinHandle<()>,
}

impl HidapiBackend {
    /// Starts the `hidapi` thread and a hot-plug poller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(poll_interval: Duration) -> Result<Self, TransportError> {
        let (requests, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("viakit-hidapi".into())
            .spawn(move || api_thread(rx, ready_tx))
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        ready_rx
            .recv()
            .map_err(|_| TransportError::Backend("hidapi thread exited".into()))??;

        let registry = Arc::new(StdMutex::new(Registry::default()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let poller = tokio::spawn(poll_hotplug(
            requests.clone(),
            Arc::clone(&registry),
            events.clone(),
            poll_interval,
        ));

        tracing::info!(?poll_interval, "hidapi backend started");
        Ok(Self {
            requests,
            registry,
            events,
            poller,
        })
    }
}

impl Drop for HidapiBackend {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl HidBackend for HidapiBackend {
    type Device = HidapiDevice;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let listed = enumerate_raw(&self.requests).await?;
        let mut registry = lock(&self.registry);
        Ok(listed
            .into_iter()
            .map(|(path, mut info)| {
                info.id = registry.id_for(&path);
                info
            })
            .collect())
    }

    async fn open(&self, info: &DeviceInfo) -> Result<HidapiDevice, TransportError> {
        let path = lock(&self.registry)
            .paths
            .get(&info.id)
            .cloned()
            .ok_or_else(|| TransportError::OpenFailed(format!("{} is not attached", info.id)))?;

        let (tx, rx) = oneshot::channel();
        self.requests
            .send(ApiRequest::Open(path, tx))
            .map_err(|_| TransportError::Backend("hidapi thread exited".into()))?;
        let handle = rx
            .await
            .map_err(|_| TransportError::Backend("hidapi thread exited".into()))??;

        tracing::info!(device = %info.id, name = %info.display_name(), "hid device opened");
        Ok(HidapiDevice::spawn(info.clone(), handle))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

fn lock(registry: &StdMutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn api_thread(
    mut rx: mpsc::UnboundedReceiver<ApiRequest>,
    ready: std::sync::mpsc::Sender<Result<(), TransportError>>,
) {
    let mut api = match ::hidapi::HidApi::new() {
        Ok(api) => {
            let _ = ready.send(Ok(()));
            api
        }
        Err(e) => {
            let _ = ready.send(Err(TransportError::Backend(e.to_string())));
            return;
        }
    };

    while let Some(request) = rx.blocking_recv() {
        match request {
            ApiRequest::Enumerate(reply) => {
                let result = api
                    .refresh_devices()
                    .map_err(|e| TransportError::Backend(e.to_string()))
                    .map(|()| {
                        api.device_list()
                            .map(|d| {
                                let info = DeviceInfo {
                                    id: DeviceId::new(0),
                                    vendor_id: d.vendor_id(),
                                    product_id: d.product_id(),
                                    usage_page: d.usage_page(),
                                    usage: d.usage(),
                                    manufacturer: d.manufacturer_string().map(str::to_string),
                                    product: d.product_string().map(str::to_string),
                                    serial_number: d.serial_number().map(str::to_string),
                                };
                                (d.path().to_owned(), info)
                            })
                            .collect()
                    });
                let _ = reply.send(result);
            }
            ApiRequest::Open(path, reply) => {
                let result = api
                    .open_path(&path)
                    .map_err(|e| TransportError::OpenFailed(e.to_string()));
                let _ = reply.send(result);
            }
        }
    }
}

async fn enumerate_raw(
    requests: &mpsc::UnboundedSender<ApiRequest>,
) -> Result<Enumerated, TransportError> {
    let (tx, rx) = oneshot::channel();
    requests
        .send(ApiRequest::Enumerate(tx))
        .map_err(|_| TransportError::Backend("hidapi thread exited".into()))?;
    rx.await
        .map_err(|_| TransportError::Backend("hidapi thread exited".into()))?
}

async fn poll_hotplug(
    requests: mpsc::UnboundedSender<ApiRequest>,
    registry: Arc<StdMutex<Registry>>,
    events: broadcast::Sender<DeviceEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let listed = match enumerate_raw(&requests).await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(error = %e, "hot-plug poll failed");
                continue;
            }
        };

        let mut arrived = Vec::new();
        let mut removed = Vec::new();
        {
            let mut registry = lock(&registry);
            let present: Vec<&CString> = listed.iter().map(|(path, _)| path).collect();
            let gone: Vec<DeviceId> = registry
                .ids
                .iter()
                .filter(|(path, _)| !present.contains(path))
                .map(|(_, id)| *id)
                .collect();
            for id in gone {
                registry.forget(id);
                removed.push(id);
            }
            for (path, info) in &listed {
                if !registry.ids.contains_key(path) {
                    let mut info = info.clone();
                    info.id = registry.id_for(path);
                    arrived.push(info);
                }
            }
        }

        for id in removed {
            tracing::debug!(device = %id, "hid device removed");
            let _ = events.send(DeviceEvent::Removed(id));
        }
        for info in arrived {
            tracing::debug!(device = %info.id, "hid device arrived");
            let _ = events.send(DeviceEvent::Arrived(info));
        }
    }
}

// ---------------------------------------------------------------------------
// HidapiDevice
// ---------------------------------------------------------------------------

type WriteRequest = (Vec<u8>, oneshot::Sender<Result<(), TransportError>>);

/// An open `hidapi` device serviced by its own I/O thread.
pub struct HidapiDevice {
    info: DeviceInfo,
    writes: mpsc::UnboundedSender<WriteRequest>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closing: Arc<AtomicBool>,
}

impl HidapiDevice {
    fn spawn(info: DeviceInfo, handle: ::hidapi::HidDevice) -> Self {
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let thread_closing = Arc::clone(&closing);
        let id = info.id;
        let report_size = crate::DEFAULT_REPORT_SIZE;

        std::thread::spawn(move || {
            io_thread(id, handle, report_size, write_rx, inbound_tx, thread_closing)
        });

        Self {
            info,
            writes,
            inbound: Mutex::new(inbound),
            closing,
        }
    }
}

fn io_thread(
    id: DeviceId,
    handle: ::hidapi::HidDevice,
    report_size: usize,
    mut writes: mpsc::UnboundedReceiver<WriteRequest>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    closing: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; report_size];
    while !closing.load(Ordering::Relaxed) {
        while let Ok((report, done)) = writes.try_recv() {
            // hidapi expects the report id first; VIA uses none.
            let mut framed = Vec::with_capacity(report.len() + 1);
            framed.push(0);
            framed.extend_from_slice(&report);
            let result = handle
                .write(&framed)
                .map(|_| ())
                .map_err(|e| TransportError::SendFailed(std::io::Error::other(e.to_string())));
            let _ = done.send(result);
        }

        match handle.read_timeout(&mut buf, READ_SLICE_MS) {
            Ok(0) => {}
            Ok(n) => {
                if inbound.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(device = %id, error = %e, "hid read failed, closing");
                break;
            }
        }
    }
    tracing::debug!(device = %id, "hid io thread stopped");
}

impl HidDevice for HidapiDevice {
    async fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        if report.len() != self.report_size() {
            return Err(TransportError::ReportSize {
                expected: self.report_size(),
                actual: report.len(),
            });
        }
        let (tx, rx) = oneshot::channel();
        self.writes
            .send((report.to_vec(), tx))
            .map_err(|_| TransportError::Disconnected)?;
        rx.await.map_err(|_| TransportError::Disconnected)?
    }

    async fn read_report(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::Relaxed);
        tracing::debug!(device = %self.info.id, "hid device closing");
        Ok(())
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl Drop for HidapiDevice {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Relaxed);
    }
}
