//! Integration tests for the device manager over the mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Notify};

use viakit_client::{ClientConfig, ClientError, ConnectError, DeviceProfile};
use viakit_protocol::sim::{Fault, SimHandle, VirtualKeyboard};
use viakit_session::{DeviceManager, DeviceState, ManagerConfig, SessionError};
use viakit_transport::mock::{via_device_info, MockBackend, MockDevice};
use viakit_transport::{DeviceEvent, DeviceId, DeviceInfo, HidBackend, TransportError};

// =========================================================================
// Helpers
// =========================================================================

fn manager(backend: &MockBackend) -> DeviceManager<MockBackend> {
    let config = ManagerConfig::default()
        .with_profile(DeviceProfile::new(0x4653, 0x0001).with_name("Planck").with_matrix(4, 12));
    DeviceManager::new(backend.clone(), config)
}

fn plug(backend: &MockBackend, kb: VirtualKeyboard) -> (DeviceInfo, SimHandle) {
    let info = via_device_info(0x4653, 0x0001, "Planck");
    let peer = backend.plug(info.clone());
    (info, kb.spawn(peer))
}

/// A backend whose first enumeration takes its snapshot, then waits for
/// the test to release it.
#[derive(Clone)]
struct SlowBackend {
    inner: MockBackend,
    gate: Arc<StdMutex<Option<oneshot::Receiver<()>>>>,
    entered: Arc<Notify>,
    enumerations: Arc<AtomicUsize>,
}

impl SlowBackend {
    fn new(inner: MockBackend, gate: oneshot::Receiver<()>) -> Self {
        Self {
            inner,
            gate: Arc::new(StdMutex::new(Some(gate))),
            entered: Arc::new(Notify::new()),
            enumerations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl HidBackend for SlowBackend {
    type Device = MockDevice;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let snapshot = self.inner.enumerate().await?;
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        Ok(snapshot)
    }

    async fn open(&self, info: &DeviceInfo) -> Result<MockDevice, TransportError> {
        self.inner.open(info).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.subscribe()
    }
}

/// Polls until `check` holds, failing the test after a second.
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn listed_ids(manager: &DeviceManager<MockBackend>) -> Vec<DeviceId> {
    manager
        .list_devices()
        .await
        .expect("list")
        .into_iter()
        .map(|d| d.info.id)
        .collect()
}

// =========================================================================
// Discovery
// =========================================================================

#[tokio::test]
async fn test_list_devices_only_via_interfaces() {
    let backend = MockBackend::new();
    let (via, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let mut keyboard = via_device_info(0x4653, 0x0001, "Planck");
    keyboard.usage_page = 0x0001;
    keyboard.usage = 0x06;
    let _other = backend.plug(keyboard);
    let manager = manager(&backend);

    let devices = manager.list_devices().await.expect("list");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].info.id, via.id);
    assert_eq!(devices[0].state, DeviceState::Discovered);
}

#[tokio::test]
async fn test_list_devices_refreshes_after_arrival() {
    let backend = MockBackend::new();
    let manager = manager(&backend);
    assert!(manager.list_devices().await.expect("list").is_empty());

    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    tokio::time::timeout(Duration::from_secs(1), async {
        while listed_ids(&manager).await != vec![info.id] {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("arrival noticed");
}

#[tokio::test]
async fn test_open_unknown_device_is_error() {
    let backend = MockBackend::new();
    let manager = manager(&backend);

    let err = manager.open(DeviceId::new(u64::MAX)).await.expect_err("unknown");
    assert!(matches!(err, SessionError::UnknownDevice(_)));
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_open_reaches_ready_with_profile() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12).with_matrix(4, 4, 12));
    let manager = manager(&backend);

    let session = manager.open(info.id).await.expect("open");
    assert_eq!(manager.state(info.id), Some(DeviceState::Ready));
    assert_eq!(session.profile().name.as_deref(), Some("Planck"));
    assert_eq!(session.read_layer(0).await.expect("layer").len(), 48);
    assert!(manager.session(info.id).is_some());
}

#[tokio::test]
async fn test_open_twice_is_invalid_transition() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    manager.open(info.id).await.expect("open");

    let err = manager.open(info.id).await.expect_err("already open");
    assert!(matches!(
        err,
        SessionError::InvalidTransition {
            from: DeviceState::Ready,
            to: DeviceState::Opening,
            ..
        }
    ));
}

#[tokio::test]
async fn test_failed_handshake_closes_then_rediscovers() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(7));
    let manager = manager(&backend);

    let err = manager.open(info.id).await.expect_err("too old");
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::UnsupportedVersion { version: 7, .. })
    ));
    assert_eq!(manager.state(info.id), Some(DeviceState::Closed));
    assert!(manager.session(info.id).is_none());

    let devices = manager.list_devices().await.expect("list");
    assert_eq!(devices[0].state, DeviceState::Discovered);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_fails_open() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12).with_fault(Fault::Silent));
    let manager = manager(&backend);

    let err = manager.open(info.id).await.expect_err("no answer");
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::Handshake {
            source: ClientError::Timeout { .. },
            ..
        })
    ));
    assert_eq!(manager.state(info.id), Some(DeviceState::Closed));
}

#[tokio::test]
async fn test_close_ends_session_and_allows_reopen() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    let session = manager.open(info.id).await.expect("open");

    manager.close(info.id).expect("close");
    assert!(session.is_closed());
    assert_eq!(manager.state(info.id), Some(DeviceState::Closed));
    manager.close(info.id).expect("closing twice is fine");

    let devices = manager.list_devices().await.expect("list");
    assert_eq!(devices[0].state, DeviceState::Discovered);
    let session = manager.open(info.id).await.expect("reopen");
    assert_eq!(session.get_layer_count().await.expect("layer count"), 4);
}

#[tokio::test]
async fn test_close_discovered_device_is_invalid_transition() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    manager.list_devices().await.expect("list");

    let err = manager.close(info.id).expect_err("nothing open");
    assert!(matches!(
        err,
        SessionError::InvalidTransition {
            from: DeviceState::Discovered,
            to: DeviceState::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_session_close_is_reflected_in_state() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    let session = manager.open(info.id).await.expect("open");

    session.close();
    eventually(|| manager.state(info.id) == Some(DeviceState::Closed)).await;
    assert!(manager.session(info.id).is_none());
}

#[tokio::test]
async fn test_unplug_closes_session_then_forgets_device() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    let session = manager.open(info.id).await.expect("open");

    backend.unplug(info.id);
    let mut closed = session.closed_signal();
    tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|c| *c))
        .await
        .expect("closed promptly")
        .expect("signal");
    eventually(|| manager.state(info.id) == Some(DeviceState::Closed)).await;
    assert!(manager.session(info.id).is_none());

    assert!(matches!(
        session.get_layer_count().await,
        Err(ClientError::ConnectionLost(_))
    ));
    assert!(manager.list_devices().await.expect("list").is_empty());
    assert_eq!(manager.state(info.id), None);
    assert!(matches!(
        manager.open(info.id).await,
        Err(SessionError::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn test_unplug_discovered_device_forgets_it_at_once() {
    let backend = MockBackend::new();
    let (info, _sim) = plug(&backend, VirtualKeyboard::new(12));
    let manager = manager(&backend);
    manager.list_devices().await.expect("list");

    backend.unplug(info.id);
    eventually(|| manager.state(info.id).is_none()).await;
}

// =========================================================================
// Hot-plug during enumeration
// =========================================================================

#[tokio::test]
async fn test_arrival_during_enumeration_is_listed() {
    let backend = MockBackend::new();
    let (first, _sim1) = plug(&backend, VirtualKeyboard::new(12));
    let (release, gate) = oneshot::channel();
    let slow = SlowBackend::new(backend.clone(), gate);
    let manager = DeviceManager::new(slow.clone(), ManagerConfig::default());

    let (listing, (second, _sim2)) = tokio::join!(manager.list_devices(), async {
        slow.entered.notified().await;
        let plugged = plug(&backend, VirtualKeyboard::new(12));
        // Let the watcher see the arrival before the snapshot returns.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = release.send(());
        plugged
    });

    let ids: Vec<DeviceId> = listing.expect("list").into_iter().map(|d| d.info.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    let ids: Vec<DeviceId> = manager
        .list_devices()
        .await
        .expect("list again")
        .into_iter()
        .map(|d| d.info.id)
        .collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(slow.enumerations() >= 2);
}

#[tokio::test]
async fn test_removal_during_enumeration_leaves_no_ghost() {
    let backend = MockBackend::new();
    let (first, _sim1) = plug(&backend, VirtualKeyboard::new(12));
    let (second, _sim2) = plug(&backend, VirtualKeyboard::new(12));
    let (release, gate) = oneshot::channel();
    let slow = SlowBackend::new(backend.clone(), gate);
    let manager = DeviceManager::new(slow.clone(), ManagerConfig::default());

    let (listing, ()) = tokio::join!(manager.list_devices(), async {
        slow.entered.notified().await;
        backend.unplug(first.id);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = release.send(());
    });

    let ids: Vec<DeviceId> = listing.expect("list").into_iter().map(|d| d.info.id).collect();
    assert_eq!(ids, vec![second.id]);
    assert_eq!(manager.state(first.id), None);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let backend = MockBackend::new();
    let (first, _sim1) = plug(&backend, VirtualKeyboard::new(12));
    let (second, _sim2) = plug(&backend, VirtualKeyboard::new(9).with_matrix(2, 4, 12));
    let manager = DeviceManager::new(
        backend.clone(),
        ManagerConfig::default().with_client(ClientConfig::default()),
    );

    let a = manager.open(first.id).await.expect("open first");
    let b = manager.open(second.id).await.expect("open second");
    manager.close(first.id).expect("close first");

    assert!(a.is_closed());
    assert_eq!(b.get_layer_count().await.expect("second still works"), 2);
    assert_eq!(b.protocol_version(), 9);
}
