//! The device manager: which keyboards are attached and which have an
//! open session.
//!
//! The registry lives behind a mutex shared with a watcher task. The
//! watcher listens for hot-plug events and session shutdowns; it marks the
//! device list stale and tears down sessions of unplugged devices. The
//! list itself is only re-enumerated when someone asks for it.
//!
//! Every change bumps an epoch. An enumeration is applied only if the
//! epoch is unchanged when it returns; otherwise it may predate an event
//! and is taken again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use viakit_client::{connect, ProtocolSession};
use viakit_transport::{DeviceEvent, DeviceId, DeviceInfo, HidBackend};

use crate::{DeviceState, ManagerConfig, SessionError};

/// A device as reported by [`DeviceManager::list_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub info: DeviceInfo,
    pub state: DeviceState,
}

struct DeviceEntry {
    info: DeviceInfo,
    state: DeviceState,
    session: Option<ProtocolSession>,
    /// Distinguishes this entry's session from earlier ones on the same id.
    generation: u64,
}

impl DeviceEntry {
    fn discovered(info: DeviceInfo) -> Self {
        Self {
            info,
            state: DeviceState::Discovered,
            session: None,
            generation: 0,
        }
    }

    fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            info: self.info.clone(),
            state: self.state,
        }
    }
}

/// Enumerations taken per refresh before giving up until the next call.
const MAX_REFRESH_ATTEMPTS: usize = 3;

struct Registry {
    devices: BTreeMap<DeviceId, DeviceEntry>,
    /// Set by hot-plug events and session shutdowns, cleared by a refresh.
    stale: bool,
    /// Bumped with every change that makes the list stale.
    epoch: u64,
    next_generation: u64,
}

impl Registry {
    fn mark_stale(&mut self) {
        self.stale = true;
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn transition(&mut self, id: DeviceId, to: DeviceState) -> Result<&mut DeviceEntry, SessionError> {
        let entry = self
            .devices
            .get_mut(&id)
            .ok_or(SessionError::UnknownDevice(id))?;
        if !entry.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                device: id,
                from: entry.state,
                to,
            });
        }
        tracing::debug!(device = %id, from = %entry.state, %to, "device state changed");
        entry.state = to;
        Ok(entry)
    }

    /// Replaces the device list with a fresh enumeration.
    fn reconcile(&mut self, attached: Vec<DeviceInfo>) {
        let mut devices = BTreeMap::new();
        for info in attached.into_iter().filter(DeviceInfo::is_via_interface) {
            let entry = match self.devices.remove(&info.id) {
                Some(entry) if entry.state != DeviceState::Closed => entry,
                _ => DeviceEntry::discovered(info),
            };
            devices.insert(entry.info.id, entry);
        }
        for (id, gone) in std::mem::replace(&mut self.devices, devices) {
            if let Some(session) = gone.session {
                session.close();
            }
            tracing::debug!(device = %id, "device forgotten");
        }
        self.stale = false;
    }

    /// An unplugged device with a session (or one being opened) stays as a
    /// `Closed` entry until the next refresh forgets it; a merely
    /// discovered device is forgotten at once.
    fn removed(&mut self, id: DeviceId) {
        self.mark_stale();
        let Some(entry) = self.devices.get_mut(&id) else {
            return;
        };
        let was = entry.state;
        match was {
            DeviceState::Opening | DeviceState::Ready => {
                entry.state = DeviceState::Closed;
                if let Some(session) = entry.session.take() {
                    session.close();
                }
            }
            DeviceState::Discovered | DeviceState::Closed => {
                self.devices.remove(&id);
            }
        }
        tracing::info!(device = %id, state = %was, "device unplugged");
    }

    fn session_closed(&mut self, id: DeviceId, generation: u64) {
        let Some(entry) = self.devices.get_mut(&id) else {
            return;
        };
        if entry.generation != generation || entry.state != DeviceState::Ready {
            return;
        }
        entry.state = DeviceState::Closed;
        entry.session = None;
        self.mark_stale();
        tracing::info!(device = %id, "session ended");
    }
}

fn lock(registry: &StdMutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tracks attached VIA keyboards and their sessions.
///
/// All methods take `&self`; share the manager behind an `Arc` to use it
/// from several tasks.
pub struct DeviceManager<B: HidBackend> {
    backend: B,
    config: ManagerConfig,
    registry: Arc<StdMutex<Registry>>,
    watcher: JoinHandle<()>,
}

impl<B: HidBackend> DeviceManager<B> {
    /// Creates a manager and starts watching `backend` for hot-plug
    /// events. Must be called inside a Tokio runtime.
    pub fn new(backend: B, config: ManagerConfig) -> Self {
        let registry = Arc::new(StdMutex::new(Registry {
            devices: BTreeMap::new(),
            stale: true,
            epoch: 0,
            next_generation: 1,
        }));
        let events = backend.subscribe();
        let watcher = tokio::spawn(watch_events(events, Arc::clone(&registry)));
        Self {
            backend,
            config,
            registry,
            watcher,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Lists attached VIA interfaces and their states.
    ///
    /// Re-enumerates the backend only if something changed since the last
    /// call.
    pub async fn list_devices(&self) -> Result<Vec<DeviceSummary>, SessionError> {
        self.refresh_if_stale().await?;
        Ok(lock(&self.registry)
            .devices
            .values()
            .map(DeviceEntry::summary)
            .collect())
    }

    async fn refresh_if_stale(&self) -> Result<(), SessionError> {
        for _ in 0..MAX_REFRESH_ATTEMPTS {
            let epoch = {
                let registry = lock(&self.registry);
                if !registry.stale {
                    return Ok(());
                }
                registry.epoch
            };
            let attached = self.backend.enumerate().await?;
            let mut registry = lock(&self.registry);
            if registry.epoch == epoch {
                registry.reconcile(attached);
                tracing::debug!(devices = registry.devices.len(), "device list refreshed");
                return Ok(());
            }
            tracing::debug!("devices changed during enumeration");
        }
        // Still stale: the next call enumerates again.
        Ok(())
    }

    /// Opens a session on a discovered device.
    ///
    /// On handshake failure the device ends up `Closed` and the error is
    /// returned; a later refresh rediscovers it.
    pub async fn open(&self, id: DeviceId) -> Result<ProtocolSession, SessionError> {
        self.refresh_if_stale().await?;
        let info = lock(&self.registry)
            .transition(id, DeviceState::Opening)?
            .info
            .clone();
        tracing::info!(device = %id, product = %info.display_name(), "opening device");

        let device = match self.backend.open(&info).await {
            Ok(device) => device,
            Err(e) => {
                self.abandon_open(id);
                return Err(e.into());
            }
        };
        let profile = self.config.profile_for(info.vendor_id, info.product_id);
        let session = match connect(device, &self.config.client, profile).await {
            Ok(session) => session,
            Err(e) => {
                self.abandon_open(id);
                return Err(e.into());
            }
        };

        let generation = {
            let mut registry = lock(&self.registry);
            let generation = registry.next_generation;
            registry.next_generation += 1;
            match registry.transition(id, DeviceState::Ready) {
                Ok(entry) => {
                    entry.session = Some(session.clone());
                    entry.generation = generation;
                }
                Err(e) => {
                    // Unplugged or closed while the handshake ran.
                    session.close();
                    return Err(e);
                }
            }
            generation
        };
        tokio::spawn(watch_session(
            session.closed_signal(),
            Arc::clone(&self.registry),
            id,
            generation,
        ));
        Ok(session)
    }

    fn abandon_open(&self, id: DeviceId) {
        let mut registry = lock(&self.registry);
        if registry.transition(id, DeviceState::Closed).is_ok() {
            registry.mark_stale();
        }
    }

    /// Closes a device's session. Closing a `Closed` device does nothing.
    pub fn close(&self, id: DeviceId) -> Result<(), SessionError> {
        let mut registry = lock(&self.registry);
        if registry.devices.get(&id).map(|e| e.state) == Some(DeviceState::Closed) {
            return Ok(());
        }
        let entry = registry.transition(id, DeviceState::Closed)?;
        if let Some(session) = entry.session.take() {
            session.close();
        }
        registry.mark_stale();
        tracing::info!(device = %id, "device closed");
        Ok(())
    }

    /// Current state of a device, `None` if it is not in the list.
    ///
    /// A device unplugged while `Opening` or `Ready` reads as `Closed`
    /// until the next [`list_devices`](Self::list_devices) or
    /// [`open`](Self::open) forgets it.
    pub fn state(&self, id: DeviceId) -> Option<DeviceState> {
        lock(&self.registry).devices.get(&id).map(|e| e.state)
    }

    /// The open session of a `Ready` device.
    pub fn session(&self, id: DeviceId) -> Option<ProtocolSession> {
        lock(&self.registry)
            .devices
            .get(&id)
            .and_then(|e| e.session.clone())
    }

    /// Closes every open session.
    pub fn close_all(&self) {
        let ready: Vec<DeviceId> = lock(&self.registry)
            .devices
            .values()
            .filter(|e| e.state.is_ready())
            .map(|e| e.info.id)
            .collect();
        for id in ready {
            let _ = self.close(id);
        }
    }
}

impl<B: HidBackend> Drop for DeviceManager<B> {
    fn drop(&mut self) {
        self.watcher.abort();
        self.close_all();
    }
}

async fn watch_events(mut events: broadcast::Receiver<DeviceEvent>, registry: Arc<StdMutex<Registry>>) {
    loop {
        match events.recv().await {
            Ok(DeviceEvent::Arrived(info)) => {
                tracing::debug!(device = %info.id, "device arrived");
                lock(&registry).mark_stale();
            }
            Ok(DeviceEvent::Removed(id)) => lock(&registry).removed(id),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "missed hot-plug events");
                lock(&registry).mark_stale();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("hot-plug watcher stopped");
}

async fn watch_session(
    mut closed: watch::Receiver<bool>,
    registry: Arc<StdMutex<Registry>>,
    id: DeviceId,
    generation: u64,
) {
    let _ = closed.wait_for(|closed| *closed).await;
    lock(&registry).session_closed(id, generation);
}
