//! Session Manager
//!
//! Owns at most one listener per service, spawns one worker per session and
//! holds the authoritative [`SessionState`]. Every state read or write goes
//! through one mutex; accept, connect and read only ever happen inside
//! workers, never while that mutex is held.
//!
//! Concurrent outbound connects race. The first session to reach a channel
//! while the state admits it claims the "current" slot and alone drives the
//! global state from then on; other sessions still run their transfer and
//! report failures, but never move the state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use nearby_core::{
    AppEvent, Channel, EventSink, Listener, PeerDirectory, PeerHandle, ProfileStore, Purpose,
    Role, ServiceConfig, ServiceId, SessionConfig, SessionError, SessionId, SessionState,
    StateEvent, TransitionRecord, Transport, TransportError,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::builder::SessionManagerBuilder;
use crate::session::{SessionHandle, SessionResource};
use crate::transfer;

/// Transitions kept for [`SessionManager::history`]
pub const HISTORY_LIMIT: usize = 64;

/// Pause after a failed accept before the listener is polled again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Statistics and Snapshots
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub sessions_spawned: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_cancelled: u64,
    pub state_transitions: u64,
}

/// A live session as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub role: Role,
    pub peer: Option<PeerHandle>,
    pub current: bool,
}

// ----------------------------------------------------------------------------
// Manager State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ManagerState {
    state: SessionState,
    /// Accept session owning each service's listener
    listeners: HashMap<ServiceId, SessionId>,
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    /// Session allowed to drive `state`
    current: Option<SessionId>,
    /// Outbound fetches that have not reached a channel yet
    pending_fetches: HashSet<SessionId>,
    /// State to fall back to when every pending fetch fails to connect
    resume_state: SessionState,
    next_session: u64,
    /// Bumped by `stop()`; stale restarts compare against it
    epoch: u64,
    directory: PeerDirectory,
    history: VecDeque<TransitionRecord>,
    stats: ManagerStats,
}

impl ManagerState {
    fn register(&mut self, role: Role, peer: Option<PeerHandle>) -> Arc<SessionHandle> {
        self.next_session += 1;
        let handle = Arc::new(SessionHandle::new(
            SessionId::new(self.next_session),
            role,
            peer,
        ));
        self.sessions.insert(handle.id(), handle.clone());
        self.stats.sessions_spawned += 1;
        handle
    }

    /// Whether `handle` is still tracked and not cancelled
    fn is_live(&self, handle: &SessionHandle) -> bool {
        !handle.is_cancelled() && self.sessions.contains_key(&handle.id())
    }
}

// ----------------------------------------------------------------------------
// Shared Core
// ----------------------------------------------------------------------------

pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    profiles: Arc<dyn ProfileStore>,
    config: SessionConfig,
    services: ServiceConfig,
    inner: Mutex<ManagerState>,
}

impl Shared {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        profiles: Arc<dyn ProfileStore>,
        config: SessionConfig,
        services: ServiceConfig,
    ) -> Self {
        Self {
            transport,
            events,
            profiles,
            config,
            services,
            inner: Mutex::new(ManagerState::default()),
        }
    }

    /// Apply `event` to the global state, recording and announcing a change.
    ///
    /// Returns whether the event was accepted.
    fn apply(&self, inner: &mut ManagerState, event: StateEvent) -> bool {
        let from = inner.state;
        let to = match from.transition(event) {
            Ok(to) => to,
            Err(e) => {
                debug!("Ignoring {}: {}", event.name(), e);
                return false;
            }
        };

        if to != from {
            inner.state = to;
            inner.stats.state_transitions += 1;
            if inner.history.len() == HISTORY_LIMIT {
                inner.history.pop_front();
            }
            inner.history.push_back(TransitionRecord::new(from, to, event));
            info!("State {} -> {} ({})", from, to, event.name());
            self.events.emit(AppEvent::StateChanged(to));
        }
        true
    }

    fn toast(&self, error: &SessionError) {
        if let Some(message) = error.toast_message() {
            self.events.emit(AppEvent::ToastMessage(message.to_string()));
        }
    }

    // ------------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------------

    /// Make sure every service has a listener and an accept loop.
    ///
    /// `epoch` restricts a restart to the lifetime it was scheduled in;
    /// `apply_start` moves the global state to `Listening`.
    async fn start(
        self: &Arc<Self>,
        epoch: Option<u64>,
        apply_start: bool,
    ) -> Result<(), SessionError> {
        let reservations: Vec<(Purpose, ServiceId, Arc<SessionHandle>)> = {
            let mut inner = self.inner.lock().await;
            if epoch.is_some_and(|e| e != inner.epoch) {
                debug!("Skipping restart scheduled before stop()");
                return Ok(());
            }

            let mut reservations = Vec::new();
            for (purpose, service) in self.services.all() {
                if inner.listeners.contains_key(&service) {
                    continue;
                }
                let handle = inner.register(Role::inbound(purpose), None);
                inner.listeners.insert(service, handle.id());
                reservations.push((purpose, service, handle));
            }
            reservations
        };

        let mut failure: Option<SessionError> = None;
        for (purpose, service, handle) in reservations {
            match self.transport.listen(service).await {
                Ok(listener) => {
                    if !handle
                        .attach(SessionResource::Listener(listener.clone()))
                        .await
                    {
                        continue;
                    }
                    info!(session = %handle.id(), %service, "Listening for {:?} sessions", purpose);
                    tokio::spawn(accept_loop(self.clone(), handle, listener));
                }
                Err(e) => {
                    warn!(%service, "Failed to listen: {}", e);
                    let mut inner = self.inner.lock().await;
                    if inner.sessions.remove(&handle.id()).is_some() {
                        inner.stats.sessions_failed += 1;
                    }
                    if inner.listeners.get(&service) == Some(&handle.id()) {
                        inner.listeners.remove(&service);
                    }
                    if failure.is_none() {
                        failure = Some(match e {
                            TransportError::Unavailable { reason } => {
                                SessionError::Unavailable { reason }
                            }
                            other => SessionError::Unavailable {
                                reason: other.to_string(),
                            },
                        });
                    }
                }
            }
        }

        let mut inner = self.inner.lock().await;
        if let Some(error) = &failure {
            self.toast(error);
        }
        let stale = epoch.is_some_and(|e| e != inner.epoch);
        if apply_start && !stale && !inner.listeners.is_empty() {
            self.apply(&mut inner, StateEvent::Start);
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn restart_listening(self: Arc<Self>, epoch: u64) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = self.start(Some(epoch), false).await {
                warn!("Restarting listeners failed: {}", e);
            }
        }
        .boxed()
    }

    /// Register an inbound sub-session for a freshly accepted channel
    async fn spawn_inbound(
        self: &Arc<Self>,
        accept: &SessionHandle,
        channel: Arc<dyn Channel>,
    ) {
        let handle = {
            let mut inner = self.inner.lock().await;
            if !inner.is_live(accept) {
                None
            } else {
                Some(inner.register(accept.role(), Some(channel.remote().clone())))
            }
        };

        let Some(handle) = handle else {
            channel.close().await;
            return;
        };
        if !handle
            .attach(SessionResource::Channel(channel.clone()))
            .await
        {
            self.finish(&handle, Err(SessionError::Cancelled)).await;
            return;
        }

        debug!(
            session = %handle.id(),
            role = %handle.role(),
            peer = %channel.remote().remote_id,
            "Accepted inbound channel"
        );
        tokio::spawn(run_transfer(self.clone(), handle, channel));
    }

    async fn listener_failed(&self, handle: &SessionHandle, service: ServiceId, err: TransportError) {
        let mut inner = self.inner.lock().await;
        if !inner.is_live(handle) {
            debug!(session = %handle.id(), "Accept loop cancelled");
            return;
        }

        warn!(session = %handle.id(), %service, "Listener failed: {}", err);
        inner.sessions.remove(&handle.id());
        if inner.listeners.get(&service) == Some(&handle.id()) {
            inner.listeners.remove(&service);
        }
        inner.stats.sessions_failed += 1;
        self.toast(&SessionError::Unavailable {
            reason: err.to_string(),
        });
    }

    // ------------------------------------------------------------------------
    // Session Lifecycle
    // ------------------------------------------------------------------------

    /// A session reached a channel. Claims the current slot if it is free
    /// and the state admits the session.
    ///
    /// Returns `false` if the session was cancelled meanwhile.
    async fn channel_established(&self, handle: &SessionHandle) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.is_live(handle) {
            return false;
        }

        let role = handle.role();
        inner.pending_fetches.remove(&handle.id());

        let event = StateEvent::ChannelEstablished { role };
        if inner.current.is_none() && inner.state.transition(event).is_ok() {
            inner.current = Some(handle.id());
            self.apply(&mut inner, event);
            debug!(session = %handle.id(), %role, "Session became current");
        }
        true
    }

    /// First sighting of a peer announces it
    async fn record_peer(&self, peer: PeerHandle) {
        let mut inner = self.inner.lock().await;
        if inner.directory.insert(peer.clone()) {
            info!(peer = %peer.remote_id, "Discovered peer");
            self.events.emit(AppEvent::PeerDiscovered(peer));
        }
    }

    /// Resolve a session's terminal outcome into at most one notification
    /// and the matching state change
    async fn finish(self: &Arc<Self>, handle: &SessionHandle, outcome: Result<(), SessionError>) {
        let restart_epoch = {
            let mut inner = self.inner.lock().await;
            let tracked = inner.sessions.remove(&handle.id()).is_some();
            if !tracked || handle.is_cancelled() || outcome == Err(SessionError::Cancelled) {
                debug!(session = %handle.id(), role = %handle.role(), "Session cancelled");
                inner.stats.sessions_cancelled += 1;
                inner.pending_fetches.remove(&handle.id());
                if inner.current == Some(handle.id()) {
                    inner.current = None;
                }
                return;
            }

            let role = handle.role();
            inner.pending_fetches.remove(&handle.id());
            let was_current = inner.current == Some(handle.id());
            if was_current {
                inner.current = None;
            }
            // A fetch that never claimed the slot still settles a fetch
            // state nobody else is driving
            let unattended_fetch = role == Role::ConnectOutboundFetch
                && inner.state == SessionState::FetchingData
                && inner.current.is_none()
                && inner.pending_fetches.is_empty();
            let owns_state = was_current || unattended_fetch;

            match outcome {
                Ok(()) => {
                    inner.stats.sessions_completed += 1;
                    debug!(session = %handle.id(), %role, "Session completed");
                    if owns_state {
                        self.apply(&mut inner, StateEvent::TransferCompleted { role });
                    }
                    None
                }
                Err(error) => {
                    inner.stats.sessions_failed += 1;
                    warn!(session = %handle.id(), %role, "Session failed: {}", error);
                    self.toast(&error);

                    if error.restarts_listening() {
                        if inner.current.is_none() && inner.pending_fetches.is_empty() {
                            self.apply(&mut inner, StateEvent::Start);
                        }
                        Some(inner.epoch)
                    } else if matches!(error, SessionError::DecodeFailed { .. }) {
                        if owns_state {
                            self.apply(&mut inner, StateEvent::TransferFailed { role });
                        }
                        None
                    } else {
                        if unattended_fetch {
                            let resume = inner.resume_state;
                            self.apply(&mut inner, StateEvent::FetchAbandoned { resume });
                        }
                        None
                    }
                }
            }
        };

        if let Some(epoch) = restart_epoch {
            self.clone().restart_listening(epoch).await;
        }
    }
}

// ----------------------------------------------------------------------------
// Workers
// ----------------------------------------------------------------------------

async fn accept_loop(shared: Arc<Shared>, handle: Arc<SessionHandle>, listener: Arc<dyn Listener>) {
    let service = listener.service();
    loop {
        match listener.accept().await {
            Ok(channel) => shared.spawn_inbound(&handle, channel).await,
            Err(e @ TransportError::Closed) => {
                shared.listener_failed(&handle, service, e).await;
                return;
            }
            Err(_) if handle.is_cancelled() => {
                shared.listener_failed(&handle, service, TransportError::Closed).await;
                return;
            }
            Err(e) => {
                // Only a closed listener ends the loop
                warn!(session = %handle.id(), %service, "Accept failed, retrying: {}", e);
                tokio::select! {
                    _ = handle.cancelled() => {}
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }
}

async fn run_connect(shared: Arc<Shared>, handle: Arc<SessionHandle>, peer: PeerHandle) {
    let service = shared.services.service_for(handle.role().purpose());
    let timeout = shared.config.connect_timeout;

    let attempt = tokio::select! {
        biased;
        _ = handle.cancelled() => Err(SessionError::Cancelled),
        result = tokio::time::timeout(timeout, shared.transport.connect(&peer, service)) => {
            match result {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(e)) => Err(SessionError::from_transport(&e, &peer.remote_id, false)),
                Err(_) => Err(SessionError::from_transport(
                    &TransportError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    },
                    &peer.remote_id,
                    false,
                )),
            }
        }
    };

    let channel = match attempt {
        Ok(channel) => channel,
        Err(error) => {
            shared.finish(&handle, Err(error)).await;
            return;
        }
    };

    if !handle
        .attach(SessionResource::Channel(channel.clone()))
        .await
    {
        shared.finish(&handle, Err(SessionError::Cancelled)).await;
        return;
    }

    debug!(session = %handle.id(), role = %handle.role(), peer = %peer.remote_id, "Connected");
    run_transfer(shared, handle, channel).await;
}

async fn run_transfer(shared: Arc<Shared>, handle: Arc<SessionHandle>, channel: Arc<dyn Channel>) {
    if !shared.channel_established(&handle).await {
        handle.release().await;
        shared.finish(&handle, Err(SessionError::Cancelled)).await;
        return;
    }

    let outcome = match handle.role() {
        Role::AcceptGeneral | Role::ConnectOutboundGeneral => {
            shared.record_peer(channel.remote().clone()).await;
            Ok(())
        }
        Role::AcceptFetch => {
            let profile = shared.profiles.local_profile();
            transfer::send_profile(&*channel, &handle, &profile, &shared.config).await
        }
        Role::ConnectOutboundFetch => {
            match transfer::receive_profile(&*channel, &handle, &shared.config).await {
                Ok(_) if handle.is_cancelled() => Err(SessionError::Cancelled),
                Ok(profile) => {
                    shared.events.emit(AppEvent::ProfileReceived(profile));
                    transfer::acknowledge(&*channel, &handle, shared.config.ack_linger).await
                }
                Err(error) => Err(error),
            }
        }
    };

    handle.release().await;
    shared.finish(&handle, outcome).await;
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Handle to the session lifecycle engine. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Manager with default configuration
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self::from_shared(Shared::new(
            transport,
            events,
            profiles,
            SessionConfig::default(),
            ServiceConfig::default(),
        ))
    }

    pub fn builder(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        profiles: Arc<dyn ProfileStore>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder::new(transport, events, profiles)
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn services(&self) -> &ServiceConfig {
        &self.shared.services
    }

    /// Listen on every service and move to `Listening`.
    ///
    /// Idempotent: services that already have a listener are left alone.
    /// If a service cannot be listened on, one `Unavailable` toast is
    /// emitted and the error returned; services that did start keep running.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.shared.start(None, true).await
    }

    /// Spawn one outbound session to `peer`.
    ///
    /// A fetch moves the state to `FetchingData` before the attempt begins.
    /// Concurrent connects are allowed and race for the current slot.
    pub async fn connect(&self, peer: PeerHandle, purpose: Purpose) -> SessionId {
        let role = Role::outbound(purpose);
        let handle = {
            let mut inner = self.shared.inner.lock().await;
            let handle = inner.register(role, Some(peer.clone()));

            if purpose == Purpose::Fetch {
                if inner.pending_fetches.is_empty() && inner.state != SessionState::FetchingData {
                    inner.resume_state = inner.state;
                }
                inner.pending_fetches.insert(handle.id());
                // The fetch takes over state reporting from any current session
                inner.current = None;
                self.shared.apply(&mut inner, StateEvent::FetchRequested);
            }
            handle
        };

        info!(session = %handle.id(), %role, peer = %peer.remote_id, "Connecting");
        let id = handle.id();
        tokio::spawn(run_connect(self.shared.clone(), handle, peer));
        id
    }

    /// Pull `peer`'s profile
    pub async fn fetch(&self, peer: PeerHandle) -> SessionId {
        self.connect(peer, Purpose::Fetch).await
    }

    /// Cancel every session and listener and move to `Idle`.
    ///
    /// Safe from any state. Cancelled sessions end silently.
    pub async fn stop(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let mut inner = self.shared.inner.lock().await;
            inner.epoch += 1;
            let handles: Vec<_> = inner.sessions.drain().map(|(_, h)| h).collect();
            for handle in &handles {
                handle.mark_cancelled();
            }
            inner.listeners.clear();
            inner.pending_fetches.clear();
            inner.current = None;
            self.shared.apply(&mut inner, StateEvent::Stop);
            handles
        };

        if !handles.is_empty() {
            info!("Stopping {} sessions", handles.len());
        }
        for handle in handles {
            handle.release().await;
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Peers seen in a general handshake, ordered by address
    pub async fn discovered_peers(&self) -> SmallVec<[PeerHandle; 8]> {
        self.shared.inner.lock().await.directory.peers()
    }

    /// Most recent state changes, oldest first
    pub async fn history(&self) -> Vec<TransitionRecord> {
        self.shared.inner.lock().await.history.iter().cloned().collect()
    }

    pub async fn stats(&self) -> ManagerStats {
        self.shared.inner.lock().await.stats.clone()
    }

    pub async fn live_sessions(&self) -> Vec<SessionInfo> {
        let inner = self.shared.inner.lock().await;
        let mut sessions: Vec<SessionInfo> = inner
            .sessions
            .values()
            .map(|handle| SessionInfo {
                id: handle.id(),
                role: handle.role(),
                peer: handle.peer().cloned(),
                current: inner.current == Some(handle.id()),
            })
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::{event_channel, MemoryNetwork, Profile, StaticProfileStore};

    fn setup(network: &MemoryNetwork, node: &str) -> (SessionManager, nearby_core::AppEventReceiver) {
        let (tx, rx) = event_channel();
        let manager = SessionManager::builder(
            Arc::new(network.transport(node)),
            Arc::new(tx),
            Arc::new(StaticProfileStore::new(Profile::default())),
        )
        .session_config(SessionConfig::testing())
        .build()
        .unwrap();
        (manager, rx)
    }

    #[tokio::test]
    async fn test_history_records_changes_only() {
        let network = MemoryNetwork::new();
        let (manager, _rx) = setup(&network, "a");

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        manager.stop().await;
        manager.stop().await;

        let history = manager.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to, SessionState::Listening);
        assert_eq!(history[1].to, SessionState::Idle);
        assert_eq!(manager.stats().await.state_transitions, 2);
    }

    #[tokio::test]
    async fn test_live_sessions_lists_accept_loops() {
        let network = MemoryNetwork::new();
        let (manager, _rx) = setup(&network, "a");
        manager.start().await.unwrap();

        let sessions = manager.live_sessions().await;
        let roles: Vec<Role> = sessions.iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![Role::AcceptGeneral, Role::AcceptFetch]);
        assert!(sessions.iter().all(|s| !s.current && s.peer.is_none()));

        manager.stop().await;
        assert!(manager.live_sessions().await.is_empty());
    }
}
