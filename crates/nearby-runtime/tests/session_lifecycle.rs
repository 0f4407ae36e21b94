//! Session lifecycle tests
//!
//! Drive complete session managers against each other over the in-memory
//! transport. "Raw" nodes use the transport directly to play a misbehaving
//! peer.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nearby_core::codec::decode_text;
use nearby_core::{
    Channel, Listener, MemoryNetwork, MemoryTransport, PeerHandle, ServiceId, Transport,
    TransportError,
};
use nearby_runtime::{
    event_channel, AppEvent, AppEventReceiver, Profile, Purpose, SessionConfig, SessionManager,
    SessionState, StaticProfileStore, WireFormat,
};
use tokio::time::{sleep, timeout, Instant};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(3);

fn ann() -> Profile {
    Profile::new("Ann", "30", false, "chess,hiking")
}

fn node_with(
    network: &MemoryNetwork,
    name: &str,
    profile: Profile,
    config: SessionConfig,
) -> (SessionManager, AppEventReceiver) {
    let (tx, rx) = event_channel();
    let manager = SessionManager::builder(
        Arc::new(network.transport(name)),
        Arc::new(tx),
        Arc::new(StaticProfileStore::new(profile)),
    )
    .session_config(config)
    .build()
    .expect("valid configuration");
    (manager, rx)
}

fn node(network: &MemoryNetwork, name: &str) -> (SessionManager, AppEventReceiver) {
    node_with(network, name, Profile::default(), SessionConfig::testing())
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_state(manager: &SessionManager, state: SessionState) {
    eventually(&format!("state {}", state), move || async move {
        manager.state().await == state
    })
    .await;
}

/// Events already delivered, after letting in-flight work settle
async fn settle(rx: &mut AppEventReceiver) -> Vec<AppEvent> {
    sleep(Duration::from_millis(100)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn toasts(events: &[AppEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::ToastMessage(message) => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

fn states(events: &[AppEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn profiles(events: &[AppEvent]) -> Vec<&Profile> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::ProfileReceived(profile) => Some(profile),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Start and Stop
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_start_creates_one_listener_per_service() {
    let network = MemoryNetwork::new();
    let (manager, mut rx) = node(&network, "a");

    manager.start().await.unwrap();
    manager.start().await.unwrap();
    manager.start().await.unwrap();

    assert_eq!(network.listen_count("a", ServiceId::GENERAL), 1);
    assert_eq!(network.listen_count("a", ServiceId::FETCH), 1);
    assert_eq!(network.open_listeners("a"), 2);
    assert_eq!(manager.state().await, SessionState::Listening);

    let events = settle(&mut rx).await;
    assert_eq!(states(&events), vec![SessionState::Listening]);
}

#[tokio::test]
async fn test_concurrent_start_creates_one_listener_per_service() {
    let network = MemoryNetwork::new();
    let (manager, _rx) = node(&network, "a");

    let (first, second) = tokio::join!(manager.start(), manager.start());
    assert!(first.is_ok() && second.is_ok());

    assert_eq!(network.listen_count("a", ServiceId::GENERAL), 1);
    assert_eq!(network.listen_count("a", ServiceId::FETCH), 1);
}

#[tokio::test]
async fn test_stop_from_idle_is_a_no_op() {
    let network = MemoryNetwork::new();
    let (manager, mut rx) = node(&network, "a");

    manager.stop().await;

    assert_eq!(manager.state().await, SessionState::Idle);
    assert!(settle(&mut rx).await.is_empty());
}

#[tokio::test]
async fn test_stop_releases_every_resource() {
    let network = MemoryNetwork::new();
    let (server, _server_rx) = node(&network, "server");
    server.start().await.unwrap();

    // A peer that accepts fetches and never answers keeps a channel open
    let mute = network.transport("mute");
    let mute_listener = mute.listen(ServiceId::FETCH).await.unwrap();

    let (client, _client_rx) = node(&network, "client");
    client.start().await.unwrap();
    client.fetch(network.peer("mute")).await;
    let _held = timeout(WAIT, mute_listener.accept()).await.unwrap().unwrap();

    client.stop().await;
    server.stop().await;

    assert_eq!(client.state().await, SessionState::Idle);
    assert_eq!(server.state().await, SessionState::Idle);
    assert!(client.live_sessions().await.is_empty());
    assert!(server.live_sessions().await.is_empty());

    eventually("client resources released", || async {
        network.open_listeners("client") == 0 && network.open_channels("client") == 0
    })
    .await;
    assert_eq!(network.open_listeners("server"), 0);
    assert_eq!(network.open_channels("server"), 0);
}

#[tokio::test]
async fn test_start_after_stop_listens_again() {
    let network = MemoryNetwork::new();
    let (manager, _rx) = node(&network, "a");

    manager.start().await.unwrap();
    manager.stop().await;
    manager.start().await.unwrap();

    assert_eq!(manager.state().await, SessionState::Listening);
    assert_eq!(network.listen_count("a", ServiceId::FETCH), 2);
    assert_eq!(network.open_listeners("a"), 2);
}

#[tokio::test]
async fn test_start_on_unavailable_transport() {
    let network = MemoryNetwork::new();
    network.set_unavailable("a", true).await;
    let (manager, mut rx) = node(&network, "a");

    let result = manager.start().await;
    assert!(matches!(
        result,
        Err(nearby_runtime::SessionError::Unavailable { .. })
    ));

    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Nearby service is not available"]);
    assert_eq!(manager.state().await, SessionState::Idle);
    assert!(manager.live_sessions().await.is_empty());

    network.set_unavailable("a", false).await;
    manager.start().await.unwrap();
    assert_eq!(manager.state().await, SessionState::Listening);
}

// ----------------------------------------------------------------------------
// Profile Fetch
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_completes_on_both_sides() {
    let network = MemoryNetwork::new();
    let (sender, mut sender_rx) = node_with(&network, "a", ann(), SessionConfig::testing());
    let (receiver, mut receiver_rx) = node(&network, "b");
    sender.start().await.unwrap();
    receiver.start().await.unwrap();

    receiver.fetch(network.peer("a")).await;

    wait_for_state(&receiver, SessionState::FetchingCompleted).await;
    wait_for_state(&sender, SessionState::FetchingCompleted).await;

    let events = settle(&mut receiver_rx).await;
    assert_eq!(profiles(&events), vec![&ann()]);
    assert!(toasts(&events).is_empty());
    assert_eq!(
        events,
        vec![
            AppEvent::StateChanged(SessionState::Listening),
            AppEvent::StateChanged(SessionState::FetchingData),
            AppEvent::ProfileReceived(ann()),
            AppEvent::StateChanged(SessionState::FetchingCompleted),
        ]
    );

    let events = settle(&mut sender_rx).await;
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::Connected,
            SessionState::FetchingCompleted,
        ]
    );
    assert!(toasts(&events).is_empty());

    eventually("transfer channels closed", || async {
        network.open_channels("a") == 0 && network.open_channels("b") == 0
    })
    .await;
    assert_eq!(receiver.stats().await.sessions_completed, 1);
}

#[tokio::test]
async fn test_start_after_fetch_returns_to_listening() {
    let network = MemoryNetwork::new();
    let (sender, _sender_rx) = node_with(&network, "a", ann(), SessionConfig::testing());
    let (receiver, _receiver_rx) = node(&network, "b");
    sender.start().await.unwrap();
    receiver.start().await.unwrap();

    receiver.fetch(network.peer("a")).await;
    wait_for_state(&receiver, SessionState::FetchingCompleted).await;

    receiver.start().await.unwrap();
    assert_eq!(receiver.state().await, SessionState::Listening);
    assert_eq!(network.listen_count("b", ServiceId::FETCH), 1);
}

#[tokio::test]
async fn test_fetch_is_busy_before_the_round_trip() {
    let network = MemoryNetwork::new();
    network.set_unresponsive("slow", true).await;
    let (manager, _rx) = node(&network, "a");
    manager.start().await.unwrap();

    manager.fetch(network.peer("slow")).await;
    assert_eq!(manager.state().await, SessionState::FetchingData);
    assert!(manager.state().await.is_busy());
}

#[tokio::test]
async fn test_framed_wire_format_end_to_end() {
    let network = MemoryNetwork::new();
    let config = SessionConfig::testing().with_wire_format(WireFormat::Framed);
    let profile = Profile::new("Ann: the second", "30", false, "chess:hiking");
    let (sender, _sender_rx) = node_with(&network, "a", profile.clone(), config.clone());
    let (receiver, mut receiver_rx) = node_with(&network, "b", Profile::default(), config);
    sender.start().await.unwrap();

    receiver.fetch(network.peer("a")).await;
    wait_for_state(&receiver, SessionState::FetchingCompleted).await;

    let events = settle(&mut receiver_rx).await;
    assert_eq!(profiles(&events), vec![&profile]);
}

#[tokio::test]
async fn test_concurrent_fetches_race_for_current_slot() {
    let network = MemoryNetwork::new();
    let (first, _first_rx) = node_with(&network, "a", ann(), SessionConfig::testing());
    let (second, _second_rx) = node_with(
        &network,
        "c",
        Profile::new("Cy", "41", true, "sailing"),
        SessionConfig::testing(),
    );
    first.start().await.unwrap();
    second.start().await.unwrap();

    let (receiver, mut receiver_rx) = node(&network, "b");
    receiver.start().await.unwrap();
    receiver.fetch(network.peer("a")).await;
    receiver.fetch(network.peer("c")).await;

    eventually("both fetches finished", || async {
        receiver.stats().await.sessions_completed == 2
    })
    .await;

    let events = settle(&mut receiver_rx).await;
    assert_eq!(profiles(&events).len(), 2);
    assert!(toasts(&events).is_empty());
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::FetchingData,
            SessionState::FetchingCompleted,
        ]
    );
}

#[tokio::test]
async fn test_sender_succeeds_when_peer_never_acknowledges() {
    let network = MemoryNetwork::new();
    let (sender, mut sender_rx) = node_with(&network, "a", ann(), SessionConfig::testing());
    sender.start().await.unwrap();

    let raw = network.transport("raw");
    let channel = raw
        .connect(&network.peer("a"), ServiceId::FETCH)
        .await
        .unwrap();
    let mut buf = [0u8; 256];
    let n = timeout(WAIT, channel.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(decode_text(&buf[..n]).unwrap(), ann());
    channel.close().await;

    wait_for_state(&sender, SessionState::FetchingCompleted).await;
    let events = settle(&mut sender_rx).await;
    assert!(toasts(&events).is_empty());
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_mid_read_is_silent() {
    let network = MemoryNetwork::new();
    let mute = network.transport("mute");
    let mute_listener = mute.listen(ServiceId::FETCH).await.unwrap();

    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();
    manager.fetch(network.peer("mute")).await;

    let _held = timeout(WAIT, mute_listener.accept()).await.unwrap().unwrap();
    sleep(Duration::from_millis(20)).await;
    manager.stop().await;

    let events = settle(&mut rx).await;
    assert!(toasts(&events).is_empty());
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::FetchingData,
            SessionState::Idle,
        ]
    );
    assert_eq!(manager.state().await, SessionState::Idle);
    assert!(manager.stats().await.sessions_cancelled >= 1);
}

#[tokio::test]
async fn test_remote_close_mid_read_restarts_listening() {
    let network = MemoryNetwork::new();
    let raw = network.transport("raw");
    let raw_listener = raw.listen(ServiceId::FETCH).await.unwrap();

    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();
    manager.fetch(network.peer("raw")).await;

    let channel = timeout(WAIT, raw_listener.accept()).await.unwrap().unwrap();
    sleep(Duration::from_millis(20)).await;
    channel.close().await;

    wait_for_state(&manager, SessionState::Listening).await;
    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Device connection was lost"]);
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::FetchingData,
            SessionState::Listening,
        ]
    );
    assert!(profiles(&events).is_empty());

    // Listeners were still up, so the restart did not open new ones
    assert_eq!(network.listen_count("b", ServiceId::FETCH), 1);
    assert_eq!(network.open_listeners("b"), 2);
}

#[tokio::test]
async fn test_unreachable_general_connect_fails_once_without_restart() {
    let network = MemoryNetwork::new();
    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();

    manager
        .connect(network.peer("ghost"), Purpose::General)
        .await;

    eventually("connect attempt failed", || async {
        manager.stats().await.sessions_failed == 1
    })
    .await;

    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Unable to connect device"]);
    assert_eq!(states(&events), vec![SessionState::Listening]);
    assert_eq!(manager.state().await, SessionState::Listening);
    assert_eq!(network.listen_count("b", ServiceId::GENERAL), 1);
}

#[tokio::test]
async fn test_rejected_fetch_resumes_previous_state() {
    let network = MemoryNetwork::new();
    network.set_rejecting("grumpy", true).await;
    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();

    manager.fetch(network.peer("grumpy")).await;

    eventually("fetch attempt failed", || async {
        manager.stats().await.sessions_failed == 1
    })
    .await;
    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Unable to connect device"]);
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::FetchingData,
            SessionState::Listening,
        ]
    );
}

#[tokio::test]
async fn test_connect_attempt_times_out() {
    let network = MemoryNetwork::new();
    let _listener = network
        .transport("slow")
        .listen(ServiceId::FETCH)
        .await
        .unwrap();
    network.set_unresponsive("slow", true).await;

    let config = SessionConfig::testing().with_connect_timeout(Duration::from_millis(100));
    let (manager, mut rx) = node_with(&network, "b", Profile::default(), config);
    manager.start().await.unwrap();
    manager.fetch(network.peer("slow")).await;

    wait_for_state(&manager, SessionState::Listening).await;
    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Unable to connect device"]);
}

#[tokio::test]
async fn test_stop_cancels_pending_connect_silently() {
    let network = MemoryNetwork::new();
    network.set_unresponsive("slow", true).await;
    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();

    manager.fetch(network.peer("slow")).await;
    sleep(Duration::from_millis(20)).await;
    manager.stop().await;

    eventually("connect worker observed cancellation", || async {
        manager.stats().await.sessions_cancelled >= 1
    })
    .await;
    let events = settle(&mut rx).await;
    assert!(toasts(&events).is_empty());
    assert_eq!(manager.state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_malformed_profile_completes_with_decode_failure() {
    let network = MemoryNetwork::new();
    let raw = network.transport("raw");
    let raw_listener = raw.listen(ServiceId::FETCH).await.unwrap();

    let (manager, mut rx) = node(&network, "b");
    manager.start().await.unwrap();
    manager.fetch(network.peer("raw")).await;

    let channel = timeout(WAIT, raw_listener.accept()).await.unwrap().unwrap();
    channel.write(b"not a profile").await.unwrap();

    wait_for_state(&manager, SessionState::FetchingCompleted).await;
    let events = settle(&mut rx).await;
    assert_eq!(toasts(&events), vec!["Received profile could not be read"]);
    assert!(profiles(&events).is_empty());

    // The receiver tears the channel down
    let mut buf = [0u8; 16];
    assert_eq!(timeout(WAIT, channel.read(&mut buf)).await.unwrap().unwrap(), 0);
}

// ----------------------------------------------------------------------------
// General Handshake
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_general_handshake_discovers_peers_once() {
    let network = MemoryNetwork::new();
    let (a, mut a_rx) = node(&network, "a");
    let (b, mut b_rx) = node(&network, "b");
    a.start().await.unwrap();
    b.start().await.unwrap();

    for round in 1..=2u64 {
        b.connect(network.peer("a"), Purpose::General).await;
        eventually("handshake finished", || async {
            b.stats().await.sessions_completed == round
                && a.stats().await.sessions_completed == round
        })
        .await;
    }

    let b_events = settle(&mut b_rx).await;
    let discovered: Vec<_> = b_events
        .iter()
        .filter(|e| matches!(e, AppEvent::PeerDiscovered(_)))
        .collect();
    assert_eq!(discovered.len(), 1);
    assert_eq!(b.discovered_peers().await.len(), 1);
    assert_eq!(b.discovered_peers().await[0].remote_id, "a");
    assert_eq!(b.state().await, SessionState::Listening);

    let a_events = settle(&mut a_rx).await;
    assert!(a_events.contains(&AppEvent::PeerDiscovered(network.peer("b"))));
    assert_eq!(a.state().await, SessionState::Listening);
    assert!(toasts(&a_events).is_empty());
}

#[tokio::test]
async fn test_unavailable_fetch_resumes_without_restart() {
    let network = MemoryNetwork::new();
    let (a, _a_rx) = node_with(&network, "a", ann(), SessionConfig::testing());
    a.start().await.unwrap();
    let (b, mut b_rx) = node(&network, "b");
    b.start().await.unwrap();

    network.set_unavailable("b", true).await;
    b.fetch(network.peer("a")).await;

    eventually("fetch attempt failed", || async {
        b.stats().await.sessions_failed == 1
    })
    .await;

    let events = settle(&mut b_rx).await;
    assert_eq!(toasts(&events), vec!["Nearby service is not available"]);
    assert_eq!(
        states(&events),
        vec![
            SessionState::Listening,
            SessionState::FetchingData,
            SessionState::Listening
        ]
    );
    assert_eq!(network.listen_count("b", ServiceId::GENERAL), 1);
    assert_eq!(network.listen_count("b", ServiceId::FETCH), 1);
    assert!(profiles(&events).is_empty());
}

// ----------------------------------------------------------------------------
// Listener Faults
// ----------------------------------------------------------------------------

/// Memory transport whose fetch listener fails its first `accept` calls
struct FlakyTransport {
    inner: MemoryTransport,
    failures: Arc<AtomicUsize>,
}

struct FlakyListener {
    inner: Arc<dyn Listener>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn listen(&self, service: ServiceId) -> Result<Arc<dyn Listener>, TransportError> {
        let listener = self.inner.listen(service).await?;
        if service != ServiceId::FETCH {
            return Ok(listener);
        }
        Ok(Arc::new(FlakyListener {
            inner: listener,
            failures: self.failures.clone(),
        }))
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<Arc<dyn Channel>, TransportError> {
        self.inner.connect(peer, service).await
    }
}

#[async_trait]
impl Listener for FlakyListener {
    fn service(&self) -> ServiceId {
        self.inner.service()
    }

    async fn accept(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::NetworkIo(std::io::Error::from(
                std::io::ErrorKind::ConnectionAborted,
            )));
        }
        self.inner.accept().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_transient_accept_error_keeps_listening() {
    let network = MemoryNetwork::new();
    let failures = Arc::new(AtomicUsize::new(2));
    let (a_tx, mut a_rx) = event_channel();
    let a = SessionManager::builder(
        Arc::new(FlakyTransport {
            inner: network.transport("a"),
            failures: failures.clone(),
        }),
        Arc::new(a_tx),
        Arc::new(StaticProfileStore::new(ann())),
    )
    .session_config(SessionConfig::testing())
    .build()
    .unwrap();
    a.start().await.unwrap();

    eventually("accept errors consumed", || async {
        failures.load(Ordering::SeqCst) == 0
    })
    .await;
    let roles: Vec<_> = a.live_sessions().await.iter().map(|s| s.role).collect();
    assert!(roles.contains(&nearby_runtime::Role::AcceptFetch));

    let (b, mut b_rx) = node(&network, "b");
    b.fetch(network.peer("a")).await;
    wait_for_state(&b, SessionState::FetchingCompleted).await;

    let b_events = settle(&mut b_rx).await;
    assert_eq!(profiles(&b_events), vec![&ann()]);
    assert!(toasts(&b_events).is_empty());

    let a_events = settle(&mut a_rx).await;
    assert!(toasts(&a_events).is_empty());
    assert_eq!(network.listen_count("a", ServiceId::FETCH), 1);

    a.stop().await;
    assert_eq!(network.open_listeners("a"), 0);
    assert!(a.live_sessions().await.is_empty());
}
