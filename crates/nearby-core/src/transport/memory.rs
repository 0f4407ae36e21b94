//! In-process transport
//!
//! A [`MemoryNetwork`] connects any number of named nodes inside one process.
//! Each node gets a [`MemoryTransport`]; channels are pairs of unbounded
//! queues. The network can inject the faults a radio stack produces (adapter
//! off, peer refusing, peer never answering) and counts open resources per
//! node so tests can assert that nothing leaks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use super::{Channel, CloseSignal, Listener, Transport};
use crate::errors::TransportError;
use crate::types::{PeerHandle, ServiceId};

/// Service type reported for memory peers
pub const MEMORY_SERVICE_TYPE: &str = "memory";

type ChannelQueue = mpsc::UnboundedSender<Arc<dyn Channel>>;

// ----------------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct NodeCounters {
    open_listeners: AtomicUsize,
    open_channels: AtomicUsize,
}

#[derive(Default)]
struct NetworkInner {
    registry: Mutex<HashMap<(String, ServiceId), ChannelQueue>>,
    counters: std::sync::Mutex<HashMap<String, Arc<NodeCounters>>>,
    listen_counts: std::sync::Mutex<HashMap<(String, ServiceId), usize>>,
    unavailable: Mutex<HashSet<String>>,
    unresponsive: Mutex<HashSet<String>>,
    rejecting: Mutex<HashSet<String>>,
}

impl NetworkInner {
    fn counters(&self, node: &str) -> Arc<NodeCounters> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.entry(node.to_string()).or_default().clone()
    }
}

/// Shared medium for a set of in-process nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for the node named `node`
    pub fn transport(&self, node: &str) -> MemoryTransport {
        MemoryTransport {
            node: node.to_string(),
            counters: self.inner.counters(node),
            network: self.inner.clone(),
        }
    }

    /// Handle other nodes use to reach `node`
    pub fn peer(&self, node: &str) -> PeerHandle {
        PeerHandle::new(node, MEMORY_SERVICE_TYPE)
    }

    /// Make `listen` and `connect` on `node` fail with `Unavailable`
    pub async fn set_unavailable(&self, node: &str, unavailable: bool) {
        toggle(&self.inner.unavailable, node, unavailable).await;
    }

    /// Make connection attempts to `node` hang forever
    pub async fn set_unresponsive(&self, node: &str, unresponsive: bool) {
        toggle(&self.inner.unresponsive, node, unresponsive).await;
    }

    /// Make connection attempts to `node` fail with `Rejected`
    pub async fn set_rejecting(&self, node: &str, rejecting: bool) {
        toggle(&self.inner.rejecting, node, rejecting).await;
    }

    /// Number of successful `listen` calls `node` made on `service`
    pub fn listen_count(&self, node: &str, service: ServiceId) -> usize {
        let counts = self
            .inner
            .listen_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        counts.get(&(node.to_string(), service)).copied().unwrap_or(0)
    }

    /// Listeners of `node` not yet closed or dropped
    pub fn open_listeners(&self, node: &str) -> usize {
        self.inner.counters(node).open_listeners.load(Ordering::SeqCst)
    }

    /// Channel ends held by `node` not yet closed or dropped
    pub fn open_channels(&self, node: &str) -> usize {
        self.inner.counters(node).open_channels.load(Ordering::SeqCst)
    }
}

async fn toggle(set: &Mutex<HashSet<String>>, node: &str, on: bool) {
    let mut set = set.lock().await;
    if on {
        set.insert(node.to_string());
    } else {
        set.remove(node);
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// One node's view of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    node: String,
    counters: Arc<NodeCounters>,
    network: Arc<NetworkInner>,
}

impl MemoryTransport {
    pub fn node(&self) -> &str {
        &self.node
    }

    async fn ensure_available(&self) -> Result<(), TransportError> {
        if self.network.unavailable.lock().await.contains(&self.node) {
            return Err(TransportError::Unavailable {
                reason: format!("node {} is offline", self.node),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, service: ServiceId) -> Result<Arc<dyn Listener>, TransportError> {
        self.ensure_available().await?;

        let key = (self.node.clone(), service);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut registry = self.network.registry.lock().await;
            if let Some(existing) = registry.get(&key) {
                if !existing.is_closed() {
                    return Err(TransportError::Unavailable {
                        reason: format!("service {} already bound on {}", service, self.node),
                    });
                }
            }
            registry.insert(key.clone(), tx);
        }

        {
            let mut counts = self
                .network
                .listen_counts
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
        self.counters.open_listeners.fetch_add(1, Ordering::SeqCst);
        debug!("Node {} listening on {}", self.node, service);

        Ok(Arc::new(MemoryListener {
            service,
            key,
            queue: Mutex::new(rx),
            closed: CloseSignal::new(),
            released: AtomicBool::new(false),
            counters: self.counters.clone(),
            network: self.network.clone(),
        }))
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<Arc<dyn Channel>, TransportError> {
        self.ensure_available().await?;

        if self.network.rejecting.lock().await.contains(&peer.remote_id) {
            return Err(TransportError::Rejected {
                peer_id: peer.remote_id.clone(),
            });
        }
        if self.network.unresponsive.lock().await.contains(&peer.remote_id) {
            trace!("Peer {} never answers", peer.remote_id);
            std::future::pending::<()>().await;
        }

        let queue = {
            let registry = self.network.registry.lock().await;
            registry
                .get(&(peer.remote_id.clone(), service))
                .filter(|q| !q.is_closed())
                .cloned()
        };
        let Some(queue) = queue else {
            return Err(TransportError::Unreachable {
                peer_id: peer.remote_id.clone(),
            });
        };

        let (local, remote) = MemoryChannel::pair(
            PeerHandle::new(peer.remote_id.clone(), peer.discovered_service_type.clone()),
            self.counters.clone(),
            PeerHandle::new(self.node.clone(), MEMORY_SERVICE_TYPE),
            self.network.counters(&peer.remote_id),
        );

        if queue.send(Arc::new(remote)).is_err() {
            local.close().await;
            return Err(TransportError::Unreachable {
                peer_id: peer.remote_id.clone(),
            });
        }

        debug!("Node {} connected to {} on {}", self.node, peer.remote_id, service);
        Ok(Arc::new(local))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

pub struct MemoryListener {
    service: ServiceId,
    key: (String, ServiceId),
    queue: Mutex<mpsc::UnboundedReceiver<Arc<dyn Channel>>>,
    closed: CloseSignal,
    released: AtomicBool,
    counters: Arc<NodeCounters>,
    network: Arc<NetworkInner>,
}

impl MemoryListener {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counters.open_listeners.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Listener for MemoryListener {
    fn service(&self) -> ServiceId {
        self.service
    }

    async fn accept(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let mut queue = tokio::select! {
            guard = self.queue.lock() => guard,
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(TransportError::Closed),
            channel = queue.recv() => channel.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }

        let mut queue = self.queue.lock().await;
        queue.close();
        while let Ok(pending) = queue.try_recv() {
            pending.close().await;
        }
        drop(queue);

        // A closed queue is ours; a live one belongs to a newer listener
        {
            let mut registry = self.network.registry.lock().await;
            if registry.get(&self.key).is_some_and(|q| q.is_closed()) {
                registry.remove(&self.key);
            }
        }

        self.release();
        debug!("Listener {} on {} closed", self.key.1, self.key.0);
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------------

struct Inbox {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// One end of an in-process duplex stream
pub struct MemoryChannel {
    remote: PeerHandle,
    outbox: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbox: Mutex<Inbox>,
    closed: Arc<CloseSignal>,
    peer_closed: Arc<CloseSignal>,
    released: AtomicBool,
    counters: Arc<NodeCounters>,
}

impl MemoryChannel {
    /// Two connected ends; `a` talks to `a_remote`, `b` talks to `b_remote`
    fn pair(
        a_remote: PeerHandle,
        a_counters: Arc<NodeCounters>,
        b_remote: PeerHandle,
        b_counters: Arc<NodeCounters>,
    ) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_closed = Arc::new(CloseSignal::new());
        let b_closed = Arc::new(CloseSignal::new());

        a_counters.open_channels.fetch_add(1, Ordering::SeqCst);
        b_counters.open_channels.fetch_add(1, Ordering::SeqCst);

        let a = Self {
            remote: a_remote,
            outbox: Mutex::new(Some(a_tx)),
            inbox: Mutex::new(Inbox {
                rx: a_rx,
                pending: Vec::new(),
            }),
            closed: a_closed.clone(),
            peer_closed: b_closed.clone(),
            released: AtomicBool::new(false),
            counters: a_counters,
        };
        let b = Self {
            remote: b_remote,
            outbox: Mutex::new(Some(b_tx)),
            inbox: Mutex::new(Inbox {
                rx: b_rx,
                pending: Vec::new(),
            }),
            closed: b_closed,
            peer_closed: a_closed,
            released: AtomicBool::new(false),
            counters: b_counters,
        };
        (a, b)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counters.open_channels.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn take_into(buf: &mut [u8], source: &mut Vec<u8>) -> usize {
    let n = buf.len().min(source.len());
    buf[..n].copy_from_slice(&source[..n]);
    source.drain(..n);
    n
}

#[async_trait]
impl Channel for MemoryChannel {
    fn remote(&self) -> &PeerHandle {
        &self.remote
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inbox = tokio::select! {
            guard = self.inbox.lock() => guard,
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        if !inbox.pending.is_empty() {
            return Ok(take_into(buf, &mut inbox.pending));
        }

        let Inbox { rx, pending } = &mut *inbox;
        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(TransportError::Closed),
            message = rx.recv() => match message {
                Some(mut bytes) => {
                    let n = take_into(buf, &mut bytes);
                    *pending = bytes;
                    Ok(n)
                }
                None => Ok(0),
            },
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.peer_closed.is_closed() {
            return Err(broken_pipe());
        }

        let outbox = self.outbox.lock().await;
        match outbox.as_ref() {
            Some(tx) => tx.send(buf.to_vec()).map_err(|_| broken_pipe()),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }
        self.outbox.lock().await.take();
        self.release();
        trace!("Channel to {} closed", self.remote.remote_id);
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.release();
    }
}

fn broken_pipe() -> TransportError {
    TransportError::NetworkIo(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "peer closed the channel",
    ))
}
