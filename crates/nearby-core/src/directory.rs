//! Discovered peers, deduplicated and ordered by address

use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::types::PeerHandle;

#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: BTreeSet<PeerHandle>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer; returns `true` the first time its address is seen
    pub fn insert(&mut self, peer: PeerHandle) -> bool {
        self.peers.insert(peer)
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.peers.iter().any(|p| p.remote_id == remote_id)
    }

    pub fn remove(&mut self, remote_id: &str) -> Option<PeerHandle> {
        let found = self.peers.iter().find(|p| p.remote_id == remote_id).cloned()?;
        self.peers.take(&found)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Peers ordered by address (optimized for small collections)
    pub fn peers(&self) -> SmallVec<[PeerHandle; 8]> {
        self.peers.iter().cloned().collect()
    }
}
