//! Core types for nearby profile exchange
//!
//! Newtypes and small enums shared by the codec, the transports and the
//! session runtime.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service Identifier
// ----------------------------------------------------------------------------

/// Identifier of one logical service a device exposes on the transport.
///
/// A device listens on two of them: the general session service and the
/// profile fetch service. Each gets its own listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// General pairing / presence service
    pub const GENERAL: Self = Self(Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66));

    /// On-demand profile pull service
    pub const FETCH: Self = Self(Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66));

    /// Wrap an arbitrary UUID
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Purpose and Role
// ----------------------------------------------------------------------------

/// What an outbound connection is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Presence handshake on the general service
    General,
    /// Pull the remote peer's profile
    Fetch,
}

/// Which side of which service a session plays.
///
/// The role picks the service id and what happens once a channel exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Accepts inbound presence handshakes
    AcceptGeneral,
    /// Accepts inbound fetch requests and answers with the local profile
    AcceptFetch,
    /// Dials a peer's general service
    ConnectOutboundGeneral,
    /// Dials a peer's fetch service and receives its profile
    ConnectOutboundFetch,
}

impl Role {
    /// Outbound role for a connection purpose
    pub fn outbound(purpose: Purpose) -> Self {
        match purpose {
            Purpose::General => Role::ConnectOutboundGeneral,
            Purpose::Fetch => Role::ConnectOutboundFetch,
        }
    }

    /// Inbound role for a listening purpose
    pub fn inbound(purpose: Purpose) -> Self {
        match purpose {
            Purpose::General => Role::AcceptGeneral,
            Purpose::Fetch => Role::AcceptFetch,
        }
    }

    pub fn purpose(&self) -> Purpose {
        match self {
            Role::AcceptGeneral | Role::ConnectOutboundGeneral => Purpose::General,
            Role::AcceptFetch | Role::ConnectOutboundFetch => Purpose::Fetch,
        }
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, Role::AcceptGeneral | Role::AcceptFetch)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::AcceptGeneral => "accept-general",
            Role::AcceptFetch => "accept-fetch",
            Role::ConnectOutboundGeneral => "connect-general",
            Role::ConnectOutboundFetch => "connect-fetch",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of the session manager (and of individual sessions)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Doing nothing
    #[default]
    Idle,
    /// Listening for inbound peers
    Listening,
    /// Outbound connection attempt in flight
    Connecting,
    /// A channel to a peer is established
    Connected,
    /// A profile fetch is in progress
    FetchingData,
    /// The last profile exchange has finished
    FetchingCompleted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Listening => "Listening",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::FetchingData => "FetchingData",
            SessionState::FetchingCompleted => "FetchingCompleted",
        }
    }

    /// Whether a UI should treat the device as busy
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::FetchingData
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Identifier the session manager assigns to each session it spawns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Peer Handle
// ----------------------------------------------------------------------------

/// A peer found via discovery.
///
/// Equality, ordering and hashing use `remote_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Stable peer address
    pub remote_id: String,
    /// Service type reported by discovery
    pub discovered_service_type: String,
}

impl PeerHandle {
    pub fn new(remote_id: impl Into<String>, discovered_service_type: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            discovered_service_type: discovered_service_type.into(),
        }
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.remote_id == other.remote_id
    }
}

impl Eq for PeerHandle {}

impl PartialOrd for PeerHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.remote_id.cmp(&other.remote_id)
    }
}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.remote_id.hash(state);
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote_id)
    }
}

// ----------------------------------------------------------------------------
// Profile
// ----------------------------------------------------------------------------

/// The record exchanged during a fetch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    display_name: String,
    age: String,
    is_male: bool,
    interests: String,
}

impl Profile {
    pub fn new(
        display_name: impl Into<String>,
        age: impl Into<String>,
        is_male: bool,
        interests: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            age: age.into(),
            is_male,
            interests: interests.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn age(&self) -> &str {
        &self.age
    }

    pub fn is_male(&self) -> bool {
        self.is_male
    }

    pub fn interests(&self) -> &str {
        &self.interests
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("Username", "18", true, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_peer_identity_is_remote_id_only() {
        let a = PeerHandle::new("00:11:22:33:44:55", "phone");
        let b = PeerHandle::new("00:11:22:33:44:55", "laptop");
        let c = PeerHandle::new("00:11:22:33:44:00", "phone");

        assert_eq!(a, b);
        assert!(c < a);

        let set: BTreeSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().remote_id, "00:11:22:33:44:00");
    }

    #[test]
    fn test_role_mapping() {
        assert_eq!(Role::outbound(Purpose::Fetch), Role::ConnectOutboundFetch);
        assert_eq!(Role::inbound(Purpose::General), Role::AcceptGeneral);
        assert_eq!(Role::AcceptFetch.purpose(), Purpose::Fetch);
        assert!(Role::AcceptFetch.is_inbound());
        assert!(!Role::ConnectOutboundGeneral.is_inbound());
    }

    #[test]
    fn test_service_ids_are_distinct() {
        assert_ne!(ServiceId::GENERAL, ServiceId::FETCH);
        assert_eq!(
            ServiceId::GENERAL.to_string(),
            "fa87c0d0-afac-11de-8a39-0800200c9a66"
        );
    }
}
