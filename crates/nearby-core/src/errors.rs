//! Error types for nearby profile exchange
//!
//! Transport failures, codec failures, the session outcome taxonomy surfaced
//! to the UI, and the `NearbyError` type that unifies them.

use crate::types::SessionState;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a `Transport`, `Listener` or `Channel`
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not available: {reason}")]
    Unavailable { reason: String },
    #[error("Resource closed")]
    Closed,
    #[error("Peer unreachable: {peer_id}")]
    Unreachable { peer_id: String },
    #[error("Connection rejected by peer {peer_id}")]
    Rejected { peer_id: String },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

/// Failures while encoding or decoding a profile record
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("Invalid boolean field: {value}")]
    InvalidBool { value: String },
    #[error("Frame too large: {size} bytes (max: {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },
    #[error("Record is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Terminal outcome of a session that did not complete.
///
/// Every variant except `Cancelled` is surfaced to the UI as exactly one toast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Service unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Connection failed to peer {peer_id}: {reason}")]
    ConnectionFailed { peer_id: String, reason: String },
    #[error("Connection lost with peer {peer_id}: {reason}")]
    ConnectionLost { peer_id: String, reason: String },
    #[error("Profile from peer {peer_id} could not be decoded: {reason}")]
    DecodeFailed { peer_id: String, reason: String },
    #[error("Session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Classify a transport failure seen by a session that was not cancelled.
    ///
    /// `connected` tells whether the session had already reached a channel.
    pub fn from_transport(err: &TransportError, peer_id: &str, connected: bool) -> Self {
        if let TransportError::Unavailable { reason } = err {
            return SessionError::Unavailable {
                reason: reason.clone(),
            };
        }
        if connected {
            SessionError::ConnectionLost {
                peer_id: peer_id.to_string(),
                reason: err.to_string(),
            }
        } else {
            SessionError::ConnectionFailed {
                peer_id: peer_id.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Message shown to the user, `None` for silent cancellation
    pub fn toast_message(&self) -> Option<&'static str> {
        match self {
            SessionError::Unavailable { .. } => Some("Nearby service is not available"),
            SessionError::ConnectionFailed { .. } => Some("Unable to connect device"),
            SessionError::ConnectionLost { .. } => Some("Device connection was lost"),
            SessionError::DecodeFailed { .. } => Some("Received profile could not be read"),
            SessionError::Cancelled => None,
        }
    }

    /// Whether this outcome restarts listening
    pub fn restarts_listening(&self) -> bool {
        matches!(self, SessionError::ConnectionLost { .. })
    }
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: SessionState, event: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NearbyError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type Result<T> = core::result::Result<T, NearbyError>;
