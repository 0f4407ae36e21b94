//! Session State Machine
//!
//! The authoritative transition table of the session manager. Transitions are
//! pure: the manager feeds a [`StateEvent`] and either gets the next state or a
//! [`StateTransitionError`] for an event that does not apply. A rejected
//! `ChannelEstablished` is how the manager learns that a session must not
//! become the current one.
//!
//! ```text
//! Idle --Start--> Listening
//! Listening --FetchRequested--> FetchingData
//! Listening --ChannelEstablished(inbound or general)--> Connected
//! Connected --TransferCompleted(accept-fetch)--> FetchingCompleted
//! Connected --TransferCompleted(general)--> Listening
//! FetchingData --ChannelEstablished(connect-fetch)--> FetchingData
//! FetchingData --TransferCompleted / TransferFailed--> FetchingCompleted
//! FetchingData --FetchAbandoned(resume)--> resume
//! FetchingCompleted --Start--> Listening
//! any --Stop--> Idle
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;
use crate::types::{Role, SessionState};

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that drive the manager's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateEvent {
    /// `start()` or the automatic restart after a lost connection
    Start,
    /// `stop()`
    Stop,
    /// `connect(_, Fetch)` before the attempt begins
    FetchRequested,
    /// A session reached a channel
    ChannelEstablished { role: Role },
    /// The current session's transfer finished
    TransferCompleted { role: Role },
    /// The current session's transfer failed without losing the channel
    TransferFailed { role: Role },
    /// Every pending fetch failed before reaching a channel
    FetchAbandoned { resume: SessionState },
}

impl StateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::Start => "Start",
            StateEvent::Stop => "Stop",
            StateEvent::FetchRequested => "FetchRequested",
            StateEvent::ChannelEstablished { .. } => "ChannelEstablished",
            StateEvent::TransferCompleted { .. } => "TransferCompleted",
            StateEvent::TransferFailed { .. } => "TransferFailed",
            StateEvent::FetchAbandoned { .. } => "FetchAbandoned",
        }
    }
}

// ----------------------------------------------------------------------------
// Audit Trail
// ----------------------------------------------------------------------------

/// One applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Milliseconds since UNIX epoch
    pub timestamp: u64,
    pub from: SessionState,
    pub to: SessionState,
    pub event: StateEvent,
}

impl TransitionRecord {
    pub fn new(from: SessionState, to: SessionState, event: StateEvent) -> Self {
        Self {
            timestamp: current_millis(),
            from,
            to,
            event,
        }
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SessionState {
    /// Next state for `event`, or an error if the event does not apply here
    pub fn transition(self, event: StateEvent) -> Result<SessionState, StateTransitionError> {
        use SessionState::*;

        let next = match (self, event) {
            // Universal transitions
            (_, StateEvent::Stop) => Idle,
            (_, StateEvent::Start) => Listening,
            (_, StateEvent::FetchRequested) => FetchingData,

            // Outbound fetch keeps the busy state through the transfer
            (
                FetchingData,
                StateEvent::ChannelEstablished {
                    role: Role::ConnectOutboundFetch,
                },
            ) => FetchingData,

            (Listening | FetchingCompleted, StateEvent::ChannelEstablished { role })
                if role != Role::ConnectOutboundFetch =>
            {
                Connected
            }

            // Transfer end
            (
                FetchingData,
                StateEvent::TransferCompleted {
                    role: Role::ConnectOutboundFetch,
                }
                | StateEvent::TransferFailed {
                    role: Role::ConnectOutboundFetch,
                },
            ) => FetchingCompleted,

            (Connected, StateEvent::TransferCompleted { role } | StateEvent::TransferFailed { role }) => {
                match role {
                    Role::AcceptFetch => FetchingCompleted,
                    Role::AcceptGeneral | Role::ConnectOutboundGeneral => Listening,
                    Role::ConnectOutboundFetch => FetchingCompleted,
                }
            }

            (FetchingData, StateEvent::FetchAbandoned { resume }) => resume,

            (from, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from,
                    event: format!("{:?}", event),
                })
            }
        };

        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
