//! Nearby Core
//!
//! Foundational types for discovering nearby peers and exchanging a small
//! profile record with one of them. This crate holds everything that does not
//! itself run a session:
//!
//! - [`types`] - service identifiers, roles, session states, peers and profiles
//! - [`state`] - the authoritative session state transition table
//! - [`codec`] - framing of a [`Profile`] on a byte stream (legacy text and
//!   length-prefixed variants)
//! - [`transport`] - the consumed `Transport` / `Listener` / `Channel`
//!   capabilities, plus an in-memory implementation for tests and demos
//! - [`events`] - notifications delivered to the UI layer
//! - [`profile`] - the local profile source
//! - [`directory`] - discovered peers, deduplicated by address
//! - [`config`] - timeouts, buffer sizes and service identifiers
//!
//! Session workers and the session manager live in `nearby-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod config;
pub mod directory;
pub mod errors;
pub mod events;
pub mod profile;
pub mod state;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use codec::{ProfileDecoder, WireFormat, ACK_TOKEN};
pub use config::{ServiceConfig, SessionConfig};
pub use directory::PeerDirectory;
pub use errors::{
    CodecError, NearbyError, Result, SessionError, StateTransitionError, TransportError,
};
pub use events::{event_channel, AppEvent, AppEventReceiver, AppEventSender, EventSink};
pub use profile::{ProfileStore, StaticProfileStore};
pub use state::{StateEvent, TransitionRecord};
pub use transport::{Channel, CloseSignal, Listener, MemoryNetwork, MemoryTransport, Transport};
pub use types::{PeerHandle, Profile, Purpose, Role, ServiceId, SessionId, SessionState};
