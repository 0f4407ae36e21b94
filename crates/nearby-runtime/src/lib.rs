//! Nearby Runtime
//!
//! The session lifecycle engine:
//! - `SessionManager`: owns the listeners, spawns and tracks session workers,
//!   and holds the single authoritative `SessionState`
//! - Session workers: the per-service accept loops, outbound connect attempts
//!   and the profile transfer that runs once a channel exists
//!
//! Types, codec and transport capabilities come from `nearby-core`.

pub mod builder;
pub mod manager;
pub mod session;
pub mod transfer;

pub use builder::SessionManagerBuilder;
pub use manager::{ManagerStats, SessionInfo, SessionManager};
pub use session::{SessionHandle, SessionResource};

// Re-export core types for convenience
pub use nearby_core::{
    event_channel, AppEvent, AppEventReceiver, AppEventSender, EventSink, NearbyError,
    PeerHandle, Profile, ProfileStore, Purpose, Role, ServiceConfig, SessionConfig,
    SessionError, SessionId, SessionState, StaticProfileStore, Transport, WireFormat,
};
