//! Notifications delivered to the UI layer
//!
//! The runtime only produces events; whoever owns the session manager decides
//! how to render them. Delivery is ordered per producer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{PeerHandle, Profile, SessionState};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppEvent {
    /// The manager's authoritative state changed
    StateChanged(SessionState),
    /// A peer completed a presence handshake for the first time
    PeerDiscovered(PeerHandle),
    /// A fetch delivered the remote peer's profile
    ProfileReceived(Profile),
    /// Human-readable failure notice
    ToastMessage(String),
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Ordered, non-blocking delivery of [`AppEvent`]s
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

pub type AppEventSender = mpsc::UnboundedSender<AppEvent>;
pub type AppEventReceiver = mpsc::UnboundedReceiver<AppEvent>;

impl EventSink for mpsc::UnboundedSender<AppEvent> {
    fn emit(&self, event: AppEvent) {
        if let Err(e) = self.send(event) {
            debug!("Event receiver dropped, discarding {:?}", e.0);
        }
    }
}

/// Unbounded event channel whose sender is an [`EventSink`]
pub fn event_channel() -> (AppEventSender, AppEventReceiver) {
    mpsc::unbounded_channel()
}
