//! Session handles
//!
//! A [`SessionHandle`] is the manager's grip on one worker: its role, the
//! resource it owns (a listener for accept loops, a channel otherwise) and
//! the cancelled flag. Cancelling raises the flag first and then closes the
//! resource, so a worker whose blocked call fails can tell a deliberate stop
//! from a broken link.

use std::sync::Arc;

use nearby_core::{Channel, CloseSignal, Listener, PeerHandle, Role, SessionId};
use tokio::sync::Mutex;
use tracing::trace;

/// The transport resource a session exclusively owns
#[derive(Clone)]
pub enum SessionResource {
    Listener(Arc<dyn Listener>),
    Channel(Arc<dyn Channel>),
}

impl SessionResource {
    pub async fn close(&self) {
        match self {
            SessionResource::Listener(listener) => listener.close().await,
            SessionResource::Channel(channel) => channel.close().await,
        }
    }
}

pub struct SessionHandle {
    id: SessionId,
    role: Role,
    peer: Option<PeerHandle>,
    cancel: CloseSignal,
    resource: Mutex<Option<SessionResource>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, role: Role, peer: Option<PeerHandle>) -> Self {
        Self {
            id,
            role,
            peer,
            cancel: CloseSignal::new(),
            resource: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Remote peer, unknown for accept loops
    pub fn peer(&self) -> Option<&PeerHandle> {
        self.peer.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_closed()
    }

    /// Resolves once the session is cancelled
    pub async fn cancelled(&self) {
        self.cancel.closed().await
    }

    /// Raise the cancelled flag without touching the resource
    pub fn mark_cancelled(&self) -> bool {
        self.cancel.close()
    }

    /// Hand the session its resource.
    ///
    /// Returns `false` (and closes the resource) if the session was cancelled
    /// before the resource arrived.
    pub async fn attach(&self, resource: SessionResource) -> bool {
        let mut slot = self.resource.lock().await;
        if self.is_cancelled() {
            drop(slot);
            resource.close().await;
            return false;
        }
        *slot = Some(resource);
        true
    }

    /// Cancel the session: flag first, then close the resource
    pub async fn cancel(&self) {
        self.mark_cancelled();
        self.release().await;
    }

    /// Close the owned resource, if any. Safe to call more than once.
    pub async fn release(&self) {
        let resource = self.resource.lock().await.take();
        if let Some(resource) = resource {
            trace!(session = %self.id, role = %self.role, "Releasing session resource");
            resource.close().await;
        }
    }
}
