//! Transport abstraction
//!
//! The short-range radio stack is an external collaborator. Session workers
//! only see three capabilities:
//!
//! - [`Transport`] opens a [`Listener`] per service and dials peers
//! - [`Listener`] yields inbound [`Channel`]s until closed
//! - [`Channel`] is a duplex byte stream to exactly one peer
//!
//! Every method takes `&self`, and `close` must be callable while another
//! task is blocked in `accept`, `read` or `write` on the same resource: the
//! blocked call then returns [`TransportError::Closed`]. This is how sessions
//! are cancelled. `close` is idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::TransportError;
use crate::types::{PeerHandle, ServiceId};

pub mod memory;

pub use memory::{MemoryChannel, MemoryListener, MemoryNetwork, MemoryTransport};

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start listening on a service
    async fn listen(&self, service: ServiceId) -> Result<Arc<dyn Listener>, TransportError>;

    /// Open a channel to a peer's service
    async fn connect(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<Arc<dyn Channel>, TransportError>;
}

#[async_trait]
pub trait Listener: Send + Sync {
    fn service(&self) -> ServiceId;

    /// Wait for the next inbound channel
    async fn accept(&self) -> Result<Arc<dyn Channel>, TransportError>;

    async fn close(&self);
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn remote(&self) -> &PeerHandle;

    /// Read into `buf`; `Ok(0)` means the peer closed its side
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the whole buffer
    async fn write(&self, buf: &[u8]) -> Result<(), TransportError>;

    async fn close(&self);
}

// ----------------------------------------------------------------------------
// Close Signal
// ----------------------------------------------------------------------------

/// One-shot "closed" flag that blocked tasks can await
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the flag; returns `true` only for the first call
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_signal_wakes_waiter() {
        let signal = Arc::new(CloseSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_immediately_after_close() {
        let signal = CloseSignal::new();
        signal.close();
        tokio::time::timeout(Duration::from_millis(100), signal.closed())
            .await
            .unwrap();
    }
}
