//! TCP transport for nearby profile exchange
//!
//! Stands in for the short-range radio on machines that only have an IP
//! network. Each service gets its own port and a peer's `remote_id` is its
//! host, optionally followed by the two ports it listens on.
//!
//! - [`config`] - bind address and per-service ports
//! - [`error`] - errors specific to the TCP transport
//! - [`address`] - parsing of peer addresses
//! - [`transport`] - the `Transport`, `Listener` and `Channel` implementations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nearby_core::{ServiceConfig, ServiceId, Transport};
//! use nearby_tcp::{TcpTransport, TcpTransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TcpTransportConfig::new().with_ports(47810, 47811);
//! let transport = TcpTransport::new(config, ServiceConfig::default());
//!
//! let listener = transport.listen(ServiceId::FETCH).await?;
//! let channel = listener.accept().await?;
//! # Ok(())
//! # }
//! ```

mod address;
mod config;
mod error;
mod transport;

// Public API exports
pub use address::PeerAddress;
pub use config::TcpTransportConfig;
pub use error::TcpTransportError;
pub use transport::{TcpChannel, TcpListenerHandle, TcpTransport, TCP_SERVICE_TYPE};

// Re-export Transport trait for convenience
pub use nearby_core::Transport;
