//! Error types for the TCP transport

use std::io;

use nearby_core::TransportError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the TCP transport
#[derive(Error, Debug)]
pub enum TcpTransportError {
    #[error("Invalid peer address: {remote_id}")]
    InvalidAddress { remote_id: String },

    #[error("No port configured for service {service}")]
    UnknownService { service: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TcpTransportError> for TransportError {
    fn from(err: TcpTransportError) -> Self {
        match err {
            TcpTransportError::InvalidAddress { remote_id } => TransportError::Unreachable {
                peer_id: remote_id,
            },
            TcpTransportError::UnknownService { .. } | TcpTransportError::Bind { .. } => {
                TransportError::Unavailable {
                    reason: err.to_string(),
                }
            }
            TcpTransportError::Connect { addr, source } => match source.kind() {
                io::ErrorKind::ConnectionRefused => TransportError::Unreachable { peer_id: addr },
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    TransportError::Rejected { peer_id: addr }
                }
                io::ErrorKind::TimedOut => TransportError::Timeout { duration_ms: 0 },
                _ => TransportError::NetworkIo(source),
            },
            TcpTransportError::Io(e) => TransportError::NetworkIo(e),
        }
    }
}
