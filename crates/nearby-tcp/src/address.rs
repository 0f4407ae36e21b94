//! Peer addresses
//!
//! A TCP peer's `remote_id` is either `host` (the configured remote ports
//! apply) or `host:general_port:fetch_port`. IPv6 literals go in brackets.

use nearby_core::Purpose;

use crate::config::TcpTransportConfig;
use crate::error::TcpTransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub host: String,
    pub general_port: u16,
    pub fetch_port: u16,
}

impl PeerAddress {
    pub fn parse(remote_id: &str, config: &TcpTransportConfig) -> Result<Self, TcpTransportError> {
        let invalid = || TcpTransportError::InvalidAddress {
            remote_id: remote_id.to_string(),
        };

        let (host, ports) = if let Some(rest) = remote_id.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            (host, rest.strip_prefix(':'))
        } else {
            match remote_id.split_once(':') {
                Some((host, ports)) => (host, Some(ports)),
                None => (remote_id, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let (general_port, fetch_port) = match ports {
            None => (config.remote_general_port, config.remote_fetch_port),
            Some(ports) => {
                let (general, fetch) = ports.split_once(':').ok_or_else(invalid)?;
                (
                    general.parse().map_err(|_| invalid())?,
                    fetch.parse().map_err(|_| invalid())?,
                )
            }
        };

        Ok(Self {
            host: host.to_string(),
            general_port,
            fetch_port,
        })
    }

    pub fn port_for(&self, purpose: Purpose) -> u16 {
        match purpose {
            Purpose::General => self.general_port,
            Purpose::Fetch => self.fetch_port,
        }
    }

    /// `host:port` form accepted by `TcpStream::connect`
    pub fn socket_addr(&self, purpose: Purpose) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port_for(purpose))
        } else {
            format!("{}:{}", self.host, self.port_for(purpose))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_only_uses_configured_ports() {
        let config = TcpTransportConfig::new().with_remote_ports(9000, 9001);
        let addr = PeerAddress::parse("phone.local", &config).unwrap();
        assert_eq!(addr.socket_addr(Purpose::General), "phone.local:9000");
        assert_eq!(addr.socket_addr(Purpose::Fetch), "phone.local:9001");
    }

    #[test]
    fn test_explicit_ports() {
        let config = TcpTransportConfig::new();
        let addr = PeerAddress::parse("127.0.0.1:5000:5001", &config).unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port_for(Purpose::Fetch), 5001);

        let addr = PeerAddress::parse("[::1]:5000:5001", &config).unwrap();
        assert_eq!(addr.socket_addr(Purpose::General), "[::1]:5000");
    }

    #[test]
    fn test_malformed_addresses() {
        let config = TcpTransportConfig::new();
        for remote_id in ["", "host:5000", "host:a:b", "[::1", ":1:2"] {
            assert!(
                PeerAddress::parse(remote_id, &config).is_err(),
                "{} should be rejected",
                remote_id
            );
        }
    }
}
