//! TCP transport configuration

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the TCP transport
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TcpTransportConfig {
    /// Address listeners bind to
    pub bind_host: String,
    /// Local port of the general service (0 picks a free port)
    pub general_port: u16,
    /// Local port of the fetch service (0 picks a free port)
    pub fetch_port: u16,
    /// Ports assumed for peers whose address names only a host
    pub remote_general_port: u16,
    pub remote_fetch_port: u16,
    /// Disable Nagle's algorithm on every stream
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            general_port: 47810,
            fetch_port: 47811,
            remote_general_port: 47810,
            remote_fetch_port: 47811,
            nodelay: true,
        }
    }
}

impl TcpTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loopback-only listeners on free ports
    pub fn loopback() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            general_port: 0,
            fetch_port: 0,
            ..Self::default()
        }
    }

    /// Set bind host
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Set both local ports
    pub fn with_ports(mut self, general: u16, fetch: u16) -> Self {
        self.general_port = general;
        self.fetch_port = fetch;
        self
    }

    /// Set the ports assumed for host-only peer addresses
    pub fn with_remote_ports(mut self, general: u16, fetch: u16) -> Self {
        self.remote_general_port = general;
        self.remote_fetch_port = fetch;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}
