//! TCP Transport Implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use nearby_core::{
    Channel, CloseSignal, Listener, PeerHandle, ServiceConfig, ServiceId, Transport,
    TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::config::TcpTransportConfig;
use crate::error::TcpTransportError;

/// Service type reported for peers reached over TCP
pub const TCP_SERVICE_TYPE: &str = "tcp";

// ----------------------------------------------------------------------------
// TCP Transport
// ----------------------------------------------------------------------------

pub struct TcpTransport {
    config: TcpTransportConfig,
    services: ServiceConfig,
    /// Addresses actually bound, per service
    bound: std::sync::Mutex<HashMap<ServiceId, SocketAddr>>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig, services: ServiceConfig) -> Self {
        Self {
            config,
            services,
            bound: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    /// Address the listener for `service` is bound to, once listening
    pub fn local_addr(&self, service: ServiceId) -> Option<SocketAddr> {
        let bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
        bound.get(&service).copied()
    }

    /// `remote_id` other nodes on this host can use to reach us
    pub fn loopback_peer(&self) -> Option<PeerHandle> {
        let general = self.local_addr(self.services.general)?;
        let fetch = self.local_addr(self.services.fetch)?;
        Some(PeerHandle::new(
            format!("127.0.0.1:{}:{}", general.port(), fetch.port()),
            TCP_SERVICE_TYPE,
        ))
    }

    /// Bind the listening socket for `service`
    pub async fn bind(&self, service: ServiceId) -> Result<TcpListenerHandle, TcpTransportError> {
        let port = match self.services.purpose_of(service) {
            Some(nearby_core::Purpose::General) => self.config.general_port,
            Some(nearby_core::Purpose::Fetch) => self.config.fetch_port,
            None => {
                return Err(TcpTransportError::UnknownService {
                    service: service.to_string(),
                })
            }
        };

        let addr = format!("{}:{}", self.config.bind_host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TcpTransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        {
            let mut bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
            bound.insert(service, local_addr);
        }
        info!("Listening for {} on {}", service, local_addr);

        Ok(TcpListenerHandle {
            service,
            local_addr,
            nodelay: self.config.nodelay,
            listener: Mutex::new(Some(listener)),
            closed: CloseSignal::new(),
        })
    }

    /// Open a stream to `peer`'s port for `service`
    pub async fn dial(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<TcpChannel, TcpTransportError> {
        let purpose =
            self.services
                .purpose_of(service)
                .ok_or_else(|| TcpTransportError::UnknownService {
                    service: service.to_string(),
                })?;
        let address = PeerAddress::parse(&peer.remote_id, &self.config)?;
        let addr = address.socket_addr(purpose);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TcpTransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        debug!("Connected to {} for {}", addr, service);

        Ok(TcpChannel::new(stream, peer.clone(), self.config.nodelay))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, service: ServiceId) -> Result<Arc<dyn Listener>, TransportError> {
        Ok(Arc::new(self.bind(service).await?))
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<Arc<dyn Channel>, TransportError> {
        Ok(Arc::new(self.dial(peer, service).await?))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

pub struct TcpListenerHandle {
    service: ServiceId,
    local_addr: SocketAddr,
    nodelay: bool,
    listener: Mutex<Option<TcpListener>>,
    closed: CloseSignal,
}

impl TcpListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpListenerHandle {
    fn service(&self) -> ServiceId {
        self.service
    }

    async fn accept(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let guard = tokio::select! {
            guard = self.listener.lock() => guard,
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };
        let Some(listener) = guard.as_ref() else {
            return Err(TransportError::Closed);
        };

        let (stream, remote) = tokio::select! {
            biased;
            _ = self.closed.closed() => return Err(TransportError::Closed),
            accepted = listener.accept() => accepted?,
        };
        debug!("Accepted {} on {}", remote, self.local_addr);

        // Inbound peers are known by their IP; the source port is ephemeral
        let peer = PeerHandle::new(remote.ip().to_string(), TCP_SERVICE_TYPE);
        Ok(Arc::new(TcpChannel::new(stream, peer, self.nodelay)))
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }
        self.listener.lock().await.take();
        debug!("Listener on {} closed", self.local_addr);
    }
}

// ----------------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------------

pub struct TcpChannel {
    remote: PeerHandle,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: CloseSignal,
}

impl TcpChannel {
    /// A stream that refuses `TCP_NODELAY` is still usable
    fn new(stream: TcpStream, remote: PeerHandle, nodelay: bool) -> Self {
        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Could not set nodelay on stream to {}: {}", remote.remote_id, e);
            }
        }
        let (reader, writer) = stream.into_split();
        Self {
            remote,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: CloseSignal::new(),
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn remote(&self) -> &PeerHandle {
        &self.remote
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut guard = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };
        let Some(reader) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(TransportError::Closed),
            read = reader.read(buf) => Ok(read?),
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(TransportError::Closed),
            written = writer.write_all(buf) => Ok(written?),
        }
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of stream to {} failed: {}", self.remote.remote_id, e);
            }
        }
        self.reader.lock().await.take();
    }
}
