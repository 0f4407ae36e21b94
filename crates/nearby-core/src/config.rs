//! Session configuration
//!
//! Timeouts, buffer sizes, wire format and the service identifiers a device
//! listens on.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::WireFormat;
use crate::errors::NearbyError;
use crate::types::{Purpose, ServiceId};

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for session workers and transfers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on an outbound connect attempt
    pub connect_timeout: Duration,
    /// Bound on the sender's wait for the receiver's acknowledgement
    pub ack_timeout: Duration,
    /// Pause after the receiver writes its acknowledgement, before closing
    pub ack_linger: Duration,
    /// Bytes requested per channel read
    pub read_buffer_size: usize,
    /// Largest record accepted by the framed codec
    pub max_frame_size: usize,
    /// Encoding of the profile record on the wire
    pub wire_format: WireFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(2),
            ack_linger: Duration::from_millis(100),
            read_buffer_size: 1024,
            max_frame_size: 64 * 1024,
            wire_format: WireFormat::Text,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts for tests
    pub fn testing() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(300),
            ack_linger: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_ack_linger(mut self, linger: Duration) -> Self {
        self.ack_linger = linger;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Reject settings a session cannot run with
    pub fn validate(&self) -> Result<(), NearbyError> {
        if self.read_buffer_size == 0 {
            return Err(NearbyError::InvalidConfiguration {
                reason: "read_buffer_size must be non-zero".to_string(),
            });
        }
        if self.max_frame_size == 0 {
            return Err(NearbyError::InvalidConfiguration {
                reason: "max_frame_size must be non-zero".to_string(),
            });
        }
        if u32::try_from(self.max_frame_size).is_err() {
            return Err(NearbyError::InvalidConfiguration {
                reason: "max_frame_size must fit the 32-bit frame header".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(NearbyError::InvalidConfiguration {
                reason: "connect_timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Service Configuration
// ----------------------------------------------------------------------------

/// The two service identifiers a device exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name published with the service records
    pub service_name: String,
    pub general: ServiceId,
    pub fetch: ServiceId,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "NearbyInsecure".to_string(),
            general: ServiceId::GENERAL,
            fetch: ServiceId::FETCH,
        }
    }
}

impl ServiceConfig {
    pub fn service_for(&self, purpose: Purpose) -> ServiceId {
        match purpose {
            Purpose::General => self.general,
            Purpose::Fetch => self.fetch,
        }
    }

    pub fn purpose_of(&self, service: ServiceId) -> Option<Purpose> {
        if service == self.general {
            Some(Purpose::General)
        } else if service == self.fetch {
            Some(Purpose::Fetch)
        } else {
            None
        }
    }

    /// Both services, general first
    pub fn all(&self) -> [(Purpose, ServiceId); 2] {
        [(Purpose::General, self.general), (Purpose::Fetch, self.fetch)]
    }

    pub fn validate(&self) -> Result<(), NearbyError> {
        if self.general == self.fetch {
            return Err(NearbyError::InvalidConfiguration {
                reason: "general and fetch services must use different ids".to_string(),
            });
        }
        Ok(())
    }
}
