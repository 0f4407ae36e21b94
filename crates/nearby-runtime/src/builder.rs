//! Session manager builder
//!
//! Collects the three injected capabilities plus configuration and validates
//! the configuration before a manager exists.

use std::sync::Arc;

use nearby_core::{EventSink, NearbyError, ProfileStore, ServiceConfig, SessionConfig, Transport};

use crate::manager::{SessionManager, Shared};

pub struct SessionManagerBuilder {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    profiles: Arc<dyn ProfileStore>,
    session_config: SessionConfig,
    service_config: ServiceConfig,
}

impl SessionManagerBuilder {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            transport,
            events,
            profiles,
            session_config: SessionConfig::default(),
            service_config: ServiceConfig::default(),
        }
    }

    /// Set timeouts, buffer sizes and wire format
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Set the service identifiers
    pub fn service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = config;
        self
    }

    pub fn build(self) -> Result<SessionManager, NearbyError> {
        self.session_config.validate()?;
        self.service_config.validate()?;

        Ok(SessionManager::from_shared(Shared::new(
            self.transport,
            self.events,
            self.profiles,
            self.session_config,
            self.service_config,
        )))
    }
}
