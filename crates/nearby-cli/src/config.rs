//! Configuration for the nearby CLI
//!
//! Loaded from a TOML file given with `--config`; every section and field is
//! optional and falls back to its default. Durations are written in
//! milliseconds.
//!
//! ```toml
//! [session]
//! connect_timeout_ms = 10000
//! wire_format = "framed"
//!
//! [tcp]
//! bind_host = "0.0.0.0"
//! general_port = 47810
//! fetch_port = 47811
//!
//! [profile]
//! display_name = "Ann"
//! age = "30"
//! is_male = false
//! interests = "chess,hiking"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use nearby_core::{Profile, SessionConfig, WireFormat};
use nearby_tcp::TcpTransportConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSection,
    pub tcp: TcpTransportConfig,
    pub profile: ProfileConfig,
}

/// Session timeouts and framing, as written in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub connect_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub ack_linger_ms: u64,
    pub read_buffer_size: usize,
    pub max_frame_size: usize,
    pub wire_format: WireFormat,
}

/// The profile this device answers fetch requests with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub display_name: String,
    pub age: String,
    pub is_male: bool,
    pub interests: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            ack_timeout_ms: defaults.ack_timeout.as_millis() as u64,
            ack_linger_ms: defaults.ack_linger.as_millis() as u64,
            read_buffer_size: defaults.read_buffer_size,
            max_frame_size: defaults.max_frame_size,
            wire_format: defaults.wire_format,
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        let profile = Profile::default();
        Self {
            display_name: profile.display_name().to_string(),
            age: profile.age().to_string(),
            is_male: profile.is_male(),
            interests: profile.interests().to_string(),
        }
    }
}

impl SessionSection {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .with_ack_linger(Duration::from_millis(self.ack_linger_ms))
            .with_read_buffer_size(self.read_buffer_size)
            .with_max_frame_size(self.max_frame_size)
            .with_wire_format(self.wire_format)
    }
}

impl ProfileConfig {
    pub fn to_profile(&self) -> Profile {
        Profile::new(
            self.display_name.clone(),
            self.age.clone(),
            self.is_male,
            self.interests.clone(),
        )
    }
}

// ----------------------------------------------------------------------------
// Loading
// ----------------------------------------------------------------------------

impl AppConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.to_session_config().validate()?;
        if self.tcp.bind_host.is_empty() {
            return Err(CliError::Config("tcp.bind_host must not be empty".to_string()));
        }
        Ok(())
    }
}
