//! Nearby CLI library
//!
//! Command-line front end for the nearby session stack over TCP: listen for
//! peers, fetch a peer's profile, or run a presence handshake.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::NearbyApp;
pub use cli::{Cli, Commands};
pub use config::{AppConfig, ProfileConfig, SessionSection};
pub use error::{CliError, Result};
