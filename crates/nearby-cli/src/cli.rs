//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Listen for nearby peers and answer fetch requests until interrupted
    Listen,
    /// Fetch the profile of a listening peer and exit
    Fetch {
        /// Peer address: `host` or `host:general_port:fetch_port`
        peer: String,
    },
    /// Run a presence handshake with a listening peer and exit
    Ping {
        /// Peer address: `host` or `host:general_port:fetch_port`
        peer: String,
    },
    /// Print the effective configuration
    Config,
}
