//! The nearby application: one session manager over the TCP transport

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use nearby_core::{
    event_channel, AppEvent, AppEventReceiver, PeerHandle, Profile, Purpose, ServiceConfig,
    SessionState, StaticProfileStore,
};
use nearby_runtime::SessionManager;
use nearby_tcp::{PeerAddress, TcpTransport, TCP_SERVICE_TYPE};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Slack added to the session timeouts when waiting on a one-shot command
const COMMAND_GRACE: Duration = Duration::from_secs(2);

pub struct NearbyApp {
    config: AppConfig,
    transport: Arc<TcpTransport>,
    manager: SessionManager,
    events: AppEventReceiver,
    json: bool,
}

impl NearbyApp {
    pub fn new(config: AppConfig, json: bool) -> Result<Self> {
        let services = ServiceConfig::default();
        let transport = Arc::new(TcpTransport::new(config.tcp.clone(), services.clone()));
        let (events_tx, events) = event_channel();

        let manager = SessionManager::builder(
            transport.clone(),
            Arc::new(events_tx),
            Arc::new(StaticProfileStore::new(config.profile.to_profile())),
        )
        .session_config(config.session.to_session_config())
        .service_config(services)
        .build()?;

        Ok(Self {
            config,
            transport,
            manager,
            events,
            json,
        })
    }

    /// Run one command to completion
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Listen => self.listen().await,
            Commands::Fetch { peer } => {
                let profile = self.fetch(&peer).await?;
                self.print_profile(&profile)
            }
            Commands::Ping { peer } => {
                let found = self.ping(&peer).await?;
                self.print_event(&AppEvent::PeerDiscovered(found))
            }
            Commands::Config => self.print_config(),
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Listen and print events until ctrl-c
    pub async fn listen(&mut self) -> Result<()> {
        self.manager.start().await?;
        for (purpose, service) in self.manager.services().all() {
            if let Some(addr) = self.transport.local_addr(service) {
                info!("{:?} service {} on {}", purpose, service, addr);
            }
        }

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Interrupted, stopping");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.print_event(&event)?,
                    None => break,
                },
            }
        }

        self.manager.stop().await;
        Ok(())
    }

    /// Fetch one profile from `peer`
    pub async fn fetch(&mut self, peer: &str) -> Result<Profile> {
        let peer = self.peer_handle(peer)?;
        let wait = self.command_wait();
        let deadline = Instant::now() + wait;
        self.manager.fetch(peer).await;

        let mut received = None;
        let result = loop {
            let event = match self.next_event(deadline, wait).await {
                Ok(event) => event,
                Err(e) => break Err(e),
            };
            debug!("Fetch event: {:?}", event);
            match event {
                AppEvent::ProfileReceived(profile) => received = Some(profile),
                AppEvent::ToastMessage(message) => break Err(CliError::PeerFailed(message)),
                AppEvent::StateChanged(SessionState::FetchingCompleted) => {
                    break received.take().ok_or_else(|| {
                        CliError::PeerFailed("fetch completed without a profile".to_string())
                    });
                }
                _ => {}
            }
        };

        self.manager.stop().await;
        result
    }

    /// Presence handshake with `peer`
    pub async fn ping(&mut self, peer: &str) -> Result<PeerHandle> {
        let peer = self.peer_handle(peer)?;
        let wait = self.command_wait();
        let deadline = Instant::now() + wait;
        self.manager.connect(peer, Purpose::General).await;

        let result = loop {
            let event = match self.next_event(deadline, wait).await {
                Ok(event) => event,
                Err(e) => break Err(e),
            };
            match event {
                AppEvent::PeerDiscovered(found) => break Ok(found),
                AppEvent::ToastMessage(message) => break Err(CliError::PeerFailed(message)),
                _ => {}
            }
        };

        self.manager.stop().await;
        result
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn peer_handle(&self, peer: &str) -> Result<PeerHandle> {
        PeerAddress::parse(peer, &self.config.tcp)
            .map_err(|e| CliError::InvalidPeer(e.to_string()))?;
        Ok(PeerHandle::new(peer, TCP_SERVICE_TYPE))
    }

    fn command_wait(&self) -> Duration {
        let session = self.manager.config();
        session.connect_timeout + session.ack_timeout + COMMAND_GRACE
    }

    async fn next_event(&mut self, deadline: Instant, wait: Duration) -> Result<AppEvent> {
        match timeout_at(deadline, self.events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(CliError::PeerFailed("event stream closed".to_string())),
            Err(_) => Err(CliError::Timeout(wait)),
        }
    }

    fn print_event(&self, event: &AppEvent) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }
        match event {
            AppEvent::StateChanged(state) => println!("state: {}", state),
            AppEvent::PeerDiscovered(peer) => println!("peer: {}", peer),
            AppEvent::ProfileReceived(profile) => println!("profile: {}", describe(profile)),
            AppEvent::ToastMessage(message) => println!("! {}", message),
        }
        Ok(())
    }

    fn print_profile(&self, profile: &Profile) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(profile)?);
        } else {
            println!("{}", describe(profile));
        }
        Ok(())
    }

    fn print_config(&self) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&self.config)?);
        } else {
            print!("{}", self.config.to_toml()?);
        }
        Ok(())
    }
}

fn describe(profile: &Profile) -> String {
    format!(
        "{} ({}, {}) likes {}",
        profile.display_name(),
        profile.age(),
        if profile.is_male() { "male" } else { "female" },
        if profile.interests().is_empty() {
            "nothing listed"
        } else {
            profile.interests()
        }
    )
}
