//! High-level client for the Scribe SDK.

use crate::connection::{ConnectionState, Role};
use crate::error::{Result, SdkError};
use crate::message::CursorKind;
use crate::network::{PeerId, Transport};
use crate::presence::PeerData;
use crate::session::{Command, Replica, ReplicaEvent};
use scribe_core::SiteId;
use scribe_text::{Document, EditDelta, Index};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Which session to take part in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionToken {
    /// Start a new session and host it.
    Host,
    /// Join the session hosted by this peer.
    Join(PeerId),
}

impl SessionToken {
    /// Parse an entry URL: the query string names the host, an empty one
    /// means "become host".
    pub fn from_url(url: &str) -> Self {
        let query = url
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default())
            .unwrap_or_default();
        if query.is_empty() {
            SessionToken::Host
        } else {
            SessionToken::Join(PeerId::new(query))
        }
    }

    pub fn role(&self) -> Role {
        match self {
            SessionToken::Host => Role::Host,
            SessionToken::Join(host) => Role::Follower { host: host.clone() },
        }
    }
}

/// Configuration for a replica.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Name shown to other peers.
    pub display_name: String,
    pub session: SessionToken,
    /// Delay between reconnect attempts (in milliseconds).
    pub reconnect_interval_ms: u64,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the command channel.
    pub command_capacity: usize,
    /// Relay id a host asks for; overridden by a cached session id.
    pub requested_id: Option<PeerId>,
    /// Where a host keeps its document cache.
    pub cache_path: Option<PathBuf>,
    /// Fixed site id instead of a generated one.
    pub site: Option<SiteId>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            display_name: "Anonymous".to_string(),
            session: SessionToken::Host,
            reconnect_interval_ms: 3000,
            event_capacity: 100,
            command_capacity: 64,
            requested_id: None,
            cache_path: None,
            site: None,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.display_name = name.into();
        self
    }

    pub fn host(mut self) -> Self {
        self.config.session = SessionToken::Host;
        self
    }

    pub fn join(mut self, host: PeerId) -> Self {
        self.config.session = SessionToken::Join(host);
        self
    }

    /// Take the session from an entry URL, see [`SessionToken::from_url`].
    pub fn url(mut self, url: &str) -> Self {
        self.config.session = SessionToken::from_url(url);
        self
    }

    pub fn reconnect_interval(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.config.command_capacity = capacity;
        self
    }

    pub fn requested_id(mut self, id: PeerId) -> Self {
        self.config.requested_id = Some(id);
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    pub fn site(mut self, site: SiteId) -> Self {
        self.config.site = Some(site);
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running replica.
///
/// The replica itself runs as a tokio task; the handle sends it commands
/// and subscribes to its events. Handles are cheap to clone.
///
/// # Example
///
/// ```rust
/// use scribe_sdk::{Index, MemoryRelay, ReplicaConfigBuilder, ReplicaHandle};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let relay = MemoryRelay::new();
/// let config = ReplicaConfigBuilder::new().display_name("Ada").build();
/// let host = ReplicaHandle::spawn(relay.transport(), config);
///
/// host.wait_until_live(Duration::from_secs(1)).await.unwrap();
/// host.insert(Index::new(0, 0), "hello").await.unwrap();
/// assert_eq!(host.text().await.unwrap(), "hello");
/// host.shutdown().await;
/// # });
/// ```
#[derive(Clone)]
pub struct ReplicaHandle {
    site: SiteId,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ReplicaEvent>,
}

impl ReplicaHandle {
    /// Start a replica on the current tokio runtime.
    pub fn spawn<T: Transport>(transport: T, config: ReplicaConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let replica = Replica::new(Arc::new(transport), config, event_tx.clone());
        let site = replica.site().clone();
        tokio::spawn(replica.run(command_rx));
        Self {
            site,
            commands: command_tx,
            events: event_tx,
        }
    }

    /// Site id of the replica's characters.
    pub fn site(&self) -> &SiteId {
        &self.site
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    /// Apply an editor delta locally and broadcast it.
    ///
    /// Returns whether every resulting message was handed to the transport.
    pub async fn edit(&self, delta: EditDelta) -> Result<bool> {
        self.request(|reply| Command::Edit { delta, reply }).await?
    }

    pub async fn insert(&self, at: Index, text: &str) -> Result<bool> {
        self.edit(EditDelta::insertion(at, text)).await
    }

    /// Remove `text`, which must start at `at`.
    pub async fn remove(&self, at: Index, text: &str) -> Result<bool> {
        self.edit(EditDelta::removal(at, text)).await
    }

    pub async fn send_cursor(&self, start: Index, end: Index, kind: CursorKind) -> Result<bool> {
        self.request(|reply| Command::Cursor {
            start,
            end,
            kind,
            reply,
        })
        .await
    }

    /// Change the display name and announce it.
    pub async fn set_name(&self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.request(|reply| Command::SetName { name, reply }).await
    }

    pub async fn text(&self) -> Result<String> {
        self.request(|reply| Command::Text { reply }).await
    }

    pub async fn document(&self) -> Result<Document> {
        self.request(|reply| Command::Document { reply }).await
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| Command::State { reply }).await
    }

    pub async fn roster(&self) -> Result<Vec<PeerData>> {
        self.request(|reply| Command::Roster { reply }).await
    }

    /// Relay id of the replica's current registration.
    pub async fn peer_id(&self) -> Result<Option<PeerId>> {
        self.request(|reply| Command::LocalId { reply }).await
    }

    pub async fn host_id(&self) -> Result<PeerId> {
        self.request(|reply| Command::HostId { reply }).await?
    }

    /// Link other peers can use to join this session: `origin?hostId`.
    pub async fn join_link(&self, origin: &str) -> Result<String> {
        let host = self.host_id().await?;
        Ok(format!("{origin}?{host}"))
    }

    /// Write the document cache now.
    pub async fn persist(&self) -> Result<()> {
        self.request(|reply| Command::Persist { reply }).await?
    }

    /// Wait until the replica is live, or fail after `timeout`.
    pub async fn wait_until_live(&self, timeout: Duration) -> Result<()> {
        let mut events = self.subscribe();
        let wait = async {
            loop {
                if self.state().await? == ConnectionState::Live {
                    return Ok::<(), SdkError>(());
                }
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SdkError::Connection("replica stopped".to_string()))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SdkError::Connection("timed out waiting to go live".to_string()))?
    }

    /// Leave the session and stop the replica task.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

fn stopped() -> SdkError {
    SdkError::Connection("replica has shut down".to_string())
}

/// Quick-start helpers for in-memory sessions.
pub mod quick {
    use super::*;
    use crate::network::MemoryRelay;

    /// Relay id the host of a quick session registers under.
    pub const HOST_ID: &str = "session-host";

    /// Spawn a host and one follower per name on a shared relay.
    pub fn spawn_session(
        relay: &MemoryRelay,
        host_name: &str,
        follower_names: &[&str],
        reconnect_interval_ms: u64,
    ) -> (ReplicaHandle, Vec<ReplicaHandle>) {
        let host = ReplicaHandle::spawn(
            relay.transport(),
            ReplicaConfigBuilder::new()
                .display_name(host_name)
                .requested_id(PeerId::new(HOST_ID))
                .reconnect_interval(reconnect_interval_ms)
                .build(),
        );
        let followers = follower_names
            .iter()
            .map(|name| spawn_follower(relay, name, reconnect_interval_ms))
            .collect();
        (host, followers)
    }

    /// Spawn one more follower of the quick session.
    pub fn spawn_follower(relay: &MemoryRelay, name: &str, reconnect_interval_ms: u64) -> ReplicaHandle {
        ReplicaHandle::spawn(
            relay.transport(),
            ReplicaConfigBuilder::new()
                .display_name(name)
                .join(PeerId::new(HOST_ID))
                .reconnect_interval(reconnect_interval_ms)
                .build(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ReplicaConfig::default();
        assert_eq!(config.display_name, "Anonymous");
        assert_eq!(config.session, SessionToken::Host);
        assert_eq!(config.reconnect_interval_ms, 3000);
        assert!(config.cache_path.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ReplicaConfigBuilder::new()
            .display_name("Ada")
            .join(PeerId::new("h"))
            .reconnect_interval(50)
            .event_capacity(8)
            .cache_path("/tmp/doc.json")
            .build();
        assert_eq!(config.display_name, "Ada");
        assert_eq!(config.session, SessionToken::Join(PeerId::new("h")));
        assert_eq!(config.reconnect_interval_ms, 50);
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/doc.json")));
    }

    #[test]
    fn test_session_token_from_url() {
        assert_eq!(SessionToken::from_url("https://scribe.example/"), SessionToken::Host);
        assert_eq!(SessionToken::from_url("https://scribe.example/?"), SessionToken::Host);
        assert_eq!(
            SessionToken::from_url("https://scribe.example/?abc123"),
            SessionToken::Join(PeerId::new("abc123"))
        );
        assert_eq!(
            SessionToken::from_url("https://scribe.example/?abc123#top"),
            SessionToken::Join(PeerId::new("abc123"))
        );
        assert_eq!(
            SessionToken::Join(PeerId::new("x")).role(),
            Role::Follower { host: PeerId::new("x") }
        );
    }
}
