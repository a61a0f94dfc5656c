//! Relay transport abstractions for Scribe replication.
//!
//! Replicas never talk to each other directly: each one registers with a
//! relay, receives a [`PeerId`], and opens reliable channels to other
//! registered peers through it. Everything the relay reports comes back as
//! a [`RelayEvent`] on the link's event stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport-level identity assigned by the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network error type.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(PeerId),
    #[error("No open channel to {0}")]
    ChannelClosed(PeerId),
    #[error("Disconnected from relay")]
    Disconnected,
}

/// Notifications delivered on a relay link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// Registration succeeded under `id`.
    Open { id: PeerId },
    /// The relay connection is gone.
    Closed,
    Error(String),
    /// A remote peer opened a channel to us.
    Incoming { peer: PeerId },
    /// A channel to `peer` is ready for data.
    ChannelOpen { peer: PeerId },
    Data { peer: PeerId, bytes: Vec<u8> },
    ChannelClosed { peer: PeerId },
    ChannelError { peer: PeerId, error: String },
}

/// Operations on an open relay registration.
pub trait RelayHandle: Send + Sync {
    /// Open a reliable channel to a registered peer.
    fn connect(&self, peer: &PeerId) -> Result<(), NetworkError>;

    /// Send bytes over an open channel.
    fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), NetworkError>;

    fn close_channel(&self, peer: &PeerId);

    /// Leave the relay, closing every channel.
    fn disconnect(&self);
}

/// A relay registration: the handle plus its event stream.
pub struct RelayLink {
    pub handle: Box<dyn RelayHandle>,
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Abstract relay transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register with the relay, asking for `requested_id` if given.
    ///
    /// The first event on the returned link is [`RelayEvent::Open`].
    async fn open(&self, requested_id: Option<PeerId>) -> Result<RelayLink, NetworkError>;
}

struct Endpoint {
    /// Distinguishes registrations that reuse the same id.
    session: u64,
    events: mpsc::UnboundedSender<RelayEvent>,
    channels: HashSet<PeerId>,
}

struct RelayState {
    online: bool,
    next_session: u64,
    endpoints: HashMap<PeerId, Endpoint>,
}

impl RelayState {
    fn notify(&self, peer: &PeerId, event: RelayEvent) {
        if let Some(endpoint) = self.endpoints.get(peer) {
            let _ = endpoint.events.send(event);
        }
    }

    fn is_current(&self, peer: &PeerId, session: u64) -> bool {
        self.endpoints
            .get(peer)
            .is_some_and(|endpoint| endpoint.session == session)
    }

    /// Remove a registration, telling every counterpart its channel closed.
    fn evict(&mut self, peer: &PeerId) -> bool {
        let Some(endpoint) = self.endpoints.remove(peer) else {
            return false;
        };
        for remote in &endpoint.channels {
            if let Some(other) = self.endpoints.get_mut(remote) {
                other.channels.remove(peer);
                let _ = other.events.send(RelayEvent::ChannelClosed { peer: peer.clone() });
            }
        }
        let _ = endpoint.events.send(RelayEvent::Closed);
        true
    }
}

/// In-memory relay for tests and simulation.
///
/// Cloning yields another handle to the same relay.
#[derive(Clone)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                online: true,
                next_session: 0,
                endpoints: HashMap::new(),
            })),
        }
    }

    /// A transport that registers with this relay.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            relay: self.clone(),
        }
    }

    /// While offline, new registrations fail. Existing ones are untouched.
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Forcibly drop a peer's registration, as if its connection died.
    pub fn drop_peer(&self, peer: &PeerId) -> bool {
        let dropped = self.state.lock().evict(peer);
        debug!(%peer, dropped, "relay dropped peer");
        dropped
    }

    /// Sever a single channel between two peers.
    pub fn sever(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.state.lock();
        let had = state
            .endpoints
            .get_mut(a)
            .is_some_and(|endpoint| endpoint.channels.remove(b));
        if let Some(endpoint) = state.endpoints.get_mut(b) {
            endpoint.channels.remove(a);
        }
        if had {
            state.notify(a, RelayEvent::ChannelClosed { peer: b.clone() });
            state.notify(b, RelayEvent::ChannelClosed { peer: a.clone() });
        }
    }

    /// Registered peer ids.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.state.lock().endpoints.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.state.lock().endpoints.contains_key(peer)
    }

    fn register(&self, requested: Option<PeerId>) -> Result<RelayLink, NetworkError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(NetworkError::RelayUnavailable("relay offline".to_string()));
        }
        let id = match requested {
            Some(id) if state.endpoints.contains_key(&id) => {
                return Err(NetworkError::RelayUnavailable(format!("id {id} is taken")));
            }
            Some(id) => id,
            None => PeerId::new(ulid::Ulid::new().to_string().to_lowercase()),
        };

        state.next_session += 1;
        let session = state.next_session;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RelayEvent::Open { id: id.clone() });
        state.endpoints.insert(
            id.clone(),
            Endpoint {
                session,
                events: tx,
                channels: HashSet::new(),
            },
        );
        debug!(peer = %id, "relay registered peer");

        Ok(RelayLink {
            handle: Box::new(MemoryHandle {
                relay: self.clone(),
                id,
                session,
            }),
            events: rx,
        })
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Transport`] backed by a [`MemoryRelay`].
#[derive(Clone)]
pub struct MemoryTransport {
    relay: MemoryRelay,
}

impl MemoryTransport {
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, requested_id: Option<PeerId>) -> Result<RelayLink, NetworkError> {
        self.relay.register(requested_id)
    }
}

struct MemoryHandle {
    relay: MemoryRelay,
    id: PeerId,
    session: u64,
}

impl RelayHandle for MemoryHandle {
    fn connect(&self, peer: &PeerId) -> Result<(), NetworkError> {
        let mut state = self.relay.state.lock();
        if !state.is_current(&self.id, self.session) {
            return Err(NetworkError::Disconnected);
        }
        if *peer == self.id || !state.endpoints.contains_key(peer) {
            return Err(NetworkError::PeerUnavailable(peer.clone()));
        }

        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.channels.insert(peer.clone());
        }
        if let Some(endpoint) = state.endpoints.get_mut(peer) {
            endpoint.channels.insert(self.id.clone());
        }
        state.notify(peer, RelayEvent::Incoming { peer: self.id.clone() });
        state.notify(peer, RelayEvent::ChannelOpen { peer: self.id.clone() });
        state.notify(&self.id, RelayEvent::ChannelOpen { peer: peer.clone() });
        Ok(())
    }

    fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), NetworkError> {
        let state = self.relay.state.lock();
        if !state.is_current(&self.id, self.session) {
            return Err(NetworkError::Disconnected);
        }
        let open = state
            .endpoints
            .get(&self.id)
            .is_some_and(|endpoint| endpoint.channels.contains(peer));
        let target = state.endpoints.get(peer).filter(|_| open);
        match target {
            Some(endpoint) => endpoint
                .events
                .send(RelayEvent::Data {
                    peer: self.id.clone(),
                    bytes,
                })
                .map_err(|_| NetworkError::ChannelClosed(peer.clone())),
            None => Err(NetworkError::ChannelClosed(peer.clone())),
        }
    }

    fn close_channel(&self, peer: &PeerId) {
        let mut state = self.relay.state.lock();
        if !state.is_current(&self.id, self.session) {
            return;
        }
        let had = state
            .endpoints
            .get_mut(&self.id)
            .is_some_and(|endpoint| endpoint.channels.remove(peer));
        if !had {
            return;
        }
        if let Some(endpoint) = state.endpoints.get_mut(peer) {
            endpoint.channels.remove(&self.id);
        }
        state.notify(peer, RelayEvent::ChannelClosed { peer: self.id.clone() });
        state.notify(&self.id, RelayEvent::ChannelClosed { peer: peer.clone() });
    }

    fn disconnect(&self) {
        let mut state = self.relay.state.lock();
        if state.is_current(&self.id, self.session) {
            state.evict(&self.id);
        }
    }
}
