//! The replica task: one participant of a collaborative session.
//!
//! A [`Replica`] owns its text CRDT, roster and connection exclusively and
//! handles one command or relay event at a time. Sessions use a star
//! topology: followers keep a single channel to the host, and the host
//! applies every message it receives before relaying it to the others.

use crate::client::ReplicaConfig;
use crate::connection::{Connection, ConnectionState, ReconnectTimer};
use crate::error::{Result, SdkError};
use crate::message::{CursorKind, Message, Payload};
use crate::network::{NetworkError, PeerId, RelayEvent, RelayHandle, Transport};
use crate::persist::DocumentCache;
use crate::presence::{PeerData, Roster, RosterChange};
use scribe_core::SiteId;
use scribe_text::{Document, EditAction, EditDelta, Index, SequenceCrdt, TextChange};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Events emitted by a replica.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplicaEvent {
    StateChanged(ConnectionState),
    /// A remote edit changed the document.
    Text(TextChange),
    /// The document was replaced by the host's snapshot.
    SnapshotInstalled { text: String },
    PeerJoined(PeerData),
    PeerUpdated(PeerData),
    /// A peer left; its cursor should be removed.
    PeerLeft(PeerId),
    CursorMoved {
        peer: PeerId,
        start: Index,
        end: Index,
        kind: CursorKind,
    },
}

pub(crate) enum Command {
    Edit {
        delta: EditDelta,
        reply: oneshot::Sender<Result<bool>>,
    },
    Cursor {
        start: Index,
        end: Index,
        kind: CursorKind,
        reply: oneshot::Sender<bool>,
    },
    SetName {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Text {
        reply: oneshot::Sender<String>,
    },
    Document {
        reply: oneshot::Sender<Document>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Roster {
        reply: oneshot::Sender<Vec<PeerData>>,
    },
    LocalId {
        reply: oneshot::Sender<Option<PeerId>>,
    },
    HostId {
        reply: oneshot::Sender<Result<PeerId>>,
    },
    Persist {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Replica<T: Transport> {
    config: ReplicaConfig,
    transport: Arc<T>,
    crdt: SequenceCrdt,
    roster: Roster,
    connection: Connection,
    /// Relay id a host asks for before its first registration.
    requested_id: Option<PeerId>,
    link: Option<Box<dyn RelayHandle>>,
    relay_events: Option<mpsc::UnboundedReceiver<RelayEvent>>,
    /// Peers with an open channel.
    channels: BTreeSet<PeerId>,
    reconnect: ReconnectTimer,
    events: broadcast::Sender<ReplicaEvent>,
}

impl<T: Transport> Replica<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        config: ReplicaConfig,
        events: broadcast::Sender<ReplicaEvent>,
    ) -> Self {
        let site = config.site.clone().unwrap_or_else(SiteId::generate);
        let mut crdt = SequenceCrdt::new(site);
        let connection = Connection::new(config.session.role());
        let mut requested_id = None;

        if connection.is_host() {
            requested_id = config.requested_id.clone();
            if let Some(path) = &config.cache_path {
                match DocumentCache::load(path) {
                    Ok(Some(cache)) => {
                        info!(path = %path.display(), "restored document cache");
                        crdt.install_snapshot(cache.document, None);
                        if cache.session_id.is_some() {
                            requested_id = cache.session_id;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => warn!(%error, "ignoring unreadable document cache"),
                }
            }
        }

        let period = Duration::from_millis(config.reconnect_interval_ms.max(1));
        Self {
            config,
            transport,
            crdt,
            roster: Roster::new(),
            connection,
            requested_id,
            link: None,
            relay_events: None,
            channels: BTreeSet::new(),
            reconnect: ReconnectTimer::new(period),
            events,
        }
    }

    pub(crate) fn site(&self) -> &SiteId {
        self.crdt.site()
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(site = %self.site(), role = ?self.connection.role(), "replica started");
        self.connect_to_network().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                event = next_event(&mut self.relay_events) => self.handle_relay_event(event),
                _ = self.reconnect.tick() => self.retry().await,
            }
        }
        info!(site = %self.site(), "replica stopped");
    }

    /// Returns false once the replica should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Edit { delta, reply } => {
                let _ = reply.send(self.local_edit(&delta));
            }
            Command::Cursor {
                start,
                end,
                kind,
                reply,
            } => {
                let sent = self.broadcast(Payload::Cursor {
                    start,
                    end,
                    cursor_kind: kind,
                });
                let _ = reply.send(sent);
            }
            Command::SetName { name, reply } => {
                self.config.display_name = name.clone();
                let _ = reply.send(self.broadcast(Payload::Update { name: Some(name) }));
            }
            Command::Text { reply } => {
                let _ = reply.send(self.crdt.text());
            }
            Command::Document { reply } => {
                let _ = reply.send(self.crdt.document().clone());
            }
            Command::State { reply } => {
                let _ = reply.send(self.connection.state());
            }
            Command::Roster { reply } => {
                let _ = reply.send(self.roster.peers().cloned().collect());
            }
            Command::LocalId { reply } => {
                let _ = reply.send(self.connection.local_id().cloned());
            }
            Command::HostId { reply } => {
                let _ = reply.send(self.connection.host_id());
            }
            Command::Persist { reply } => {
                let _ = reply.send(self.persist());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn local_edit(&mut self, delta: &EditDelta) -> Result<bool> {
        if !self.connection.is_live() {
            return Err(SdkError::Connection(format!(
                "editing is disabled while {:?}",
                self.connection.state()
            )));
        }
        let chars = self.crdt.apply_local(delta)?;
        let mut delivered = true;
        for ch in chars {
            let payload = match delta.action {
                EditAction::Insert => Payload::Insert { ch },
                EditAction::Remove => Payload::Delete { ch },
            };
            delivered &= self.broadcast(payload);
        }
        Ok(delivered)
    }

    fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Open { id } => self.on_relay_open(id),
            RelayEvent::Closed => {
                warn!(site = %self.site(), "relay connection closed");
                self.connection.relay_lost();
                self.handle_disconnect();
                self.link = None;
                self.relay_events = None;
            }
            RelayEvent::Error(error) => {
                warn!(%error, "relay error");
                if let Some(link) = &self.link {
                    link.disconnect();
                }
            }
            RelayEvent::Incoming { peer } => {
                if self.connection.is_host() {
                    debug!(%peer, "incoming channel");
                } else {
                    warn!(%peer, "refusing incoming channel, not the session host");
                    if let Some(link) = &self.link {
                        link.close_channel(&peer);
                    }
                }
            }
            RelayEvent::ChannelOpen { peer } => self.on_channel_open(peer),
            RelayEvent::Data { peer, bytes } => self.on_data(peer, bytes),
            RelayEvent::ChannelClosed { peer } => self.on_channel_closed(peer),
            RelayEvent::ChannelError { peer, error } => {
                warn!(%peer, %error, "channel error");
                if let Some(link) = &self.link {
                    link.close_channel(&peer);
                }
                self.on_channel_closed(peer);
            }
        }
    }

    fn on_relay_open(&mut self, id: PeerId) {
        info!(peer = %id, "registered with relay");
        self.connection.relay_opened(id);
        if self.connection.is_live() {
            self.went_live();
        } else {
            self.set_state(ConnectionState::ConnectedToRelay);
            self.connect_to_host();
        }
    }

    fn on_channel_open(&mut self, peer: PeerId) {
        if self.connection.is_host() {
            info!(%peer, "follower connected");
            self.channels.insert(peer.clone());
            self.welcome(&peer);
        } else if self.is_host_peer(&peer) {
            // Not live until the host's snapshot is installed.
            info!(host = %peer, "connected to host, awaiting snapshot");
            self.channels.insert(peer);
        } else {
            debug!(%peer, "ignoring channel from a peer other than the host");
        }
    }

    fn on_channel_closed(&mut self, peer: PeerId) {
        self.channels.remove(&peer);
        if self.connection.is_host() {
            if let Ok(gone) = self.roster.remove(&peer) {
                info!(peer = %gone.id, name = %gone.name, "follower disconnected");
                self.emit(ReplicaEvent::PeerLeft(gone.id.clone()));
                let leave = Message::new(gone.id, Payload::Leave);
                let targets: Vec<PeerId> = self.channels.iter().cloned().collect();
                if let Err(error) = self.send_all(&targets, &leave) {
                    debug!(%error, "could not forward leave");
                }
            }
        } else if self.is_host_peer(&peer) {
            warn!(host = %peer, "lost connection to host");
            self.connection.host_lost();
            self.handle_disconnect();
        }
    }

    /// Bring a new follower up to date: snapshot, host, then everyone else.
    fn welcome(&mut self, peer: &PeerId) {
        let Some(me) = self.connection.local_id().cloned() else {
            return;
        };
        let (document, versions) = self.crdt.snapshot();
        let name = Some(self.config.display_name.clone());
        let mut messages = vec![
            Message::new(
                me.clone(),
                Payload::Sync {
                    document,
                    versions: Some(versions),
                    name: name.clone(),
                },
            ),
            Message::new(me, Payload::Join { name }),
        ];
        messages.extend(self.roster.peers().filter(|p| p.id != *peer).map(|p| {
            Message::new(
                p.id.clone(),
                Payload::Join {
                    name: Some(p.name.clone()),
                },
            )
        }));

        for message in &messages {
            if let Err(error) = self.send_all(std::slice::from_ref(peer), message) {
                warn!(%peer, %error, "could not welcome follower");
                break;
            }
        }
    }

    fn on_data(&mut self, peer: PeerId, bytes: Vec<u8>) {
        let message = match Message::decode(&bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(%peer, %error, "dropping malformed message");
                return;
            }
        };
        debug!(%peer, source = %message.source_id, kind = message.kind(), "received message");

        // Snapshots are addressed to one follower and never fan out.
        let fan_out = !matches!(message.payload, Payload::Sync { .. });
        let relay_to: Vec<PeerId> = if self.connection.is_host() && fan_out {
            self.channels
                .iter()
                .filter(|p| **p != message.source_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        self.process(message);

        if let Some(link) = &self.link {
            for target in &relay_to {
                if let Err(error) = link.send(target, bytes.clone()) {
                    debug!(peer = %target, %error, "could not relay message");
                }
            }
        }
    }

    fn process(&mut self, message: Message) {
        let Message { source_id, payload } = message;
        match payload {
            Payload::Insert { ch } => match self.crdt.remote_insert(ch) {
                Ok(changes) => self.emit_changes(changes),
                Err(error) => warn!(source = %source_id, %error, "rejected remote insert"),
            },
            Payload::Delete { ch } => {
                let changes = self.crdt.remote_delete(ch);
                self.emit_changes(changes);
            }
            Payload::Sync {
                document,
                versions,
                name,
            } => {
                if self.connection.is_host() {
                    warn!(source = %source_id, "ignoring snapshot sent to the host");
                    return;
                }
                if !self.is_host_peer(&source_id) {
                    warn!(source = %source_id, "ignoring snapshot from a peer other than the host");
                    return;
                }
                self.crdt.install_snapshot(document, versions);
                info!(source = %source_id, chars = self.crdt.len(), "installed session snapshot");
                self.emit(ReplicaEvent::SnapshotInstalled {
                    text: self.crdt.text(),
                });
                self.connection.host_reached();
                if self.connection.is_live() {
                    self.went_live();
                }
                self.upsert_peer(&source_id, name);
                let name = Some(self.config.display_name.clone());
                self.broadcast(Payload::Join { name });
            }
            Payload::Join { name } | Payload::Update { name } => self.upsert_peer(&source_id, name),
            Payload::Leave => match self.roster.remove(&source_id) {
                Ok(peer) => {
                    info!(peer = %peer.id, name = %peer.name, "peer left");
                    self.emit(ReplicaEvent::PeerLeft(peer.id));
                }
                Err(error) => debug!(%error, "leave from a peer not in the roster"),
            },
            Payload::Cursor {
                start,
                end,
                cursor_kind,
            } => self.emit(ReplicaEvent::CursorMoved {
                peer: source_id,
                start,
                end,
                kind: cursor_kind,
            }),
        }
    }

    fn upsert_peer(&mut self, peer: &PeerId, name: Option<String>) {
        if self.connection.local_id() == Some(peer) {
            return;
        }
        match self.roster.upsert(peer, name) {
            RosterChange::Joined(data) => {
                info!(peer = %data.id, name = %data.name, "peer joined");
                self.emit(ReplicaEvent::PeerJoined(data));
            }
            RosterChange::Updated(data) => self.emit(ReplicaEvent::PeerUpdated(data)),
        }
    }

    async fn connect_to_network(&mut self) {
        self.set_state(ConnectionState::ConnectingToRelay);
        let requested = if self.connection.is_host() {
            self.connection
                .local_id()
                .cloned()
                .or_else(|| self.requested_id.clone())
        } else {
            None
        };
        match self.transport.open(requested).await {
            Ok(link) => {
                self.link = Some(link.handle);
                self.relay_events = Some(link.events);
            }
            Err(error) => {
                warn!(%error, "could not reach relay");
                self.set_state(ConnectionState::Reconnecting);
                self.reconnect.start();
            }
        }
    }

    fn connect_to_host(&mut self) {
        let Ok(host) = self.connection.host_id() else {
            return;
        };
        self.set_state(ConnectionState::ConnectingToHost);
        let result = match &self.link {
            Some(link) => link.connect(&host),
            None => Err(NetworkError::Disconnected),
        };
        if let Err(error) = result {
            warn!(%host, %error, "could not reach host");
            self.handle_disconnect();
        }
    }

    /// Tear down the session view and schedule reconnection.
    fn handle_disconnect(&mut self) {
        if self.connection.is_live() {
            return;
        }
        if !self.connection.is_host() {
            if let (Ok(host), Some(me)) = (self.connection.host_id(), self.connection.local_id()) {
                if self.channels.contains(&host) {
                    let leave = Message::new(me.clone(), Payload::Leave);
                    let _ = self.send_all(&[host], &leave);
                }
            }
            self.connection.host_lost();
        }
        if let Some(link) = &self.link {
            for peer in &self.channels {
                link.close_channel(peer);
            }
        }
        self.channels.clear();
        for peer in self.roster.clear() {
            self.emit(ReplicaEvent::PeerLeft(peer.id));
        }
        self.set_state(ConnectionState::Reconnecting);
        self.reconnect.start();
    }

    async fn retry(&mut self) {
        if self.connection.is_live() {
            self.reconnect.cancel();
            return;
        }
        if self.link.is_some() {
            // A registration is open or pending; only the host is missing.
            let awaiting_snapshot = self
                .connection
                .host_id()
                .is_ok_and(|host| self.channels.contains(&host));
            if self.connection.relay_connected() && !awaiting_snapshot {
                debug!(site = %self.site(), "retrying host");
                self.connect_to_host();
            }
            return;
        }
        info!(site = %self.site(), "reconnecting to relay");
        self.connect_to_network().await;
    }

    fn went_live(&mut self) {
        self.reconnect.cancel();
        self.set_state(ConnectionState::Live);
    }

    fn shutdown(&mut self) {
        if let Err(error) = self.persist() {
            warn!(%error, "could not save document cache");
        }
        if self.connection.is_live() && !self.connection.is_host() {
            let _ = self.try_broadcast(Payload::Leave);
        }
        self.reconnect.cancel();
        if let Some(link) = self.link.take() {
            for peer in &self.channels {
                link.close_channel(peer);
            }
            link.disconnect();
        }
        self.channels.clear();
        self.relay_events = None;
        self.connection.relay_lost();
        self.set_state(ConnectionState::Disconnected);
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self
            .config
            .cache_path
            .as_ref()
            .filter(|_| self.connection.is_host())
        else {
            return Ok(());
        };
        let cache = DocumentCache {
            session_id: self
                .connection
                .local_id()
                .cloned()
                .or_else(|| self.requested_id.clone()),
            name: self.config.display_name.clone(),
            document: self.crdt.document().clone(),
        };
        cache.save(path)?;
        debug!(path = %path.display(), "saved document cache");
        Ok(())
    }

    /// Send to the session, converting failures to `false`.
    fn broadcast(&self, payload: Payload) -> bool {
        match self.try_broadcast(payload) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "broadcast failed");
                false
            }
        }
    }

    fn try_broadcast(&self, payload: Payload) -> Result<()> {
        if !self.connection.is_live() {
            return Err(SdkError::Connection("not connected to the session".to_string()));
        }
        let source = self
            .connection
            .local_id()
            .cloned()
            .ok_or_else(|| SdkError::Connection("no relay id".to_string()))?;
        let targets: Vec<PeerId> = if self.connection.is_host() {
            self.channels.iter().cloned().collect()
        } else {
            vec![self.connection.host_id()?]
        };
        self.send_all(&targets, &Message::new(source, payload))
    }

    fn send_all(&self, targets: &[PeerId], message: &Message) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| SdkError::Connection("no relay link".to_string()))?;
        let bytes = message
            .encode()
            .map_err(|e| SdkError::Connection(format!("could not encode {}: {e}", message.kind())))?;

        let mut failed = 0;
        for peer in targets {
            if let Err(error) = link.send(peer, bytes.clone()) {
                debug!(%peer, %error, kind = message.kind(), "send failed");
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(SdkError::Connection(format!(
                "{failed} of {} sends failed",
                targets.len()
            )))
        }
    }

    fn is_host_peer(&self, peer: &PeerId) -> bool {
        !self.connection.is_host() && self.connection.host_id().is_ok_and(|host| host == *peer)
    }

    fn set_state(&mut self, next: ConnectionState) {
        if let Some(state) = self.connection.transition(next) {
            debug!(site = %self.site(), ?state, "connection state changed");
            self.emit(ReplicaEvent::StateChanged(state));
        }
    }

    fn emit_changes(&self, changes: Vec<TextChange>) {
        for change in changes {
            self.emit(ReplicaEvent::Text(change));
        }
    }

    fn emit(&self, event: ReplicaEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<RelayEvent>>) -> RelayEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or(RelayEvent::Closed),
        None => std::future::pending().await,
    }
}
