//! Connection state of a replica and its reconnect timer.

use crate::error::{Result, SdkError};
use crate::network::PeerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    ConnectingToRelay,
    ConnectedToRelay,
    ConnectingToHost,
    Live,
    Reconnecting,
}

/// Whether this replica hosts the session or follows a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Host,
    Follower { host: PeerId },
}

/// Relay and host connectivity of one replica.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    local_id: Option<PeerId>,
    relay: bool,
    host: bool,
    state: ConnectionState,
}

impl Connection {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            local_id: None,
            relay: false,
            host: false,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// The host's peer id, known up front for followers and after
    /// registration for the host itself.
    pub fn host_id(&self) -> Result<PeerId> {
        match &self.role {
            Role::Follower { host } => Ok(host.clone()),
            Role::Host => self
                .local_id
                .clone()
                .ok_or_else(|| SdkError::Connection("host has no relay id yet".to_string())),
        }
    }

    /// Peer id assigned by the relay for the current or last registration.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn relay_connected(&self) -> bool {
        self.relay
    }

    pub fn host_connected(&self) -> bool {
        self.host
    }

    pub fn is_live(&self) -> bool {
        self.relay && self.host
    }

    /// Move to `next`, returning it if the state actually changed.
    pub fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }

    /// Registration succeeded. A host is its own host.
    pub fn relay_opened(&mut self, id: PeerId) {
        self.local_id = Some(id);
        self.relay = true;
        if self.is_host() {
            self.host = true;
        }
    }

    /// The host's snapshot has been installed.
    pub fn host_reached(&mut self) {
        self.host = true;
    }

    /// Losing the relay loses every channel, the host's included.
    pub fn relay_lost(&mut self) {
        self.relay = false;
        self.host = false;
    }

    pub fn host_lost(&mut self) {
        if !self.is_host() {
            self.host = false;
        }
    }
}

/// Periodic retry driver, active only while the replica is not live.
///
/// The first tick fires immediately after [`start`](Self::start).
#[derive(Debug)]
pub struct ReconnectTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl ReconnectTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start ticking. A running timer is left as is.
    pub fn start(&mut self) {
        if self.interval.is_none() {
            let mut interval = time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.interval = Some(interval);
        }
    }

    pub fn cancel(&mut self) {
        self.interval = None;
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick; pends forever while cancelled.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_live_on_registration() {
        let mut conn = Connection::new(Role::Host);
        assert!(conn.host_id().is_err());
        conn.relay_opened(PeerId::new("h"));
        assert!(conn.is_live());
        assert_eq!(conn.host_id().unwrap(), PeerId::new("h"));

        // A host never loses itself, only the relay.
        conn.host_lost();
        assert!(conn.is_live());
        conn.relay_lost();
        assert!(!conn.is_live());
        assert_eq!(conn.local_id(), Some(&PeerId::new("h")));
    }

    #[test]
    fn test_follower_needs_host() {
        let host = PeerId::new("h");
        let mut conn = Connection::new(Role::Follower { host: host.clone() });
        assert_eq!(conn.host_id().unwrap(), host);
        conn.relay_opened(PeerId::new("f"));
        assert!(!conn.is_live());
        conn.host_reached();
        assert!(conn.is_live());

        conn.host_lost();
        assert!(!conn.is_live());
        assert!(conn.relay_connected());
    }

    #[test]
    fn test_relay_loss_clears_host() {
        let mut conn = Connection::new(Role::Follower { host: PeerId::new("h") });
        conn.relay_opened(PeerId::new("f"));
        conn.host_reached();
        conn.relay_lost();
        conn.relay_opened(PeerId::new("f2"));
        assert!(!conn.is_live());
        assert!(!conn.host_connected());
    }

    #[test]
    fn test_transition_reports_changes_only() {
        let mut conn = Connection::new(Role::Host);
        assert_eq!(conn.transition(ConnectionState::Disconnected), None);
        assert_eq!(
            conn.transition(ConnectionState::Reconnecting),
            Some(ConnectionState::Reconnecting)
        );
    }

    #[tokio::test]
    async fn test_timer_first_tick_immediate() {
        let mut timer = ReconnectTimer::new(Duration::from_secs(3600));
        assert!(!timer.is_active());
        timer.start();
        tokio::time::timeout(Duration::from_secs(1), timer.tick())
            .await
            .expect("first tick is immediate");
        timer.cancel();
        assert!(!timer.is_active());
        assert!(tokio::time::timeout(Duration::from_millis(20), timer.tick())
            .await
            .is_err());
    }
}
