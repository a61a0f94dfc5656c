//! Session roster: who else is editing, under which name and color.

use crate::error::{Result, SdkError};
use crate::network::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed palette for remote cursors and roster entries.
pub struct PeerColors;

impl PeerColors {
    pub const COLORS: [&'static str; 12] = [
        "#E91E63", // Pink
        "#9C27B0", // Purple
        "#3F51B5", // Indigo
        "#2196F3", // Blue
        "#00BCD4", // Cyan
        "#009688", // Teal
        "#4CAF50", // Green
        "#8BC34A", // Light Green
        "#CDDC39", // Lime
        "#FF9800", // Orange
        "#FF5722", // Deep Orange
        "#795548", // Brown
    ];

    /// Get a color for a peer based on its id.
    pub fn color_for(peer: &PeerId) -> &'static str {
        let hash: usize = peer.0.bytes().map(|b| b as usize).sum();
        Self::COLORS[hash % Self::COLORS.len()]
    }
}

pub const DEFAULT_NAME: &str = "Anonymous";

/// A roster entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerData {
    pub id: PeerId,
    pub name: String,
    pub color: String,
}

/// Outcome of [`Roster::upsert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RosterChange {
    Joined(PeerData),
    Updated(PeerData),
}

/// Known remote peers of the current session.
#[derive(Debug, Default)]
pub struct Roster {
    peers: BTreeMap<PeerId, PeerData>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer or rename an existing one.
    ///
    /// A missing name keeps the current one, or the default for new peers.
    pub fn upsert(&mut self, id: &PeerId, name: Option<String>) -> RosterChange {
        match self.peers.get_mut(id) {
            Some(peer) => {
                if let Some(name) = name {
                    peer.name = name;
                }
                RosterChange::Updated(peer.clone())
            }
            None => {
                let peer = PeerData {
                    id: id.clone(),
                    name: name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
                    color: PeerColors::color_for(id).to_string(),
                };
                self.peers.insert(id.clone(), peer.clone());
                RosterChange::Joined(peer)
            }
        }
    }

    pub fn remove(&mut self, id: &PeerId) -> Result<PeerData> {
        self.peers
            .remove(id)
            .ok_or_else(|| SdkError::PeerNotFound(id.clone()))
    }

    pub fn get(&self, id: &PeerId) -> Result<&PeerData> {
        self.peers
            .get(id)
            .ok_or_else(|| SdkError::PeerNotFound(id.clone()))
    }

    /// Remove everyone, returning who was present.
    pub fn clear(&mut self) -> Vec<PeerData> {
        std::mem::take(&mut self.peers).into_values().collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerData> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
