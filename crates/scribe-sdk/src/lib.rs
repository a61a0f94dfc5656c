//! Scribe SDK - Host-relayed replication for collaborative text documents
//!
//! Every participant runs a replica of the same [`scribe_text`] document.
//! One replica hosts the session; the others follow it through a relay and
//! exchange character operations, roster updates and cursor positions.
//!
//! # Quick Start
//!
//! ```rust
//! use scribe_sdk::{Index, MemoryRelay, ReplicaConfigBuilder, ReplicaHandle};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let relay = MemoryRelay::new();
//!
//! // Host a new session
//! let host = ReplicaHandle::spawn(
//!     relay.transport(),
//!     ReplicaConfigBuilder::new().display_name("Alice").build(),
//! );
//! host.wait_until_live(Duration::from_secs(1)).await.unwrap();
//!
//! // Join it through the host's link
//! let link = host.join_link("https://scribe.example/").await.unwrap();
//! let guest = ReplicaHandle::spawn(
//!     relay.transport(),
//!     ReplicaConfigBuilder::new().display_name("Bob").url(&link).build(),
//! );
//! guest.wait_until_live(Duration::from_secs(1)).await.unwrap();
//!
//! guest.insert(Index::new(0, 0), "hello").await.unwrap();
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`client`] - Replica handles and configuration
//! - [`session`] - The replica task and its events
//! - [`connection`] - Connection state machine and reconnect timer
//! - [`message`] - Wire messages
//! - [`network`] - Relay transport abstractions
//! - [`presence`] - Session roster and peer colors
//! - [`persist`] - Host document cache
//! - [`error`] - Error types

pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod network;
pub mod persist;
pub mod presence;
pub mod session;

// Re-exports for convenience
pub use client::{quick, ReplicaConfig, ReplicaConfigBuilder, ReplicaHandle, SessionToken};
pub use connection::{ConnectionState, Role};
pub use error::{Result, SdkError};
pub use message::{CursorKind, Message, Payload};
pub use network::{
    MemoryRelay, MemoryTransport, NetworkError, PeerId, RelayEvent, RelayHandle, RelayLink,
    Transport,
};
pub use persist::{CacheError, DocumentCache};
pub use presence::{PeerColors, PeerData, Roster};
pub use session::ReplicaEvent;

// Re-export the editor-facing types from scribe-text
pub use scribe_text::{Document, EditDelta, Index, TextChange};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{ReplicaConfig, ReplicaConfigBuilder, ReplicaHandle};
    pub use crate::connection::ConnectionState;
    pub use crate::error::SdkError;
    pub use crate::message::CursorKind;
    pub use crate::network::{MemoryRelay, PeerId, Transport};
    pub use crate::session::ReplicaEvent;
    pub use scribe_text::{EditDelta, Index, TextChange};
}
