//! Rendezvous-store signaling and call orchestration for two-party media
//!
//! This crate establishes a direct real-time media session between exactly
//! two participants using a shared rendezvous store to exchange
//! connection-setup messages. It does not move media itself: capture,
//! encoding and transport live behind the [`media::MediaEngine`] trait, and
//! the store's replication lives behind [`store::RendezvousStore`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  UI / presence collaborator                              │
//! │  ├─ Lobby (roster watch, invitations, tie-break)         │
//! │  │    └─ start_call / accept_incoming                    │
//! │  └─ CallSession (per-call single-worker state machine)   │
//! │      ├─ Signaler (mailbox slots + presence watch)        │
//! │      │    └─ RendezvousStore (shared k/v hierarchy)      │
//! │      └─ MediaEngine (descriptions, candidates, tracks)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Store watches, engine events and user commands all funnel into one
//! worker task per call, so the media engine is never entered concurrently
//! and teardown is idempotent. Peer departure is detected purely through
//! store presence: each peer arms deferred writes that the store applies if
//! the connection drops, so a crashed counterpart still flips observably
//! offline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callsign::{CallConfig, Lobby, MemoryStore, PeerId, SessionContext};
//!
//! # async fn example(factory: Arc<dyn callsign::MediaEngineFactory>) -> callsign::Result<()> {
//! let store = MemoryStore::new();
//! let ctx = SessionContext::new(Arc::new(store.handle()), PeerId::new("alice"));
//!
//! let lobby = Lobby::join(ctx, Some("Alice".to_string())).await?;
//! let session = lobby
//!     .start_call(&PeerId::new("bob"), factory, CallConfig::default())
//!     .await?;
//!
//! let mut status = session.watch_status();
//! while status.changed().await.is_ok() {
//!     println!("call status: {:?}", *status.borrow());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod media;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod store;

// Re-exports for public API
pub use config::{AudioProcessing, CallConfig, CameraFacing, ConnectivityConfig, GatheringPolicy, MediaConfig};
pub use context::{CallId, PeerId, SessionContext};
pub use error::{Error, Result};
pub use media::{EngineEvent, MediaEngine, MediaEngineFactory, TrackId};
pub use presence::{Contact, Lobby, LobbyEvent, PresenceRecord};
pub use session::{CallRole, CallSession, CallStatus};
pub use signaling::{DescriptionKind, IceCandidate, SessionDescription, SignalMessage, Signaler};
pub use store::{
    ChildChange, ChildEvent, ChildWatch, DeferredAction, MemoryStore, MemoryStoreHandle,
    RendezvousStore, StorePath, ValueWatch,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
