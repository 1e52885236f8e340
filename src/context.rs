//! Session context: the per-process identity and store handle
//!
//! Every component takes a [`SessionContext`] at construction instead of
//! reading ambient state. One is produced per process after the user is
//! authenticated and the store connection is established, then threaded
//! through the lobby, signalers and call sessions.

use std::fmt;
use std::sync::Arc;

use crate::store::RendezvousStore;

/// Opaque identifier of an authenticated participant
///
/// Issued by an external identity layer; stable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a raw peer identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of one signaling channel
///
/// Both participants must agree on it out-of-band: the caller uses its own
/// peer id, the callee uses the id delivered by the invitation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    /// Wrap a raw call identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&PeerId> for CallId {
    fn from(peer: &PeerId) -> Self {
        Self(peer.as_str().to_string())
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Shared context handed to every component at construction
///
/// Carries the rendezvous store connection and the local peer identity.
/// Cloning is cheap; all clones refer to the same store connection.
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn RendezvousStore>,
    local_peer: PeerId,
}

impl SessionContext {
    /// Create a context from a live store connection and the local identity
    pub fn new(store: Arc<dyn RendezvousStore>, local_peer: PeerId) -> Self {
        Self { store, local_peer }
    }

    /// The rendezvous store connection
    pub fn store(&self) -> &Arc<dyn RendezvousStore> {
        &self.store
    }

    /// The local peer identity
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("local_peer", &self.local_peer)
            .finish_non_exhaustive()
    }
}
