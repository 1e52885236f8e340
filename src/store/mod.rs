//! Rendezvous store abstraction
//!
//! The rendezvous store is a shared, remotely-replicated key/value hierarchy
//! that carries signaling traffic between peers that have no direct
//! connection yet. This module defines the narrow contract the rest of the
//! crate consumes ([`RendezvousStore`]), the watch streams it hands out, and
//! an in-process implementation ([`MemoryStore`]) used by tests and local
//! demos.
//!
//! Contract notes:
//!
//! - Writes and removes are fire-and-forget from the caller's perspective;
//!   the store retries internally across reconnects.
//! - No ordering is guaranteed across different paths. Within one watched
//!   path, updates arrive in the order the store applied them.
//! - A value watch delivers the current value (or absence) immediately on
//!   registration; a child watch replays existing children as `Added`.
//!   The signaling init handshake depends on both replay rules.
//! - Deferred actions run when the store notices the connection dropped,
//!   without any cooperation from the (possibly crashed) peer. They are not
//!   guaranteed armed until the store considers the connection live.

mod memory;
pub mod paths;

pub use memory::{MemoryStore, MemoryStoreHandle};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::Result;

/// A slash-separated path into the store hierarchy
///
/// Never empty, no leading or trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// Build a path from a raw string, normalizing stray slashes
    pub fn new(path: impl Into<String>) -> Self {
        let raw = path.into();
        let trimmed: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        Self(trimmed.join("/"))
    }

    /// Append one segment
    pub fn child(&self, segment: &str) -> StorePath {
        StorePath(format!("{}/{}", self.0, segment))
    }

    /// The parent path, if any
    pub fn parent(&self) -> Option<StorePath> {
        self.0.rsplit_once('/').map(|(p, _)| StorePath(p.to_string()))
    }

    /// The final segment
    pub fn key(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, k)| k)
    }

    /// The raw slash-separated form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `other` is this path or a descendant of it
    pub fn contains(&self, other: &StorePath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action the store applies on behalf of a peer when its connection drops
#[derive(Debug, Clone)]
pub enum DeferredAction {
    /// Write this value at the registered path
    Set(Value),
    /// Remove the registered path (and any children)
    Remove,
}

/// How a watched child changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChange {
    /// The child appeared (or existed when the watch registered)
    Added,
    /// The child's value changed
    Changed,
    /// The child was removed
    Removed,
}

/// One update from a child-level watch
#[derive(Debug, Clone)]
pub struct ChildEvent {
    /// Direct child key under the watched path
    pub key: String,
    /// The child's value (the prior value for `Removed`)
    pub value: Value,
    /// What happened
    pub kind: ChildChange,
}

/// Stream of value updates for one path
///
/// Dropping the watch cancels the subscription.
pub struct ValueWatch {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl ValueWatch {
    /// Wrap a raw update channel (store-implementation use)
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self { rx }
    }

    /// Next update: `Some(None)` means the value is absent, outer `None`
    /// means the watch ended
    pub async fn recv(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }
}

/// Stream of child updates for one path
///
/// Dropping the watch cancels the subscription.
pub struct ChildWatch {
    rx: mpsc::UnboundedReceiver<ChildEvent>,
}

impl ChildWatch {
    /// Wrap a raw update channel (store-implementation use)
    pub fn new(rx: mpsc::UnboundedReceiver<ChildEvent>) -> Self {
        Self { rx }
    }

    /// Next child event, or `None` once the watch ended
    pub async fn recv(&mut self) -> Option<ChildEvent> {
        self.rx.recv().await
    }
}

/// One peer's connection to the shared rendezvous hierarchy
#[async_trait]
pub trait RendezvousStore: Send + Sync + 'static {
    /// Write a value at a path, creating intermediate levels as needed
    async fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Remove a path and everything under it
    async fn remove(&self, path: &StorePath) -> Result<()>;

    /// Watch a single value; the current state is delivered immediately
    async fn watch_value(&self, path: &StorePath) -> Result<ValueWatch>;

    /// Watch the direct children of a path; existing children are replayed
    /// as `Added`
    async fn watch_children(&self, path: &StorePath) -> Result<ChildWatch>;

    /// Register an action to run when this connection drops
    async fn defer_on_disconnect(&self, path: &StorePath, action: DeferredAction) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(StorePath::new("/a/b/").as_str(), "a/b");
        assert_eq!(StorePath::new("a//b").as_str(), "a/b");
    }

    #[test]
    fn test_path_child_and_parent() {
        let p = StorePath::new("calls/abc").child("data");
        assert_eq!(p.as_str(), "calls/abc/data");
        assert_eq!(p.key(), "data");
        assert_eq!(p.parent().unwrap().as_str(), "calls/abc");
        assert!(StorePath::new("calls").parent().is_none());
    }

    #[test]
    fn test_path_contains() {
        let root = StorePath::new("calls/abc/data");
        assert!(root.contains(&root));
        assert!(root.contains(&root.child("sdp")));
        assert!(!root.contains(&StorePath::new("calls/abc/datax")));
        assert!(!root.contains(&StorePath::new("calls/abc")));
    }
}
