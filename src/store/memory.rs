//! In-process rendezvous store
//!
//! A single shared hierarchy with per-peer connection handles. Implements
//! the full store contract (value/child watches with replay-on-register,
//! subtree removal, and deferred disconnect actions) so integration tests
//! and local demos can run the real signaling protocol without a remote
//! store. [`MemoryStoreHandle::disconnect`] simulates an ungraceful drop:
//! the handle goes dead and the deferred actions run in registration order,
//! which is exactly the crash-safety path the presence protocol relies on.
//!
//! Leaf values live in a flat path-keyed map. A watched child's value is
//! materialized from the subtree below it, so a record written as one value
//! (`users/p`) and later patched at a deeper path (`users/p/online`) is
//! observed merged, the way the replicated store behaves.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::store::{
    ChildChange, ChildEvent, ChildWatch, DeferredAction, RendezvousStore, StorePath, ValueWatch,
};

type ValueSender = mpsc::UnboundedSender<Option<Value>>;
type ChildSender = mpsc::UnboundedSender<ChildEvent>;

/// Shared in-process store hierarchy
///
/// Cheap to clone; every clone refers to the same tree. Use [`handle`] to
/// create one connection per simulated peer.
///
/// [`handle`]: MemoryStore::handle
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    /// Leaf values by full path. The lock also serializes notification
    /// fanout so watchers observe updates in application order.
    tree: Mutex<HashMap<String, Value>>,
    value_watchers: DashMap<String, Vec<ValueSender>>,
    child_watchers: DashMap<String, Vec<ChildSender>>,
}

impl MemoryStore {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to the hierarchy
    pub fn handle(&self) -> MemoryStoreHandle {
        MemoryStoreHandle {
            shared: Arc::clone(&self.shared),
            connected: Arc::new(AtomicBool::new(true)),
            deferred: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current value at a path, materialized from the subtree (test helper)
    pub fn read(&self, path: &StorePath) -> Option<Value> {
        let tree = self.shared.tree.lock();
        Shared::materialize(&tree, path.as_str())
    }
}

/// One peer's connection to a [`MemoryStore`]
///
/// Clones share the same connection state: disconnecting any clone kills
/// them all and fires the deferred actions.
#[derive(Clone)]
pub struct MemoryStoreHandle {
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
    deferred: Arc<Mutex<Vec<(StorePath, DeferredAction)>>>,
}

impl MemoryStoreHandle {
    /// Sever the connection, applying deferred actions in registration order
    ///
    /// Models the store noticing an ungraceful drop. Idempotent.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let actions = std::mem::take(&mut *self.deferred.lock());
        for (path, action) in actions {
            trace!(path = %path, "applying deferred action");
            match action {
                DeferredAction::Set(value) => self.shared.apply_write(&path, value),
                DeferredAction::Remove => self.shared.apply_remove(&path),
            }
        }
    }

    /// Whether this connection is still live
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::StoreError("connection is closed".to_string()))
        }
    }
}

#[async_trait]
impl RendezvousStore for MemoryStoreHandle {
    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.ensure_connected()?;
        self.shared.apply_write(path, value);
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.ensure_connected()?;
        self.shared.apply_remove(path);
        Ok(())
    }

    async fn watch_value(&self, path: &StorePath) -> Result<ValueWatch> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            // Register and replay under the tree lock so no concurrent
            // write slips between the snapshot and the subscription.
            let tree = self.shared.tree.lock();
            let current = tree.get(path.as_str()).cloned();
            let _ = tx.send(current);
            self.shared
                .value_watchers
                .entry(path.as_str().to_string())
                .or_default()
                .push(tx);
        }
        Ok(ValueWatch::new(rx))
    }

    async fn watch_children(&self, path: &StorePath) -> Result<ChildWatch> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let tree = self.shared.tree.lock();
            for key in Shared::direct_children(&tree, path.as_str()) {
                let child = path.child(&key);
                if let Some(value) = Shared::materialize(&tree, child.as_str()) {
                    let _ = tx.send(ChildEvent {
                        key,
                        value,
                        kind: ChildChange::Added,
                    });
                }
            }
            self.shared
                .child_watchers
                .entry(path.as_str().to_string())
                .or_default()
                .push(tx);
        }
        Ok(ChildWatch::new(rx))
    }

    async fn defer_on_disconnect(&self, path: &StorePath, action: DeferredAction) -> Result<()> {
        self.ensure_connected()?;
        self.deferred.lock().push((path.clone(), action));
        Ok(())
    }
}

impl Shared {
    fn apply_write(&self, path: &StorePath, value: Value) {
        let mut tree = self.tree.lock();

        // Snapshot affected child-watcher state before mutating.
        let fanout = self.affected_children(&tree, path);

        // A write replaces the whole subtree at the path, so stale deeper
        // patches (like a disconnect-era online flag) do not shadow it.
        let prefix = format!("{}/", path.as_str());
        let buried: Vec<String> = tree
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for k in &buried {
            tree.remove(k);
            self.notify_value(k, None);
        }

        tree.insert(path.as_str().to_string(), value.clone());

        self.notify_value(path.as_str(), Some(value));
        for (watched, key, existed) in fanout {
            let child_path = StorePath::new(format!("{}/{}", watched, key));
            let materialized = Self::materialize(&tree, child_path.as_str())
                .unwrap_or(Value::Null);
            let kind = if existed {
                ChildChange::Changed
            } else {
                ChildChange::Added
            };
            self.notify_children(&watched, ChildEvent {
                key,
                value: materialized,
                kind,
            });
        }
    }

    fn apply_remove(&self, path: &StorePath) {
        let mut tree = self.tree.lock();

        let removed: Vec<String> = tree
            .keys()
            .filter(|k| path.contains(&StorePath::new(k.as_str())))
            .cloned()
            .collect();
        if removed.is_empty() {
            return;
        }

        // Child watchers inside or above the removed subtree need the prior
        // materialized values, so collect them before mutating.
        let mut fanout: Vec<(String, String, Value)> = Vec::new();
        for entry in self.child_watchers.iter() {
            let watched = StorePath::new(entry.key().as_str());
            if path.contains(&watched) {
                // Whole watched collection goes away.
                for key in Self::direct_children(&tree, watched.as_str()) {
                    let child = watched.child(&key);
                    if let Some(prior) = Self::materialize(&tree, child.as_str()) {
                        fanout.push((watched.as_str().to_string(), key, prior));
                    }
                }
            } else if watched.contains(path) && watched.as_str() != path.as_str() {
                // Removal strikes somewhere below one child of the watched path.
                let rel = &path.as_str()[watched.as_str().len() + 1..];
                let key = rel.split('/').next().unwrap_or(rel).to_string();
                let child = watched.child(&key);
                if let Some(prior) = Self::materialize(&tree, child.as_str()) {
                    fanout.push((watched.as_str().to_string(), key, prior));
                }
            }
        }

        for k in &removed {
            tree.remove(k);
            self.notify_value(k, None);
        }

        for (watched, key, prior) in fanout {
            let child_path = StorePath::new(format!("{}/{}", watched, key));
            match Self::materialize(&tree, child_path.as_str()) {
                // Part of the child survived the removal.
                Some(rest) => self.notify_children(&watched, ChildEvent {
                    key,
                    value: rest,
                    kind: ChildChange::Changed,
                }),
                None => self.notify_children(&watched, ChildEvent {
                    key,
                    value: prior,
                    kind: ChildChange::Removed,
                }),
            }
        }
    }

    /// (watched path, child key, child-existed-before) triples for a write
    fn affected_children(
        &self,
        tree: &HashMap<String, Value>,
        path: &StorePath,
    ) -> Vec<(String, String, bool)> {
        let mut out = Vec::new();
        let mut ancestor = path.parent();
        while let Some(a) = ancestor {
            if self.child_watchers.contains_key(a.as_str()) {
                let rel = &path.as_str()[a.as_str().len() + 1..];
                let key = rel.split('/').next().unwrap_or(rel).to_string();
                let child = a.child(&key);
                let existed = Self::materialize(tree, child.as_str()).is_some();
                out.push((a.as_str().to_string(), key, existed));
            }
            ancestor = a.parent();
        }
        out
    }

    fn notify_value(&self, path: &str, value: Option<Value>) {
        if let Some(mut senders) = self.value_watchers.get_mut(path) {
            senders.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    fn notify_children(&self, path: &str, event: ChildEvent) {
        if let Some(mut senders) = self.child_watchers.get_mut(path) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Direct child keys under a path, in key order
    fn direct_children(tree: &HashMap<String, Value>, path: &str) -> BTreeSet<String> {
        let prefix = format!("{}/", path);
        tree.keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rel| rel.split('/').next().unwrap_or(rel).to_string())
            .collect()
    }

    /// Assemble the value of a subtree
    ///
    /// An exact leaf with no deeper entries is returned as-is. Deeper
    /// entries are merged over the leaf (when it is an object) or into a
    /// fresh object, overlaying patches like `users/p/online` onto the
    /// record written at `users/p`.
    fn materialize(tree: &HashMap<String, Value>, path: &str) -> Option<Value> {
        let exact = tree.get(path).cloned();
        let prefix = format!("{}/", path);
        let descendants: BTreeMap<&str, &Value> = tree
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rel| (rel, v)))
            .collect();

        if descendants.is_empty() {
            return exact;
        }

        let mut root = match exact {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (rel, value) in descendants {
            insert_nested(&mut root, rel, value.clone());
        }
        Some(Value::Object(root))
    }
}

/// Insert a value at a slash-separated relative path inside a JSON object
fn insert_nested(map: &mut Map<String, Value>, rel: &str, value: Value) {
    match rel.split_once('/') {
        None => {
            map.insert(rel.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_nested(inner, rest, value);
            }
        }
    }
}
