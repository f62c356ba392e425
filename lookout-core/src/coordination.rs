//! Coordination-store abstraction
//!
//! The discovery layer talks to a hierarchical coordination store (a
//! ZooKeeper-like tree of ephemeral child nodes) through the
//! [`CoordinationStore`] trait. Watches are one-shot: a registration fires at
//! most once, is consumed by firing, and must be re-armed by the caller.
//! All firings and session notifications arrive on a single channel so the
//! consumer can handle them serially.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// Opaque identifier of a registered one-shot watch.
pub type WatchId = u64;

/// Kind of change a watch observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Child nodes added or removed under the watched path.
    Children,
    /// Payload of the watched node changed.
    Data,
}

/// Event delivered on the session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A one-shot watch fired and was consumed.
    WatchFired {
        id: WatchId,
        path: String,
        kind: WatchKind,
    },
    /// The session expired; every outstanding watch is gone.
    SessionExpired,
}

/// Client interface to the coordination store.
///
/// Only the surface the discovery layer needs: session establishment, reads,
/// one-shot watch registration, and teardown. Connection management and the
/// wire protocol are the implementor's concern.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Establish the session and hand back the event channel. Events must be
    /// delivered in firing order; the receiver processes one event to
    /// completion before taking the next.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<StoreEvent>>;

    /// List child node names under `path`. `NotFound` if the path is absent.
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    /// Read the payload of the node at `path`. `NotFound` if absent.
    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Register a one-shot watch on `path`.
    async fn register_watch(&self, path: &str, kind: WatchKind) -> Result<WatchId>;

    /// Cancel a watch. Unknown or already-consumed ids are a no-op.
    async fn cancel_watch(&self, id: WatchId) -> Result<()>;

    /// Terminate the session. Idempotent.
    async fn close(&self);
}

struct WatchSpec {
    path: String,
    kind: WatchKind,
}

#[derive(Default)]
struct StoreState {
    /// Absolute path -> payload. Children are derived from key structure.
    nodes: HashMap<String, Vec<u8>>,
    watches: HashMap<WatchId, WatchSpec>,
    events: Option<mpsc::UnboundedSender<StoreEvent>>,
}

/// Process-local coordination store.
///
/// Backs the test suite and single-process embeddings with the same contract a
/// networked store implementation provides: a hierarchical node tree, one-shot
/// watches consumed by firing, and serial event delivery. Tree mutations
/// (`create`, `set_data`, `delete`, `expire_session`) are the test's lever for
/// simulating cluster membership changes.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    next_watch_id: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            next_watch_id: AtomicU64::new(1),
        }
    }

    /// Create the node at `path` with `payload`, creating missing ancestors
    /// with empty payloads. Overwrites the payload if the node already exists.
    /// Fires child watches on every parent that gained a child, and data
    /// watches on an overwritten node.
    pub fn create(&self, path: &str, payload: impl Into<Vec<u8>>) {
        let events = {
            let mut state = self.state.lock();
            let mut events = Vec::new();

            if state.nodes.contains_key(path) {
                state.nodes.insert(path.to_string(), payload.into());
                events.extend(take_watches(&mut state, path, WatchKind::Data));
            } else {
                for ancestor in ancestors(path) {
                    if !state.nodes.contains_key(&ancestor) {
                        state.nodes.insert(ancestor.clone(), Vec::new());
                        if let Some(parent) = parent_of(&ancestor) {
                            events.extend(take_watches(&mut state, &parent, WatchKind::Children));
                        }
                    }
                }
                state.nodes.insert(path.to_string(), payload.into());
                if let Some(parent) = parent_of(path) {
                    events.extend(take_watches(&mut state, &parent, WatchKind::Children));
                }
            }
            events
        };
        self.emit(events);
    }

    /// Replace the payload at `path`, firing data watches. No-op if absent.
    pub fn set_data(&self, path: &str, payload: impl Into<Vec<u8>>) {
        let events = {
            let mut state = self.state.lock();
            if !state.nodes.contains_key(path) {
                return;
            }
            state.nodes.insert(path.to_string(), payload.into());
            take_watches(&mut state, path, WatchKind::Data)
        };
        self.emit(events);
    }

    /// Delete the node at `path` and its whole subtree. Fires child watches on
    /// the parent and consumes watches registered on the deleted paths.
    pub fn delete(&self, path: &str) {
        let events = {
            let mut state = self.state.lock();
            if state.nodes.remove(path).is_none() {
                return;
            }
            let subtree_prefix = format!("{path}/");
            state.nodes.retain(|p, _| !p.starts_with(&subtree_prefix));

            let mut events = Vec::new();
            if let Some(parent) = parent_of(path) {
                events.extend(take_watches(&mut state, &parent, WatchKind::Children));
            }
            events.extend(take_watches(&mut state, path, WatchKind::Children));
            events.extend(take_watches(&mut state, path, WatchKind::Data));
            events
        };
        self.emit(events);
    }

    /// Expire the session: every outstanding watch is dropped without firing
    /// and `SessionExpired` is delivered on the event channel.
    pub fn expire_session(&self) {
        {
            let mut state = self.state.lock();
            let dropped = state.watches.len();
            state.watches.clear();
            debug!(dropped, "Session expired, watches dropped");
        }
        self.emit(vec![StoreEvent::SessionExpired]);
    }

    /// Number of active watch registrations on `path`.
    #[must_use]
    pub fn watch_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .watches
            .values()
            .filter(|w| w.path == path)
            .count()
    }

    fn emit(&self, events: Vec<StoreEvent>) {
        let sender = self.state.lock().events.clone();
        if let Some(sender) = sender {
            for event in events {
                // Receiver gone means the session consumer shut down first
                let _ = sender.send(event);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<StoreEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().events = Some(tx);
        debug!("Coordination session established");
        Ok(rx)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        if !state.nodes.contains_key(path) {
            return Err(Error::NotFound(format!("No node at {path}")));
        }
        let prefix = format!("{path}/");
        let mut children: Vec<String> = state
            .nodes
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(ToString::to_string)
            .collect();
        children.sort();
        Ok(children)
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No node at {path}")))
    }

    async fn register_watch(&self, path: &str, kind: WatchKind) -> Result<WatchId> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(path) {
            return Err(Error::NotFound(format!("Cannot watch missing node {path}")));
        }
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        state.watches.insert(
            id,
            WatchSpec {
                path: path.to_string(),
                kind,
            },
        );
        Ok(id)
    }

    async fn cancel_watch(&self, id: WatchId) -> Result<()> {
        self.state.lock().watches.remove(&id);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.watches.clear();
        // Dropping the sender closes the event channel, which ends consumers
        state.events = None;
        debug!("Coordination session closed");
    }
}

/// Consume every watch of `kind` registered on `path`, in registration order.
fn take_watches(state: &mut StoreState, path: &str, kind: WatchKind) -> Vec<StoreEvent> {
    let mut ids: Vec<WatchId> = state
        .watches
        .iter()
        .filter(|(_, w)| w.kind == kind && w.path == path)
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();

    let mut events = Vec::new();
    for id in ids {
        if let Some(watch) = state.watches.remove(&id) {
            events.push(StoreEvent::WatchFired {
                id,
                path: watch.path,
                kind: watch.kind,
            });
        }
    }
    events
}

fn parent_of(path: &str) -> Option<String> {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent.to_string()),
        _ => None,
    }
}

/// Proper ancestors of `path`, outermost first (`/a/b/c` -> `/a`, `/a/b`).
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired_path(event: &StoreEvent) -> &str {
        match event {
            StoreEvent::WatchFired { path, .. } => path,
            StoreEvent::SessionExpired => panic!("expected a watch firing"),
        }
    }

    #[tokio::test]
    async fn test_tree_basics() {
        let store = MemoryStore::new();
        store.create("/discovery/coordinator/c1", br#"{"address":"h","port":1}"#);

        // Ancestors are created implicitly
        assert_eq!(
            store.list_children("/discovery").await.unwrap(),
            vec!["coordinator"]
        );
        assert_eq!(
            store.list_children("/discovery/coordinator").await.unwrap(),
            vec!["c1"]
        );
        assert_eq!(
            store.get_data("/discovery/coordinator/c1").await.unwrap(),
            br#"{"address":"h","port":1}"#.to_vec()
        );
        assert!(matches!(
            store.list_children("/nowhere").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.get_data("/discovery/coordinator/c2").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_children_are_sorted() {
        let store = MemoryStore::new();
        store.create("/discovery/overlord", b"");
        store.create("/discovery/broker", b"");
        store.create("/discovery/coordinator", b"");
        assert_eq!(
            store.list_children("/discovery").await.unwrap(),
            vec!["broker", "coordinator", "overlord"]
        );
    }

    #[tokio::test]
    async fn test_child_watch_fires_once() {
        let store = MemoryStore::new();
        store.create("/discovery", b"");
        let mut events = store.connect().await.unwrap();

        let id = store
            .register_watch("/discovery", WatchKind::Children)
            .await
            .unwrap();
        assert_eq!(store.watch_count("/discovery"), 1);

        store.create("/discovery/coordinator", b"");
        let event = events.try_recv().unwrap();
        assert_eq!(fired_path(&event), "/discovery");
        assert!(matches!(
            event,
            StoreEvent::WatchFired {
                kind: WatchKind::Children,
                ..
            }
        ));

        // Consumed by firing: a second change is silent
        assert_eq!(store.watch_count("/discovery"), 0);
        store.create("/discovery/overlord", b"");
        assert!(events.try_recv().is_err());

        // Cancelling the consumed id is a no-op
        store.cancel_watch(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_data_watch() {
        let store = MemoryStore::new();
        store.create("/discovery/coordinator/c1", b"v1");
        let mut events = store.connect().await.unwrap();

        store
            .register_watch("/discovery/coordinator/c1", WatchKind::Data)
            .await
            .unwrap();
        store.set_data("/discovery/coordinator/c1", b"v2");

        let event = events.try_recv().unwrap();
        assert_eq!(fired_path(&event), "/discovery/coordinator/c1");
        assert_eq!(
            store.get_data("/discovery/coordinator/c1").await.unwrap(),
            b"v2".to_vec()
        );
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let store = MemoryStore::new();
        store.create("/discovery", b"");
        let mut events = store.connect().await.unwrap();

        let id = store
            .register_watch("/discovery", WatchKind::Children)
            .await
            .unwrap();
        store.cancel_watch(id).await.unwrap();
        assert_eq!(store.watch_count("/discovery"), 0);

        store.create("/discovery/coordinator", b"");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_requires_existing_node() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.register_watch("/nowhere", WatchKind::Children).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_fires_parent_watch_and_drops_subtree() {
        let store = MemoryStore::new();
        store.create("/discovery/coordinator/c1", b"");
        let mut events = store.connect().await.unwrap();

        store
            .register_watch("/discovery", WatchKind::Children)
            .await
            .unwrap();
        store.delete("/discovery/coordinator");

        let event = events.try_recv().unwrap();
        assert_eq!(fired_path(&event), "/discovery");
        assert!(matches!(
            store.get_data("/discovery/coordinator/c1").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            store.list_children("/discovery").await.unwrap(),
            Vec::<String>::new()
        );
    }

    #[tokio::test]
    async fn test_session_expiry_drops_watches() {
        let store = MemoryStore::new();
        store.create("/discovery/coordinator", b"");
        let mut events = store.connect().await.unwrap();

        store
            .register_watch("/discovery", WatchKind::Children)
            .await
            .unwrap();
        store
            .register_watch("/discovery/coordinator", WatchKind::Children)
            .await
            .unwrap();

        store.expire_session();
        assert_eq!(events.try_recv().unwrap(), StoreEvent::SessionExpired);
        assert_eq!(store.watch_count("/discovery"), 0);
        assert_eq!(store.watch_count("/discovery/coordinator"), 0);

        // Expired watches never fire
        store.create("/discovery/overlord", b"");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_event_channel() {
        let store = MemoryStore::new();
        store.create("/discovery", b"");
        let mut events = store.connect().await.unwrap();

        store.close().await;
        assert!(matches!(
            events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // Idempotent
        store.close().await;
    }
}
