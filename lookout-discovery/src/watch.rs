//! Watch bookkeeping
//!
//! At most one active child watch per store path. One-shot watches are
//! consumed by firing; callers re-arm through `watch` on the next check.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use lookout_core::{CoordinationStore, Result, WatchId, WatchKind};

/// Table of active watch registrations, keyed by store path.
///
/// The discovery root is tracked here the same way service paths are, which is
/// what keeps re-registration after watch firings and session expiry free of
/// duplicate watches. Mutated only from the serial event-handling path.
pub struct WatchTable {
    store: Arc<dyn CoordinationStore>,
    handles: Mutex<HashMap<String, WatchId>>,
}

impl WatchTable {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `path` currently has an active watch.
    #[must_use]
    pub fn is_watched(&self, path: &str) -> bool {
        self.handles.lock().contains_key(path)
    }

    /// Number of active watch registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Arm a one-shot child watch on `path`. No-op while a watch is already
    /// recorded for it.
    pub async fn watch(&self, path: &str) -> Result<()> {
        if self.is_watched(path) {
            debug!(path = %path, "Watch already armed");
            return Ok(());
        }
        let id = self.store.register_watch(path, WatchKind::Children).await?;
        self.handles.lock().insert(path.to_string(), id);
        debug!(path = %path, id, "Armed child watch");
        Ok(())
    }

    /// Drop the watch on `path` if present, cancelling it in the store.
    ///
    /// Also the cleanup path after a firing: cancelling a consumed id is a
    /// store-level no-op, so one code path covers both cases.
    pub async fn unwatch(&self, path: &str) {
        let id = self.handles.lock().remove(path);
        if let Some(id) = id {
            if let Err(e) = self.store.cancel_watch(id).await {
                debug!(path = %path, id, error = %e, "Watch cancellation failed");
            }
            debug!(path = %path, id, "Dropped child watch");
        }
    }

    /// Drop every recorded watch. Used for session-expiry recovery, where the
    /// store has already forgotten them server-side.
    pub async fn clear(&self) {
        let drained: Vec<(String, WatchId)> = {
            let mut handles = self.handles.lock();
            handles.drain().collect()
        };
        for (path, id) in drained {
            if let Err(e) = self.store.cancel_watch(id).await {
                debug!(path = %path, id, error = %e, "Watch cancellation failed");
            }
        }
    }
}
