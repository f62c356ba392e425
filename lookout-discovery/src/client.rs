//! Discovery client
//!
//! Owns the coordination session and the serial event loop, and exposes the
//! query surface applications call from their own threads.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lookout_core::{
    CoordinationStore, DiscoveryConfig, Result, StoreEvent, COORDINATOR, OVERLORD,
};

use crate::registry::{Endpoint, EndpointRegistry};
use crate::watcher::ServiceWatcher;

/// Client-side registry of healthy endpoints for the watched cluster services.
///
/// Construction connects the store session, performs the initial root check
/// synchronously (the discovery root must pre-exist), then drives all further
/// reconciliation from watch events. Events are handled one at a time: a
/// firing is fully processed, including its health checks, before the next
/// event is taken, so overlapping firings for the same service cannot
/// interleave.
pub struct DiscoveryClient {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<EndpointRegistry>,
    cancel: CancellationToken,
}

impl DiscoveryClient {
    /// Connect and register: session, expiry recovery, root watch, and one
    /// synchronous `check_root`. A missing discovery root is fatal here.
    pub async fn connect(
        store: Arc<dyn CoordinationStore>,
        config: DiscoveryConfig,
    ) -> Result<Self> {
        let mut events = store.connect().await?;
        let registry = Arc::new(EndpointRegistry::new());
        let watcher = ServiceWatcher::new(store.clone(), registry.clone(), config)?;

        watcher.check_root().await?;
        info!("Discovery client registered");

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = loop_cancel.cancelled() => {
                        debug!("Discovery event loop cancelled");
                        return;
                    }
                    event = events.recv() => event,
                };
                match event {
                    Some(StoreEvent::WatchFired { path, .. }) => {
                        watcher.handle_fired(&path).await;
                    }
                    Some(StoreEvent::SessionExpired) => {
                        watcher.recover_session().await;
                    }
                    None => {
                        debug!("Coordination event channel closed, stopping");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            store,
            registry,
            cancel,
        })
    }

    /// URI of a random healthy coordinator, if one is known.
    #[must_use]
    pub fn coordinator(&self) -> Option<String> {
        self.registry.random_endpoint(COORDINATOR)
    }

    /// URI of a random healthy overlord, if one is known.
    #[must_use]
    pub fn overlord(&self) -> Option<String> {
        self.registry.random_endpoint(OVERLORD)
    }

    /// Random healthy endpoint of an arbitrary watched service.
    #[must_use]
    pub fn random_endpoint(&self, service: &str) -> Option<String> {
        self.registry.random_endpoint(service)
    }

    /// Service names with a committed (possibly empty) registry entry.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.registry.known_services()
    }

    /// Snapshot of a service's verified endpoints, empty when unknown.
    #[must_use]
    pub fn endpoints(&self, service: &str) -> Vec<Endpoint> {
        self.registry.endpoints(service)
    }

    /// Stop the event loop and close the session. In-flight health checks are
    /// abandoned; their results are discarded. Idempotent.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.store.close().await;
        info!("Discovery client closed");
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
