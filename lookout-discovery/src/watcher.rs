//! Service watcher
//!
//! The reconciliation state machine between the coordination store and the
//! local registry. A service path is either unwatched or watched; every watch
//! firing re-arms and re-scans, so the registry re-converges after each
//! membership change without a persistent subscription.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use lookout_core::{CoordinationStore, DiscoveryConfig, Result};

use crate::registry::{Endpoint, EndpointRegistry};
use crate::verify::NodeVerifier;
use crate::watch::WatchTable;

pub struct ServiceWatcher {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<EndpointRegistry>,
    watches: WatchTable,
    verifier: NodeVerifier,
    config: DiscoveryConfig,
}

impl ServiceWatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: Arc<EndpointRegistry>,
        config: DiscoveryConfig,
    ) -> Result<Self> {
        let watches = WatchTable::new(store.clone());
        let verifier = NodeVerifier::new(store.clone(), &config)?;
        Ok(Self {
            store,
            registry,
            watches,
            verifier,
            config,
        })
    }

    /// Reconcile the registry against the root listing, re-arming the root
    /// watch. Services no longer announced are unregistered; announced names
    /// in the watched set are (re)checked. Errors are the caller's to judge:
    /// fatal at construction, logged-and-waited-out afterwards.
    pub async fn check_root(&self) -> Result<()> {
        let root = self.config.discovery_path.clone();
        self.watches.watch(&root).await?;
        let announced = self.store.list_children(&root).await?;
        debug!(announced = ?announced, "Scanned discovery root");

        let announced_set: HashSet<&str> = announced.iter().map(String::as_str).collect();
        for service in self.registry.known_services() {
            if !announced_set.contains(service.as_str()) {
                self.unregister_service(&service).await;
            }
        }

        for service in &announced {
            if self.config.is_watched_service(service) {
                self.check_service(service).await;
            } else {
                debug!(service = %service, "Ignoring service outside the watched set");
            }
        }
        Ok(())
    }

    /// Full check of one service: arm its watch, list candidates, verify them
    /// all, and commit the healthy set (possibly empty) to the registry.
    ///
    /// No-op while the service path is watched: an armed watch means the last
    /// scan is still current, so a redundant call must not rescan.
    pub async fn check_service(&self, service: &str) {
        let path = self.config.service_path(service);
        if self.watches.is_watched(&path) {
            debug!(service = %service, "Service already watched, skipping scan");
            return;
        }
        if let Err(e) = self.watches.watch(&path).await {
            warn!(service = %service, error = %e, "Failed to arm service watch");
            return;
        }

        let candidates = match self.store.list_children(&path).await {
            Ok(candidates) => candidates,
            Err(e) => {
                // No commit: a failed listing is not a completed check. The
                // root watch will fire and clean up if the service vanished.
                warn!(service = %service, error = %e, "Failed to list candidates");
                return;
            }
        };

        let checks = candidates
            .iter()
            .map(|node| self.verifier.verify(service, node));
        let endpoints: Vec<Endpoint> = join_all(checks).await.into_iter().flatten().collect();

        info!(
            service = %service,
            candidates = candidates.len(),
            healthy = endpoints.len(),
            "Service check complete"
        );
        self.registry.set(service, endpoints);
    }

    /// Drop the service's registry entry and cancel its watch in one step.
    pub async fn unregister_service(&self, service: &str) {
        info!(service = %service, "Unregistering service");
        self.registry.remove(service);
        self.watches.unwatch(&self.config.service_path(service)).await;
    }

    /// React to a fired one-shot watch: drop the consumed registration, then
    /// re-check (which re-arms) whatever the path covers.
    pub async fn handle_fired(&self, path: &str) {
        if path == self.config.discovery_path {
            debug!("Root watch fired");
            self.watches.unwatch(path).await;
            if let Err(e) = self.check_root().await {
                warn!(error = %e, "Root re-check failed");
            }
            return;
        }

        if let Some(service) = self.config.service_for_path(path) {
            debug!(service = %service, "Service watch fired");
            self.watches.unwatch(path).await;
            self.check_service(&service).await;
        } else {
            debug!(path = %path, "Ignoring watch event for unhandled path");
        }
    }

    /// Session-expiry recovery: the store dropped every watch, so forget the
    /// local handles and rebuild from the root. Registry contents stay in
    /// place until overwritten by the fresh checks.
    pub async fn recover_session(&self) {
        warn!("Coordination session expired, re-registering");
        self.watches.clear().await;
        if let Err(e) = self.check_root().await {
            warn!(error = %e, "Re-registration after session expiry failed");
        }
    }
}
