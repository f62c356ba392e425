//! In-memory endpoint registry
//!
//! Maps service names to their currently verified endpoints. Eventually
//! consistent with the coordination store: entries are only refreshed when a
//! scan commits.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A verified service instance: the candidate's node id and the base URI its
/// health check answered on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub uri: String,
}

/// Registry of verified endpoints per service.
///
/// A key is present only after at least one completed check; an empty list
/// means "known service, zero healthy nodes" and stays distinct from an
/// unknown service. Never held across await points.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    entries: RwLock<HashMap<String, Vec<Endpoint>>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit the endpoint list from a completed check, replacing any prior
    /// list for the service.
    pub fn set(&self, service: &str, endpoints: Vec<Endpoint>) {
        debug!(
            service = %service,
            endpoints = endpoints.len(),
            "Committing endpoint list"
        );
        self.entries.write().insert(service.to_string(), endpoints);
    }

    /// Drop the service's entry entirely.
    pub fn remove(&self, service: &str) {
        if self.entries.write().remove(service).is_some() {
            debug!(service = %service, "Removed endpoint list");
        }
    }

    /// Uniform-random pick among the service's healthy endpoints. `None` when
    /// the service is unknown or has no healthy nodes.
    #[must_use]
    pub fn random_endpoint(&self, service: &str) -> Option<String> {
        let entries = self.entries.read();
        entries
            .get(service)
            .and_then(|list| list.choose(&mut rand::rng()))
            .map(|endpoint| endpoint.uri.clone())
    }

    /// Snapshot of the service's endpoint list, empty when unknown.
    #[must_use]
    pub fn endpoints(&self, service: &str) -> Vec<Endpoint> {
        self.entries.read().get(service).cloned().unwrap_or_default()
    }

    /// Whether the service has a committed (possibly empty) entry.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.entries.read().contains_key(service)
    }

    /// Names with a committed entry, sorted.
    #[must_use]
    pub fn known_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}
