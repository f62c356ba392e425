//! Lookout Discovery - live registry of healthy cluster service endpoints
//!
//! Watches a hierarchical coordination store for service and node membership
//! changes, health-checks every candidate before exposing it, and serves
//! uniform-random endpoint selection over the currently healthy set.

pub mod client;
pub mod registry;
pub mod verify;
pub mod watch;
pub mod watcher;

pub use client::DiscoveryClient;
pub use registry::{Endpoint, EndpointRegistry};
pub use verify::{NodeAnnouncement, NodeVerifier};
pub use watch::WatchTable;
pub use watcher::ServiceWatcher;
