//! Lookout Core - shared foundation for cluster service discovery
//!
//! Error taxonomy, configuration, logging setup, and the coordination-store
//! abstraction the discovery layer is built against.

pub mod config;
pub mod coordination;
pub mod error;
pub mod logging;

pub use config::{Config, DiscoveryConfig, LoggingConfig, COORDINATOR, OVERLORD};
pub use coordination::{CoordinationStore, MemoryStore, StoreEvent, WatchId, WatchKind};
pub use error::{Error, Result};
