use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Well-known name of the coordinator service.
pub const COORDINATOR: &str = "coordinator";

/// Well-known name of the overlord service.
pub const OVERLORD: &str = "overlord";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional YAML file, overlaid with
    /// `LOOKOUT_`-prefixed environment variables (`LOOKOUT_DISCOVERY__DISCOVERY_PATH`
    /// and friends). Missing sources fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("LOOKOUT").separator("__"))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to load configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| Error::Configuration(format!("Invalid configuration: {e}")))
    }
}

/// Discovery settings: where services announce themselves, which names are
/// watched, and how candidates are health checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root path in the coordination store under which services announce.
    /// Must pre-exist; the client never creates it.
    pub discovery_path: String,
    /// Service names eligible for watching. Names announced at the root but
    /// absent from this set are ignored.
    pub services: Vec<String>,
    /// Connect and overall timeout for each health probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Additional verification attempts after the first failure.
    pub verify_retries: u32,
    /// Base delay between verification attempts; attempt k sleeps k times this.
    pub retry_backoff_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_path: "/discovery".to_string(),
            services: vec![COORDINATOR.to_string(), OVERLORD.to_string()],
            probe_timeout_secs: 5,
            verify_retries: 3,
            retry_backoff_ms: 800,
        }
    }
}

impl DiscoveryConfig {
    /// Whether `name` belongs to the watched service set.
    #[must_use]
    pub fn is_watched_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s == name)
    }

    /// Store path a service announces its candidates under.
    #[must_use]
    pub fn service_path(&self, service: &str) -> String {
        format!("{}/{}", self.discovery_path, service)
    }

    /// Store path of one candidate's announcement payload.
    #[must_use]
    pub fn node_path(&self, service: &str, node: &str) -> String {
        format!("{}/{}/{}", self.discovery_path, service, node)
    }

    /// Map a store path back to a watched service name, if it is a direct
    /// child of the discovery root naming a service in the watched set.
    #[must_use]
    pub fn service_for_path(&self, path: &str) -> Option<String> {
        let rest = path
            .strip_prefix(self.discovery_path.as_str())?
            .strip_prefix('/')?;
        if !rest.is_empty() && !rest.contains('/') && self.is_watched_service(rest) {
            Some(rest.to_string())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
