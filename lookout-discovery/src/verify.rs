//! Candidate node verification
//!
//! Resolves a candidate's announcement payload into a base URI and gates its
//! entry into the registry on a bounded-retry HTTP health check.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lookout_core::{CoordinationStore, DiscoveryConfig, Error, Result};

use crate::registry::Endpoint;

/// Announcement payload a candidate stores at
/// `<discovery_path>/<service>/<node>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub address: String,
    pub port: u16,
}

impl NodeAnnouncement {
    /// Base URI the node serves from.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("http://{}:{}/", self.address, self.port)
    }
}

/// Health checker for candidate nodes.
///
/// A candidate is healthy iff `GET {uri}status` answers exactly 200 within the
/// probe timeout. Anything else - missing or malformed payload, connection
/// error, timeout, any other status - counts as a failed attempt and is
/// retried on an escalating schedule before the candidate is excluded.
pub struct NodeVerifier {
    store: Arc<dyn CoordinationStore>,
    http: reqwest::Client,
    config: DiscoveryConfig,
    backoff_step: Duration,
}

impl NodeVerifier {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &DiscoveryConfig) -> Result<Self> {
        let probe_timeout = Duration::from_secs(config.probe_timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(probe_timeout)
            .timeout(probe_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            http,
            config: config.clone(),
            backoff_step: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Verify one candidate. Returns the endpoint on the first healthy probe;
    /// `None` once the retry schedule is exhausted. Failures never escape.
    ///
    /// The attempt counter is local to this call, so concurrent verifications
    /// cannot interfere with each other's retry budgets.
    pub async fn verify(&self, service: &str, node_id: &str) -> Option<Endpoint> {
        let max_attempts = self.config.verify_retries + 1;

        for attempt in 1..=max_attempts {
            match self.attempt(service, node_id).await {
                Ok(endpoint) => {
                    debug!(
                        service = %service,
                        node = %node_id,
                        uri = %endpoint.uri,
                        attempt,
                        "Node verified"
                    );
                    return Some(endpoint);
                }
                Err(e) => {
                    debug!(
                        service = %service,
                        node = %node_id,
                        attempt,
                        error = %e,
                        "Verification attempt failed"
                    );
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.backoff_step * attempt).await;
            }
        }

        warn!(
            service = %service,
            node = %node_id,
            attempts = max_attempts,
            "Node failed verification, excluding from registry"
        );
        None
    }

    async fn attempt(&self, service: &str, node_id: &str) -> Result<Endpoint> {
        let path = self.config.node_path(service, node_id);
        let raw = self.store.get_data(&path).await?;
        let announcement: NodeAnnouncement = serde_json::from_slice(&raw)
            .map_err(|e| Error::Serialization(format!("Bad announcement at {path}: {e}")))?;

        let uri = announcement.uri();
        let response = self
            .http
            .get(format!("{uri}status"))
            .send()
            .await
            .map_err(|e| Error::Health(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Health(format!("{uri}status answered {status}")));
        }

        Ok(Endpoint {
            name: node_id.to_string(),
            uri,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            probe_timeout_secs: 2,
            retry_backoff_ms: 5,
            ..DiscoveryConfig::default()
        }
    }

    fn announce(store: &MemoryStore, service: &str, node: &str, server: &MockServer) {
        let payload = format!(
            r#"{{"address":"{}","port":{}}}"#,
            server.address().ip(),
            server.address().port()
        );
        store.create(&format!("/discovery/{service}/{node}"), payload.into_bytes());
    }

    #[tokio::test]
    async fn test_healthy_node_verifies_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        announce(&store, "coordinator", "c1", &server);

        let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
        let endpoint = verifier.verify("coordinator", "c1").await.unwrap();

        assert_eq!(endpoint.name, "c1");
        assert_eq!(endpoint.uri, format!("http://{}/", server.address()));
    }

    #[tokio::test]
    async fn test_succeeds_on_later_attempt_without_extra_probes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        announce(&store, "coordinator", "c1", &server);

        let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
        let endpoint = verifier.verify("coordinator", "c1").await;

        // Succeeded on attempt 3 of 4; the expectations above assert that no
        // fourth probe was sent after the success.
        assert!(endpoint.is_some());
    }

    #[tokio::test]
    async fn test_exhausts_retry_schedule_then_excludes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        announce(&store, "coordinator", "c1", &server);

        let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
        assert!(verifier.verify("coordinator", "c1").await.is_none());
    }

    #[tokio::test]
    async fn test_only_exactly_200_is_healthy() {
        for status in [204u16, 301, 404] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/status"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let store = Arc::new(MemoryStore::new());
            announce(&store, "coordinator", "c1", &server);

            let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
            assert!(
                verifier.verify("coordinator", "c1").await.is_none(),
                "status {status} must not count as healthy"
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_verification_failure() {
        let store = Arc::new(MemoryStore::new());
        store.create("/discovery/coordinator/c1", b"not json".to_vec());

        let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
        assert!(verifier.verify("coordinator", "c1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_payload_is_a_verification_failure() {
        let store = Arc::new(MemoryStore::new());
        store.create("/discovery/coordinator", b"".to_vec());

        let verifier = NodeVerifier::new(store, &fast_config()).unwrap();
        assert!(verifier.verify("coordinator", "ghost").await.is_none());
    }

    #[test]
    fn test_announcement_uri() {
        let announcement = NodeAnnouncement {
            address: "10.0.0.1".to_string(),
            port: 8081,
        };
        assert_eq!(announcement.uri(), "http://10.0.0.1:8081/");
    }
}
