//! Capability probes for optional resource kinds.
//!
//! Kinds such as Gateway or OpenShift Route only exist when the matching
//! CRDs or platform APIs are installed. Their watchers are registered only
//! after a probe confirms the API is served.

use kube::{
    core::ApiResource,
    discovery::Discovery,
    Client,
};
use tracing::debug;

#[async_trait::async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn is_available(&self, resource: &ApiResource) -> bool;
}

/// Asks the API server's discovery endpoint.
pub struct DiscoveryProbe {
    client: Client,
}

impl DiscoveryProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CapabilityProbe for DiscoveryProbe {
    async fn is_available(&self, resource: &ApiResource) -> bool {
        let discovery = match Discovery::new(self.client.clone()).filter(&[resource.group.as_str()]).run().await {
            Ok(d) => d,
            Err(e) => {
                debug!(group = %resource.group, error = %e, "discovery failed; treating resource as unavailable");
                return false;
            }
        };
        for group in discovery.groups() {
            for (ar, _caps) in group.recommended_resources() {
                if ar.group == resource.group && ar.version == resource.version && ar.kind == resource.kind {
                    return true;
                }
            }
        }
        false
    }
}

/// Fixed answer set, for tests and for environments where discovery is not
/// permitted.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    available: Vec<(String, String, String)>,
}

impl StaticProbe {
    pub fn new(resources: impl IntoIterator<Item = ApiResource>) -> Self {
        Self { available: resources.into_iter().map(|ar| (ar.group, ar.version, ar.kind)).collect() }
    }

    /// Nothing optional is installed.
    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CapabilityProbe for StaticProbe {
    async fn is_available(&self, resource: &ApiResource) -> bool {
        self.available
            .iter()
            .any(|(g, v, k)| *g == resource.group && *v == resource.version && *k == resource.kind)
    }
}
