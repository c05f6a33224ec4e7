use crate::{resource::ResourceDescriptor, GROUP_VERSION};
use serde_json::json;

/// A namespaced resource as reported by the cluster's discovery API, using
/// its preferred version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub kind: String,
    pub namespaced: bool,
}

/// Lists the preferred version of every resource served by the cluster.
#[async_trait::async_trait]
pub trait DiscoverResources: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredResource>>;
}

/// Renders the `APIResourceList` served at the aggregated group-version root.
pub fn document(resources: &[ResourceDescriptor]) -> serde_json::Value {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": GROUP_VERSION,
        "resources": resources,
    })
}
