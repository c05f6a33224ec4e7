use crate::{discovery::DiscoveredResource, Error, Result, GROUP_VERSION};
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, fmt};

/// Identifies a resource type by its group, version, and plural name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// A resource kind served by the aggregated API.
///
/// Non-core resources carry composite names (`apps.deployments`) and kinds
/// (`apps.Deployment`) so that resources from different groups never collide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub name: String,
    pub namespaced: bool,
    pub kind: String,
    pub verbs: Vec<String>,
    pub storage_version_hash: String,

    #[serde(skip)]
    pub group: String,
    #[serde(skip)]
    pub version: String,
    #[serde(skip)]
    pub upstream_kind: String,
}

/// An immutable view of the known resource kinds.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    resources: Vec<ResourceDescriptor>,
    by_key: HashMap<String, usize>,
}

// === impl Gvr ===

impl Gvr {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The `apiVersion` of objects of this resource.
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&key(&self.resource, &self.group))
    }
}

/// Splits a path segment like `rbac.authorization.k8s.io.roles` into its group
/// and resource name. The last dot-separated element is the resource.
pub fn split_path_segment(segment: &str) -> (&str, &str) {
    match segment.rsplit_once('.') {
        Some((group, resource)) => (group, resource),
        None => ("", segment),
    }
}

fn key(resource: &str, group: &str) -> String {
    if group.is_empty() {
        resource.to_string()
    } else {
        format!("{group}.{resource}")
    }
}

/// Hashes the aggregate coordinates of a kind the same way the API server
/// computes `storageVersionHash` in discovery documents.
pub fn storage_version_hash(kind: &str) -> String {
    let digest = Sha256::digest(format!("{GROUP_VERSION}/{kind}").as_bytes());
    base64::engine::general_purpose::STANDARD.encode(&digest[..8])
}

// === impl ResourceDescriptor ===

impl ResourceDescriptor {
    pub fn new(resource: &DiscoveredResource) -> Self {
        let name = key(&resource.resource, &resource.group);
        let kind = key(&resource.kind, &resource.group);
        let storage_version_hash = storage_version_hash(&kind);
        Self {
            name,
            namespaced: resource.namespaced,
            kind,
            verbs: vec!["list".to_string()],
            storage_version_hash,
            group: resource.group.clone(),
            version: resource.version.clone(),
            upstream_kind: resource.kind.clone(),
        }
    }

    pub fn gvr(&self) -> Gvr {
        let resource = self
            .name
            .strip_prefix(&format!("{}.", self.group))
            .filter(|_| !self.group.is_empty())
            .unwrap_or(&self.name);
        Gvr::new(&self.group, &self.version, resource)
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// Builds a snapshot from discovered resources.
    ///
    /// Cluster-scoped resources and resources of the aggregated group itself
    /// are skipped. When a key is discovered more than once, the first
    /// occurrence wins.
    pub fn new(discovered: impl IntoIterator<Item = DiscoveredResource>) -> Self {
        let mut resources = Vec::new();
        let mut by_key = HashMap::new();
        for resource in discovered {
            if !resource.namespaced || resource.group == crate::GROUP {
                continue;
            }
            let descriptor = ResourceDescriptor::new(&resource);
            if by_key.contains_key(&descriptor.name) {
                tracing::debug!(resource = %descriptor.name, "Ignoring duplicate resource");
                continue;
            }
            by_key.insert(descriptor.name.clone(), resources.len());
            resources.push(descriptor);
        }
        Self { resources, by_key }
    }

    pub fn list(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, resource: &str, group: &str) -> Option<&ResourceDescriptor> {
        let idx = self.by_key.get(&key(resource, group))?;
        self.resources.get(*idx)
    }

    /// Returns the upstream kind of the given resource, e.g. `Deployment`.
    pub fn kind_for(&self, gvr: &Gvr) -> Result<String> {
        self.get(&gvr.resource, &gvr.group)
            .map(|d| d.upstream_kind.clone())
            .ok_or_else(|| Error::NotFound(gvr.to_string()))
    }

    /// Resolves a path segment naming a resource to its full coordinates.
    pub fn gvr_from_path(&self, segment: &str) -> Result<Gvr> {
        let (group, resource) = split_path_segment(segment);
        let descriptor = self
            .get(resource, group)
            .ok_or_else(|| Error::NotFound(segment.to_string()))?;
        Ok(Gvr::new(group, &descriptor.version, resource))
    }
}
