//! Classifies selector identifiers as projects or plain namespaces.
//!
//! A project is represented in the cluster by a namespace named after it,
//! marked by the `cattle.io/parent` label or the system-namespace annotation.
//! Member namespaces carry the project's name in the `field.cattle.io/projectId`
//! label.

use crate::{Error, Result};
use project_resources_k8s_api::{self as k8s, labels};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceRecord {
    pub name: String,
    pub labels: labels::Labels,
    pub is_project: bool,
}

/// Reads namespaces from a local cache.
pub trait NamespaceLookup: Send + Sync {
    fn get(&self, name: &str) -> anyhow::Result<Option<NamespaceRecord>>;

    fn list(&self, selector: &labels::Selector) -> anyhow::Result<Vec<NamespaceRecord>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    pub projects: Vec<String>,
    pub namespaces: BTreeMap<String, NamespaceRecord>,
}

// === impl NamespaceRecord ===

impl NamespaceRecord {
    pub fn new(name: impl Into<String>, labels: labels::Labels, project_annotation: bool) -> Self {
        let is_project = project_annotation || labels.contains_key(k8s::PARENT_LABEL);
        Self {
            name: name.into(),
            labels,
            is_project,
        }
    }

    /// The project this namespace belongs to, if any.
    pub fn project(&self) -> Option<&str> {
        self.labels.get(k8s::PROJECT_ID_LABEL)
    }
}

// === impl Topology ===

impl Topology {
    /// Looks up each identifier. Identifiers that name no namespace are
    /// dropped.
    pub fn resolve<N>(lookup: &N, identifiers: &[String]) -> Result<Self>
    where
        N: NamespaceLookup + ?Sized,
    {
        let mut topology = Self::default();
        for id in identifiers {
            let record = lookup.get(id).map_err(|source| Error::Namespace {
                namespace: id.clone(),
                source,
            })?;
            match record {
                None => tracing::trace!(%id, "Ignoring unknown project or namespace"),
                Some(ns) if ns.is_project => {
                    if !topology.projects.contains(&ns.name) {
                        topology.projects.push(ns.name);
                    }
                }
                Some(ns) => {
                    topology.namespaces.insert(ns.name.clone(), ns);
                }
            }
        }
        Ok(topology)
    }

    /// Drops named namespaces that do not belong to `project`.
    pub fn retain_members_of(&mut self, project: &str) {
        self.namespaces.retain(|_, ns| ns.project() == Some(project));
    }

    pub fn namespace_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.namespaces.keys().map(String::as_str)
    }
}

/// Selects the member namespaces of a project.
pub fn members_of(project: &str) -> labels::Selector {
    labels::Selector::from_iter(Some((
        k8s::PROJECT_ID_LABEL.to_string(),
        project.to_string(),
    )))
}

/// Selects namespaces that belong to no project.
pub fn orphans() -> labels::Selector {
    labels::Selector::from_iter(Some(labels::Expression::does_not_exist(
        k8s::PROJECT_ID_LABEL,
    )))
}
