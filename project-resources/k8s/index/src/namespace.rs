use parking_lot::RwLock;
use project_resources_core::topology::{NamespaceLookup, NamespaceRecord};
use project_resources_k8s_api::{self as k8s, labels, ResourceExt};
use std::{collections::HashMap, sync::Arc};

/// Holds the labels of every namespace in the cluster.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    by_name: HashMap<String, NamespaceRecord>,
}

pub type SharedNamespaceIndex = Arc<RwLock<NamespaceIndex>>;

/// Reads namespaces from a shared index.
#[derive(Clone, Debug, Default)]
pub struct Namespaces(SharedNamespaceIndex);

// === impl NamespaceIndex ===

impl NamespaceIndex {
    pub fn shared() -> SharedNamespaceIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn record(ns: &k8s::Namespace) -> NamespaceRecord {
    let name = ns.name_unchecked();
    let mut map = ns.labels().clone();
    // The API server sets this label on every namespace; older clusters may
    // not, and name selectors depend on it.
    map.entry(k8s::NAMESPACE_NAME_LABEL.to_string())
        .or_insert_with(|| name.clone());
    let annotated = ns
        .annotations()
        .contains_key(k8s::PROJECT_NAMESPACE_ANNOTATION);
    NamespaceRecord::new(name, map.into(), annotated)
}

impl kubert::index::IndexClusterResource<k8s::Namespace> for NamespaceIndex {
    fn apply(&mut self, ns: k8s::Namespace) {
        let record = record(&ns);
        tracing::trace!(name = %record.name, project = ?record.project(), "Applying namespace");
        self.by_name.insert(record.name.clone(), record);
    }

    fn delete(&mut self, name: String) {
        tracing::trace!(%name, "Deleting namespace");
        self.by_name.remove(&name);
    }
}

// === impl Namespaces ===

impl Namespaces {
    pub fn new(index: SharedNamespaceIndex) -> Self {
        Self(index)
    }

    pub fn index(&self) -> SharedNamespaceIndex {
        self.0.clone()
    }
}

impl NamespaceLookup for Namespaces {
    fn get(&self, name: &str) -> anyhow::Result<Option<NamespaceRecord>> {
        Ok(self.0.read().by_name.get(name).cloned())
    }

    fn list(&self, selector: &labels::Selector) -> anyhow::Result<Vec<NamespaceRecord>> {
        let index = self.0.read();
        let mut namespaces = index
            .by_name
            .values()
            .filter(|ns| selector.matches(&ns.labels))
            .cloned()
            .collect::<Vec<_>>();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }
}
