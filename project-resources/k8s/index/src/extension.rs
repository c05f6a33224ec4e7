use parking_lot::RwLock;
use project_resources_k8s_api::{self as k8s, ResourceExt};
use std::sync::Arc;

/// The API server's configuration for authenticating to extension API
/// servers, published in `kube-system/extension-apiserver-authentication`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionConfig {
    /// PEM-encoded CA bundle that signs the API server's client certificates.
    pub client_ca: Option<String>,
    /// JSON-encoded list of common names the API server may present.
    pub allowed_names: Option<String>,
}

/// Tracks the extension configuration ConfigMap.
#[derive(Debug, Default)]
pub struct ExtensionConfigIndex {
    config: Option<ExtensionConfig>,
}

pub type SharedExtensionConfig = Arc<RwLock<ExtensionConfigIndex>>;

// === impl ExtensionConfig ===

impl ExtensionConfig {
    pub fn from_config_map(cm: &k8s::ConfigMap) -> Self {
        let get = |key: &str| cm.data.as_ref().and_then(|d| d.get(key)).cloned();
        Self {
            client_ca: get(k8s::CLIENT_CA_KEY),
            allowed_names: get(k8s::ALLOWED_NAMES_KEY),
        }
    }

    /// Returns true when no allow-list is configured, so that any common name
    /// signed by the client CA is accepted.
    pub fn accepts_any_name(&self) -> bool {
        self.allowed_names.as_deref().unwrap_or_default().is_empty()
    }
}

// === impl ExtensionConfigIndex ===

impl ExtensionConfigIndex {
    pub fn shared() -> SharedExtensionConfig {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Returns the current configuration, if the ConfigMap exists.
    pub fn get(&self) -> Option<ExtensionConfig> {
        self.config.clone()
    }
}

fn is_extension_config(namespace: &str, name: &str) -> bool {
    namespace == k8s::EXTENSION_CONFIG_NAMESPACE && name == k8s::EXTENSION_CONFIG_NAME
}

impl kubert::index::IndexNamespacedResource<k8s::ConfigMap> for ExtensionConfigIndex {
    fn apply(&mut self, cm: k8s::ConfigMap) {
        let namespace = cm.namespace().unwrap_or_default();
        if !is_extension_config(&namespace, &cm.name_unchecked()) {
            return;
        }
        let config = ExtensionConfig::from_config_map(&cm);
        if self.config.as_ref() == Some(&config) {
            return;
        }
        if config.client_ca.is_none() {
            tracing::warn!(key = k8s::CLIENT_CA_KEY, "Extension configuration has no client CA");
        }
        if config.accepts_any_name() {
            tracing::warn!(
                key = k8s::ALLOWED_NAMES_KEY,
                "Extension configuration has no allowed names; accepting any common name"
            );
        }
        self.config = Some(config);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if is_extension_config(&namespace, &name) {
            tracing::warn!(%namespace, %name, "Extension configuration deleted");
            self.config = None;
        }
    }
}
