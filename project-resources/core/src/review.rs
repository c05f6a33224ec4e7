use crate::Gvr;
use http::HeaderMap;
use std::collections::BTreeMap;

const USER_HEADER: &str = "x-remote-user";
const GROUP_HEADER: &str = "x-remote-group";
const EXTRA_HEADER_PREFIX: &str = "x-remote-extra-";

/// The identity of the end user, as asserted by the aggregating API server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub user: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Checks whether a user may list a resource in a namespace.
///
/// An empty namespace asks about all namespaces. Errors indicate that the
/// review could not be performed, not that access was denied.
#[async_trait::async_trait]
pub trait ReviewAccess: Send + Sync {
    async fn can_list(&self, user: &UserInfo, gvr: &Gvr, namespace: &str)
        -> anyhow::Result<bool>;
}

// === impl UserInfo ===

impl UserInfo {
    /// Reads the user from `X-Remote-*` request headers.
    ///
    /// Extra keys are lowercased and percent-decoded.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user = headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let groups = headers
            .get_all(GROUP_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(ToString::to_string)
            .collect();

        let mut extra = BTreeMap::<String, Vec<String>>::new();
        for (name, value) in headers {
            let Some(key) = name.as_str().strip_prefix(EXTRA_HEADER_PREFIX) else {
                continue;
            };
            let Ok(value) = value.to_str() else {
                tracing::debug!(header = %name, "Ignoring non-ASCII extra header");
                continue;
            };
            let key = percent_encoding::percent_decode_str(key)
                .decode_utf8_lossy()
                .to_lowercase();
            extra.entry(key).or_default().push(value.to_string());
        }

        Self {
            user,
            groups,
            extra,
        }
    }
}
