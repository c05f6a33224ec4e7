//! Cluster-backed implementations of the core collaborator traits.

use crate::{
    core::{
        discovery::{DiscoverResources, DiscoveredResource},
        list::{ListResources, ListTarget},
        review::{ReviewAccess, UserInfo},
        Gvr, GROUP,
    },
    k8s,
};
use futures::future;
use serde_json::Value;
use tracing::warn;

/// Lists resources with raw requests so that tables pass through untouched.
#[derive(Clone)]
pub struct Lister(k8s::Client);

/// Reviews access with SubjectAccessReviews.
#[derive(Clone)]
pub struct Reviewer(k8s::Client);

/// Discovers the preferred version of every listable resource.
#[derive(Clone)]
pub struct Discover(k8s::Client);

// === impl Lister ===

impl Lister {
    pub fn new(client: k8s::Client) -> Self {
        Self(client)
    }
}

#[async_trait::async_trait]
impl ListResources for Lister {
    async fn list(&self, target: ListTarget<'_>) -> anyhow::Result<Value> {
        let req = http::Request::get(list_uri(&target))
            .header(http::header::ACCEPT, target.format.accept())
            .body(Vec::new())?;
        let body = self.0.request::<Value>(req).await?;
        Ok(body)
    }
}

fn list_uri(target: &ListTarget<'_>) -> String {
    let gvr = target.gvr;
    let mut uri = if gvr.group.is_empty() {
        format!("/api/{}", gvr.version)
    } else {
        format!("/apis/{}/{}", gvr.group, gvr.version)
    };
    if let Some(ns) = target.namespace {
        uri.push_str("/namespaces/");
        uri.push_str(ns);
    }
    uri.push('/');
    uri.push_str(&gvr.resource);

    let query = target.query.encode();
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query);
    }
    uri
}

/// Returns true if an error returned by a collaborator is an API server
/// "not found" response.
pub(crate) fn is_not_found(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(rsp)) if rsp.code == 404
    )
}

// === impl Reviewer ===

impl Reviewer {
    pub fn new(client: k8s::Client) -> Self {
        Self(client)
    }
}

#[async_trait::async_trait]
impl ReviewAccess for Reviewer {
    async fn can_list(
        &self,
        user: &UserInfo,
        gvr: &Gvr,
        namespace: &str,
    ) -> anyhow::Result<bool> {
        let review = subject_access_review(user, gvr, namespace);
        let api = k8s::Api::<k8s::SubjectAccessReview>::all(self.0.clone());
        let review = api.create(&k8s::PostParams::default(), &review).await?;
        Ok(review.status.is_some_and(|s| s.allowed))
    }
}

fn subject_access_review(user: &UserInfo, gvr: &Gvr, namespace: &str) -> k8s::SubjectAccessReview {
    k8s::SubjectAccessReview {
        spec: k8s::SubjectAccessReviewSpec {
            user: Some(user.user.clone()),
            groups: Some(user.groups.clone()),
            extra: Some(user.extra.clone()),
            resource_attributes: Some(k8s::ResourceAttributes {
                verb: Some("list".to_string()),
                group: Some(gvr.group.clone()),
                resource: Some(gvr.resource.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

// === impl Discover ===

impl Discover {
    pub fn new(client: k8s::Client) -> Self {
        Self(client)
    }
}

impl Discover {
    async fn group_resources(
        &self,
        group: &str,
        version: &str,
    ) -> kube::Result<k8s::APIResourceList> {
        if group.is_empty() {
            self.0.list_core_api_resources(version).await
        } else {
            self.0
                .list_api_group_resources(&format!("{group}/{version}"))
                .await
        }
    }
}

#[async_trait::async_trait]
impl DiscoverResources for Discover {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredResource>> {
        let mut targets = Vec::new();
        let core = self.0.list_core_api_versions().await?;
        if let Some(version) = core.versions.into_iter().next() {
            targets.push((String::new(), version));
        }
        for group in self.0.list_api_groups().await?.groups {
            // The aggregated group may itself be unavailable while this runs.
            if group.name == GROUP {
                continue;
            }
            if let Some(version) = preferred_version(&group) {
                targets.push((group.name, version));
            }
        }

        let lists = future::join_all(
            targets
                .iter()
                .map(|(group, version)| self.group_resources(group, version)),
        )
        .await;

        let mut resources = Vec::new();
        for ((group, version), res) in targets.into_iter().zip(lists) {
            match res {
                Ok(list) => resources.extend(listable(&group, &version, list)),
                Err(error) => warn!(%error, %group, %version, "Skipping unavailable API group"),
            }
        }
        Ok(resources)
    }
}

fn preferred_version(group: &k8s::APIGroup) -> Option<String> {
    group
        .preferred_version
        .as_ref()
        .or_else(|| group.versions.first())
        .map(|gv| gv.version.clone())
}

/// Namespaced top-level resources that support `list`.
fn listable(
    group: &str,
    version: &str,
    list: k8s::APIResourceList,
) -> Vec<DiscoveredResource> {
    list.resources
        .into_iter()
        .filter(|r| r.namespaced && !r.name.contains('/'))
        .filter(|r| r.verbs.iter().any(|v| v == "list"))
        .map(move |r| DiscoveredResource {
            group: group.to_string(),
            version: version.to_string(),
            resource: r.name,
            kind: r.kind,
            namespaced: r.namespaced,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{negotiate::Format, selector::ListQuery};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn list_uris() {
        let pods = Gvr::new("", "v1", "pods");
        let query = ListQuery::new(vec![
            ("limit".to_string(), "10".to_string()),
            ("labelSelector".to_string(), "app=web".to_string()),
        ])
        .expect("query must be valid");
        let target = ListTarget {
            gvr: &pods,
            namespace: Some("ns1"),
            query: &query,
            format: &Format::Json,
        };
        assert_eq!(
            list_uri(&target),
            "/api/v1/namespaces/ns1/pods?limit=10&labelSelector=app%3Dweb"
        );

        let roles = Gvr::new("rbac.authorization.k8s.io", "v1", "roles");
        let empty = ListQuery::new(vec![]).expect("query must be valid");
        let target = ListTarget {
            gvr: &roles,
            namespace: None,
            query: &empty,
            format: &Format::Json,
        };
        assert_eq!(list_uri(&target), "/apis/rbac.authorization.k8s.io/v1/roles");
    }

    #[test]
    fn reviews_list_access() {
        let user = UserInfo {
            user: "alice".to_string(),
            groups: vec!["system:authenticated".to_string()],
            extra: btreemap! { "scopes".to_string() => vec!["view".to_string()] },
        };
        let review =
            subject_access_review(&user, &Gvr::new("apps", "v1", "deployments"), "ns1");
        assert_eq!(review.spec.user.as_deref(), Some("alice"));
        assert_eq!(
            review.spec.groups,
            Some(vec!["system:authenticated".to_string()])
        );
        let attrs = review
            .spec
            .resource_attributes
            .expect("resource attributes must be set");
        assert_eq!(attrs.verb.as_deref(), Some("list"));
        assert_eq!(attrs.group.as_deref(), Some("apps"));
        assert_eq!(attrs.resource.as_deref(), Some("deployments"));
        assert_eq!(attrs.namespace.as_deref(), Some("ns1"));
        assert_eq!(attrs.version, None);
    }

    #[test]
    fn detects_not_found() {
        let err = anyhow::Error::new(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the server could not find the requested resource".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }));
        assert!(is_not_found(&err));
        assert!(!is_not_found(&anyhow::anyhow!("connection refused")));
    }

    /// Serves the discovery endpoints of a cluster whose metrics API is down.
    fn discovery_client() -> (k8s::Client, Arc<parking_lot::Mutex<Vec<String>>>) {
        let paths = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = paths.clone();
        let svc = tower::service_fn(move |req: http::Request<kube::client::Body>| {
            let path = req.uri().path().to_string();
            seen.lock().push(path.clone());
            let (status, body) = match path.as_str() {
                "/api" => (
                    http::StatusCode::OK,
                    json!({
                        "kind": "APIVersions",
                        "versions": ["v1"],
                        "serverAddressByClientCIDRs": [],
                    }),
                ),
                "/apis" => (
                    http::StatusCode::OK,
                    json!({
                        "kind": "APIGroupList",
                        "apiVersion": "v1",
                        "groups": [
                            api_group("apps", &["v1"]),
                            api_group("metrics.k8s.io", &["v1beta1"]),
                            api_group(GROUP, &["v1alpha1"]),
                        ],
                    }),
                ),
                "/api/v1" => (
                    http::StatusCode::OK,
                    resource_list(
                        "v1",
                        json!([
                            api_resource("pods", "Pod", true, &["get", "list", "watch"]),
                            api_resource("pods/log", "Pod", true, &["get"]),
                            api_resource("namespaces", "Namespace", false, &["get", "list"]),
                            api_resource("bindings", "Binding", true, &["create"]),
                        ]),
                    ),
                ),
                "/apis/apps/v1" => (
                    http::StatusCode::OK,
                    resource_list(
                        "apps/v1",
                        json!([
                            api_resource("deployments", "Deployment", true, &["get", "list"]),
                            api_resource("deployments/scale", "Scale", true, &["get", "update"]),
                        ]),
                    ),
                ),
                "/apis/metrics.k8s.io/v1beta1" => (
                    http::StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "message": "service unavailable",
                        "reason": "ServiceUnavailable",
                        "code": 503,
                    }),
                ),
                _ => (
                    http::StatusCode::NOT_FOUND,
                    json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "message": "not found",
                        "reason": "NotFound",
                        "code": 404,
                    }),
                ),
            };
            let rsp = http::Response::builder()
                .status(status)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(kube::client::Body::from(body.to_string().into_bytes()))
                .expect("response must be valid");
            future::ok::<_, std::convert::Infallible>(rsp)
        });
        (kube::Client::new(svc, "default"), paths)
    }

    fn api_group(name: &str, versions: &[&str]) -> Value {
        let versions = versions
            .iter()
            .map(|v| json!({ "groupVersion": format!("{name}/{v}"), "version": v }))
            .collect::<Vec<_>>();
        json!({
            "name": name,
            "preferredVersion": versions[0].clone(),
            "versions": versions,
        })
    }

    fn resource_list(group_version: &str, resources: Value) -> Value {
        json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": group_version,
            "resources": resources,
        })
    }

    fn api_resource(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Value {
        json!({
            "name": name,
            "singularName": "",
            "namespaced": namespaced,
            "kind": kind,
            "verbs": verbs,
        })
    }

    #[tokio::test]
    async fn discovers_around_unavailable_groups() {
        let (client, paths) = discovery_client();
        let resources = Discover::new(client)
            .discover()
            .await
            .expect("an unavailable group must not fail discovery");
        assert_eq!(
            resources,
            vec![
                DiscoveredResource {
                    group: String::new(),
                    version: "v1".to_string(),
                    resource: "pods".to_string(),
                    kind: "Pod".to_string(),
                    namespaced: true,
                },
                DiscoveredResource {
                    group: "apps".to_string(),
                    version: "v1".to_string(),
                    resource: "deployments".to_string(),
                    kind: "Deployment".to_string(),
                    namespaced: true,
                },
            ]
        );

        let paths = paths.lock();
        assert!(paths.iter().any(|p| p == "/apis/metrics.k8s.io/v1beta1"));
        assert!(
            !paths.iter().any(|p| p.starts_with(&format!("/apis/{GROUP}"))),
            "{paths:?}"
        );
    }

    #[test]
    fn prefers_the_preferred_version() {
        let group = serde_json::from_value::<k8s::APIGroup>(json!({
            "name": "autoscaling",
            "preferredVersion": { "groupVersion": "autoscaling/v2", "version": "v2" },
            "versions": [
                { "groupVersion": "autoscaling/v1", "version": "v1" },
                { "groupVersion": "autoscaling/v2", "version": "v2" },
            ],
        }))
        .expect("group must parse");
        assert_eq!(preferred_version(&group).as_deref(), Some("v2"));

        let group = serde_json::from_value::<k8s::APIGroup>(json!({
            "name": "batch",
            "versions": [{ "groupVersion": "batch/v1", "version": "v1" }],
        }))
        .expect("group must parse");
        assert_eq!(preferred_version(&group).as_deref(), Some("v1"));
    }
}
