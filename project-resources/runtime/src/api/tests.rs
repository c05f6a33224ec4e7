use super::*;
use crate::{
    core::{
        discovery::DiscoveredResource, fanout::Collector, resource::Snapshot, review::UserInfo,
        Gvr,
    },
    index::{NamespaceIndex, Namespaces, SchemaCache, SchemaMetrics},
    k8s,
};
use http_body_util::BodyExt;
use kubert::index::IndexClusterResource;
use maplit::{btreemap, hashset};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use prometheus_client::registry::Registry;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tower::ServiceExt;

const PREFIX: &str = "/apis/resources.project.cattle.io/v1alpha1";
const TABLE: &str = "application/json;as=Table;v=v1;g=meta.k8s.io";

#[derive(Clone, Debug, PartialEq)]
struct Call {
    namespace: Option<String>,
    accept: String,
    query: String,
}

#[derive(Clone, Default)]
struct FakeLister {
    /// Namespace to resource version and items.
    objects: Arc<BTreeMap<String, (String, Vec<Value>)>>,
    missing: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

#[derive(Clone, Default)]
struct FakeReviewer {
    denied: Arc<HashSet<String>>,
    users: Arc<Mutex<Vec<UserInfo>>>,
}

#[async_trait::async_trait]
impl ListResources for FakeLister {
    async fn list(&self, target: ListTarget<'_>) -> anyhow::Result<Value> {
        self.calls.lock().push(Call {
            namespace: target.namespace.map(Into::into),
            accept: target.format.accept(),
            query: target.query.encode(),
        });
        if self.missing {
            return Err(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "the server could not find the requested resource".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            })
            .into());
        }

        let (resource_version, items) = match target.namespace {
            Some(ns) => self
                .objects
                .get(ns)
                .cloned()
                .unwrap_or_else(|| ("5".to_string(), vec![])),
            None if target.query.get("limit") == Some("1") => ("100".to_string(), vec![]),
            None => (
                "100".to_string(),
                self.objects
                    .values()
                    .flat_map(|(_, items)| items.clone())
                    .collect(),
            ),
        };

        if target.format.is_table() {
            let rows = items
                .into_iter()
                .map(|obj| json!({ "cells": [obj["metadata"]["name"].clone()], "object": obj }))
                .collect::<Vec<_>>();
            return Ok(json!({
                "apiVersion": "meta.k8s.io/v1",
                "kind": "Table",
                "metadata": { "resourceVersion": resource_version },
                "columnDefinitions": [{ "name": "Name", "type": "string" }],
                "rows": rows,
            }));
        }
        Ok(json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "resourceVersion": resource_version },
            "items": items,
        }))
    }
}

#[async_trait::async_trait]
impl ReviewAccess for FakeReviewer {
    async fn can_list(&self, user: &UserInfo, gvr: &Gvr, namespace: &str) -> anyhow::Result<bool> {
        assert_eq!(gvr, &Gvr::new("", "v1", "pods"));
        self.users.lock().push(user.clone());
        Ok(!self.denied.contains(namespace))
    }
}

fn pod(ns: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "namespace": ns, "name": name },
    })
}

fn mk_ns(name: &str, labels: BTreeMap<String, String>) -> k8s::Namespace {
    k8s::Namespace {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Projects p-abcde (ns1, ns2) and p-vwxyz (ns3); ns4 and ns5 belong to no
/// project.
fn namespaces() -> Namespaces {
    let index = NamespaceIndex::shared();
    {
        let mut index = index.write();
        for project in ["p-abcde", "p-vwxyz"] {
            index.apply(mk_ns(
                project,
                btreemap! { k8s::PARENT_LABEL.to_string() => "true".to_string() },
            ));
        }
        for (ns, project) in [("ns1", "p-abcde"), ("ns2", "p-abcde"), ("ns3", "p-vwxyz")] {
            index.apply(mk_ns(
                ns,
                btreemap! { k8s::PROJECT_ID_LABEL.to_string() => project.to_string() },
            ));
        }
        for ns in ["ns4", "ns5"] {
            index.apply(mk_ns(ns, Default::default()));
        }
    }
    Namespaces::new(index)
}

fn lister() -> FakeLister {
    FakeLister {
        objects: Arc::new(btreemap! {
            "ns1".to_string() => ("11".to_string(), vec![pod("ns1", "resource1")]),
            "ns3".to_string() => ("13".to_string(), vec![pod("ns3", "resource3")]),
            "ns4".to_string() => ("14".to_string(), vec![pod("ns4", "resource4")]),
            "ns5".to_string() => ("15".to_string(), vec![pod("ns5", "resource5")]),
        }),
        ..Default::default()
    }
}

fn schema() -> SharedSchema {
    let schema = SchemaCache::shared(SchemaMetrics::default());
    schema.replace(Snapshot::new(vec![
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
    ]));
    schema
}

fn api(
    lister: FakeLister,
    reviewer: FakeReviewer,
    metrics: HttpMetrics,
) -> Api<FakeLister, FakeReviewer, Namespaces> {
    Api::new(
        schema(),
        Collector::new(lister, reviewer),
        namespaces(),
        metrics,
    )
}

fn get(uri: &str) -> http::Request<()> {
    http::Request::get(uri)
        .header("x-remote-user", "alice")
        .header("x-remote-group", "system:authenticated")
        .body(())
        .expect("request must be valid")
}

async fn send(
    api: &Api<FakeLister, FakeReviewer, Namespaces>,
    req: http::Request<()>,
) -> (http::StatusCode, Bytes) {
    let rsp = api.clone().oneshot(req).await.expect("service is infallible");
    let status = rsp.status();
    let body = rsp
        .into_body()
        .collect()
        .await
        .expect("body must be readable")
        .to_bytes();
    (status, body)
}

async fn send_json(
    api: &Api<FakeLister, FakeReviewer, Namespaces>,
    req: http::Request<()>,
) -> Value {
    let (status, body) = send(api, req).await;
    assert_eq!(status, http::StatusCode::OK, "{body:?}");
    serde_json::from_slice(&body).expect("body must be json")
}

fn names(list: &Value) -> Vec<&str> {
    list["items"]
        .as_array()
        .expect("items must be a list")
        .iter()
        .map(|obj| obj["metadata"]["name"].as_str().expect("name must be set"))
        .collect()
}

#[tokio::test]
async fn serves_discovery() {
    let api = api(lister(), Default::default(), Default::default());
    let doc = send_json(&api, get(PREFIX)).await;
    assert_eq!(doc["kind"], "APIResourceList");
    assert_eq!(doc["groupVersion"], "resources.project.cattle.io/v1alpha1");
    let resources = doc["resources"].as_array().expect("resources must be a list");
    assert_eq!(resources[0]["name"], "pods");
    assert_eq!(resources[0]["kind"], "Pod");
    assert_eq!(resources[0]["namespaced"], true);
    assert_eq!(resources[0]["verbs"], json!(["list"]));
    assert_eq!(resources[1]["name"], "apps.deployments");
    assert_eq!(resources[1]["kind"], "apps.Deployment");
}

#[tokio::test]
async fn lists_project_resources() {
    let api = api(lister(), Default::default(), Default::default());
    let list = send_json(&api, get(&format!("{PREFIX}/namespaces/p-abcde/pods"))).await;
    assert_eq!(list["apiVersion"], "v1");
    assert_eq!(list["kind"], "PodList");
    assert_eq!(list["metadata"]["resourceVersion"], "11");
    assert_eq!(names(&list), vec!["resource1"]);
}

#[tokio::test]
async fn other_projects_select_nothing() {
    let lister = lister();
    let api = api(lister.clone(), Default::default(), Default::default());
    let list = send_json(
        &api,
        get(&format!(
            "{PREFIX}/namespaces/p-abcde/pods?fieldSelector=projectsornamespaces%3Dp-vwxyz"
        )),
    )
    .await;
    assert!(names(&list).is_empty());
    assert_eq!(list["metadata"]["resourceVersion"], "100");
    assert_eq!(
        *lister.calls.lock(),
        vec![Call {
            namespace: None,
            accept: "application/json".to_string(),
            query: "limit=1".to_string(),
        }],
        "only the resource version must be fetched"
    );
}

#[tokio::test]
async fn excludes_namespaces_globally() {
    let api = api(lister(), Default::default(), Default::default());
    let list = send_json(
        &api,
        get(&format!(
            "{PREFIX}/pods?fieldSelector=projectsornamespaces!%3Dns1,ns2&limit=500"
        )),
    )
    .await;
    assert_eq!(names(&list), vec!["resource3", "resource4", "resource5"]);
    assert_eq!(list["metadata"]["resourceVersion"], "15");
}

#[tokio::test]
async fn strips_the_selector_before_listing() {
    let lister = lister();
    let api = api(lister.clone(), Default::default(), Default::default());
    send_json(
        &api,
        get(&format!(
            "{PREFIX}/pods?fieldSelector=projectsornamespaces%3Dns1&fieldSelector=status.phase%3DRunning&limit=10"
        )),
    )
    .await;
    assert_eq!(
        *lister.calls.lock(),
        vec![Call {
            namespace: Some("ns1".to_string()),
            accept: "application/json".to_string(),
            query: "fieldSelector=status.phase%3DRunning&limit=10".to_string(),
        }]
    );
}

#[tokio::test]
async fn skips_denied_namespaces() {
    let reviewer = FakeReviewer {
        denied: Arc::new(hashset! { "ns4".to_string() }),
        ..Default::default()
    };
    let api = api(lister(), reviewer.clone(), Default::default());
    let list = send_json(&api, get(&format!("{PREFIX}/namespaces/cattle-unscoped/pods"))).await;
    assert_eq!(names(&list), vec!["resource5"]);
    assert_eq!(list["metadata"]["resourceVersion"], "15");

    let users = reviewer.users.lock();
    assert!(!users.is_empty());
    assert!(users.iter().all(|u| u.user == "alice"
        && u.groups == vec!["system:authenticated".to_string()]));
}

#[tokio::test]
async fn merges_tables() {
    let lister = lister();
    let api = api(lister.clone(), Default::default(), Default::default());
    let mut req = get(&format!("{PREFIX}/pods?fieldSelector=projectsornamespaces%3Dp-abcde,ns4"));
    req.headers_mut().insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static(TABLE),
    );
    let table = send_json(&api, req).await;
    assert_eq!(table["apiVersion"], "meta.k8s.io/v1");
    assert_eq!(table["kind"], "Table");
    assert_eq!(table["metadata"]["resourceVersion"], "14");
    assert_eq!(table["columnDefinitions"][0]["name"], "Name");
    let rows = table["rows"].as_array().expect("rows must be a list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["cells"], json!(["resource1"]));
    assert_eq!(rows[1]["cells"], json!(["resource4"]));

    let calls = lister.calls.lock();
    let ns1 = calls
        .iter()
        .find(|c| c.namespace.as_deref() == Some("ns1"))
        .expect("ns1 must be listed");
    assert_eq!(ns1.accept, TABLE);
    assert_eq!(ns1.query, "includeObject=Object");
}

#[tokio::test]
async fn forwards_unscoped_lists() {
    let lister = lister();
    let api = api(lister.clone(), Default::default(), Default::default());
    let list = send_json(&api, get(&format!("{PREFIX}/pods?limit=5"))).await;
    assert_eq!(
        names(&list),
        vec!["resource1", "resource3", "resource4", "resource5"]
    );
    assert_eq!(
        *lister.calls.lock(),
        vec![Call {
            namespace: None,
            accept: "application/json".to_string(),
            query: "limit=5".to_string(),
        }]
    );
}

#[tokio::test]
async fn forwarded_denials_are_empty() {
    let reviewer = FakeReviewer {
        denied: Arc::new(hashset! { String::new() }),
        ..Default::default()
    };
    let api = api(lister(), reviewer, Default::default());
    let list = send_json(&api, get(&format!("{PREFIX}/pods"))).await;
    assert_eq!(list["kind"], "PodList");
    assert_eq!(list["apiVersion"], "v1");
    assert_eq!(list["metadata"]["resourceVersion"], "100");
    assert!(names(&list).is_empty());
}

#[tokio::test]
async fn forwards_upstream_not_found() {
    let lister = FakeLister {
        missing: true,
        ..lister()
    };
    let api = api(lister, Default::default(), Default::default());
    let (status, _) = send(&api, get(&format!("{PREFIX}/pods"))).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn holds_forwarded_watches_open() {
    let lister = lister();
    let api = api(lister.clone(), Default::default(), Default::default());
    let rsp = api
        .clone()
        .oneshot(get(&format!("{PREFIX}/pods?watch=true")))
        .await
        .expect("service is infallible");
    assert_eq!(rsp.status(), http::StatusCode::OK);

    let mut body = rsp.into_body();
    assert!(
        futures::FutureExt::now_or_never(body.frame()).is_none(),
        "watch must not produce events"
    );
    assert!(lister.calls.lock().is_empty());
}

#[tokio::test]
async fn rejects_invalid_requests() {
    let api = api(lister(), Default::default(), Default::default());

    for (uri, status) in [
        (format!("{PREFIX}/apps.widgets"), http::StatusCode::NOT_FOUND),
        (format!("{PREFIX}/deployments"), http::StatusCode::NOT_FOUND),
        (format!("{PREFIX}/namespaces/p-abcde"), http::StatusCode::NOT_FOUND),
        ("/apis/apps/v1/deployments".to_string(), http::StatusCode::NOT_FOUND),
        (
            format!("{PREFIX}/pods?fieldSelector=projectsornamespaces%3Dns1&watch=true"),
            http::StatusCode::BAD_REQUEST,
        ),
        (
            format!("{PREFIX}/namespaces/p-abcde/pods?limit=many"),
            http::StatusCode::BAD_REQUEST,
        ),
    ] {
        let (actual, body) = send(&api, get(&uri)).await;
        assert_eq!(actual, status, "{uri}: {body:?}");
    }

    let mut req = get(&format!("{PREFIX}/namespaces/p-abcde/pods"));
    req.headers_mut().insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("application/yaml"),
    );
    let (status, _) = send(&api, req).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);

    let mut req = get(&format!("{PREFIX}/pods"));
    *req.method_mut() = http::Method::DELETE;
    let (status, _) = send(&api, req).await;
    assert_eq!(status, http::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn records_request_metrics() {
    let mut prom = Registry::default();
    let metrics = HttpMetrics::register(prom.sub_registry_with_prefix("http"));
    let api = api(lister(), Default::default(), metrics);

    send_json(&api, get(&format!("{PREFIX}/namespaces/p-abcde/pods"))).await;
    send(&api, get(&format!("{PREFIX}/namespaces/p-abcde/widgets"))).await;

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).expect("metrics must encode");
    assert!(
        text.contains(r#"http_requests_total{route="scoped",status="200"} 1"#),
        "{text}"
    );
    assert!(
        text.contains(r#"http_requests_total{route="scoped",status="404"} 1"#),
        "{text}"
    );
}

#[test]
fn routes() {
    let route = |uri: &str| Route::new(&uri.parse().expect("uri must be valid"));

    assert_eq!(route(PREFIX), Route::Discovery);
    assert_eq!(route(&format!("{PREFIX}/")), Route::Discovery);
    assert_eq!(
        route(&format!("{PREFIX}/apps.deployments")),
        Route::Forward {
            resource: "apps.deployments".to_string()
        }
    );
    assert_eq!(
        route(&format!(
            "{PREFIX}/apps.deployments?fieldSelector=projectsornamespaces!%3Dp-abcde"
        )),
        Route::Global {
            resource: "apps.deployments".to_string(),
            selector: SelectorQuery::parse("projectsornamespaces!=p-abcde")
                .expect("selector must parse"),
        }
    );
    assert_eq!(
        route(&format!("{PREFIX}/namespaces/cattle-unscoped/pods")),
        Route::Unscoped {
            resource: "pods".to_string(),
            selector: None,
        }
    );
    assert_eq!(
        route(&format!("{PREFIX}/namespaces/p-abcde/pods")),
        Route::Scoped {
            project: "p-abcde".to_string(),
            resource: "pods".to_string(),
            selector: None,
        }
    );
    assert_eq!(route(&format!("{PREFIX}v2")), Route::NotFound);
    assert_eq!(route(&format!("{PREFIX}/namespaces//pods")), Route::NotFound);
    assert_eq!(route(&format!("{PREFIX}/pods/extra")), Route::NotFound);
}
