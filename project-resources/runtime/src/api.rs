//! Serves the `resources.project.cattle.io/v1alpha1` aggregated API.
//!
//! ```text
//! GET /apis/resources.project.cattle.io/v1alpha1                                  discovery
//! GET /apis/resources.project.cattle.io/v1alpha1/{resource}                       forward
//! GET /apis/resources.project.cattle.io/v1alpha1/{resource}?fieldSelector=...     global
//! GET /apis/resources.project.cattle.io/v1alpha1/namespaces/cattle-unscoped/{resource}
//! GET /apis/resources.project.cattle.io/v1alpha1/namespaces/{project}/{resource}
//! ```
//!
//! Resources are named `{group}.{resource}`, or just `{resource}` in the core
//! group.

use crate::{
    client,
    core::{
        discovery,
        fanout::{Collector, ListRequest},
        list::{self, ListResources, ListResponse, ListTarget},
        negotiate::Format,
        review::ReviewAccess,
        scope::{self, Namespaces},
        selector::{self, ListQuery, SelectorQuery},
        topology::NamespaceLookup,
        Error, Result, UserInfo, GROUP_VERSION, UNSCOPED_NAMESPACE,
    },
    index::SharedSchema,
    metrics::HttpMetrics,
};
use bytes::Bytes;
use futures::future;
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::Frame;
use serde_json::Value;
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, info_span, trace, warn, Instrument};

#[cfg(test)]
mod tests;

pub type Body = BoxBody<Bytes, Infallible>;

#[derive(Clone)]
pub struct Api<L, R, N> {
    inner: Arc<Inner<L, R, N>>,
}

struct Inner<L, R, N> {
    schema: SharedSchema,
    collector: Collector<L, R>,
    namespaces: N,
    metrics: HttpMetrics,
}

#[derive(Debug, PartialEq)]
enum Route {
    Discovery,
    Forward {
        resource: String,
    },
    Global {
        resource: String,
        selector: SelectorQuery,
    },
    Unscoped {
        resource: String,
        selector: Option<SelectorQuery>,
    },
    Scoped {
        project: String,
        resource: String,
        selector: Option<SelectorQuery>,
    },
    NotFound,
}

// === impl Api ===

impl<L, R, N> Api<L, R, N>
where
    L: ListResources + Clone + 'static,
    R: ReviewAccess + Clone + 'static,
    N: NamespaceLookup + 'static,
{
    pub fn new(
        schema: SharedSchema,
        collector: Collector<L, R>,
        namespaces: N,
        metrics: HttpMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                collector,
                namespaces,
                metrics,
            }),
        }
    }
}

impl<L, R, N, B> tower::Service<http::Request<B>> for Api<L, R, N>
where
    L: ListResources + Clone + 'static,
    R: ReviewAccess + Clone + 'static,
    N: NamespaceLookup + 'static,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<http::Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let (parts, _) = req.into_parts();
        trace!(method = %parts.method, uri = %parts.uri, "Handling request");

        let route = Route::new(&parts.uri);
        let observer = self.inner.metrics.start(route.name());
        if matches!(route, Route::NotFound) {
            let rsp = text_response(http::StatusCode::NOT_FOUND, "404 page not found");
            observer.end(rsp.status());
            return Box::pin(future::ok(rsp));
        }
        if parts.method != http::Method::GET {
            let rsp = text_response(
                http::StatusCode::METHOD_NOT_ALLOWED,
                "405 method not allowed",
            );
            observer.end(rsp.status());
            return Box::pin(future::ok(rsp));
        }

        let inner = self.inner.clone();
        let span = info_span!("request", route = route.name());
        Box::pin(
            async move {
                let rsp = match inner.handle(route, &parts).await {
                    Ok(rsp) => rsp,
                    Err(error) => error_response(error),
                };
                observer.end(rsp.status());
                Ok(rsp)
            }
            .instrument(span),
        )
    }
}

// === impl Inner ===

impl<L, R, N> Inner<L, R, N>
where
    L: ListResources + Clone + 'static,
    R: ReviewAccess + Clone + 'static,
    N: NamespaceLookup + 'static,
{
    async fn handle(
        &self,
        route: Route,
        parts: &http::request::Parts,
    ) -> Result<http::Response<Body>> {
        match route {
            Route::Discovery => {
                let resources = self.schema.list();
                Ok(json_response(discovery::document(&resources)))
            }

            Route::Forward { resource } => self.forward(&resource, parts).await,

            Route::Global { resource, selector } => {
                let request = self.list_request(&resource, parts)?;
                let namespaces = scope::global(&self.namespaces, &selector)?;
                self.collect(request, namespaces).await
            }

            Route::Unscoped { resource, selector } => {
                let request = self.list_request(&resource, parts)?;
                let namespaces = scope::unscoped(&self.namespaces, selector.as_ref())?;
                self.collect(request, namespaces).await
            }

            Route::Scoped {
                project,
                resource,
                selector,
            } => {
                let request = self.list_request(&resource, parts)?;
                let namespaces = scope::scoped(&self.namespaces, &project, selector.as_ref())?;
                self.collect(request, namespaces).await
            }

            Route::NotFound => Err(Error::NotFound(parts.uri.path().to_string())),
        }
    }

    /// Validates a fan-out request before any namespace is resolved.
    fn list_request(&self, resource: &str, parts: &http::request::Parts) -> Result<ListRequest> {
        let gvr = self.schema.gvr_from_path(resource)?;
        let kind = self.schema.kind_for(&gvr)?;
        let format = Format::negotiate(accept(parts))?;
        let params = selector::strip(selector::decode(parts.uri.query()));
        let query = ListQuery::new(params)?;
        if query.is_watch() {
            return Err(Error::UnsupportedAction);
        }
        Ok(ListRequest {
            gvr,
            kind,
            user: UserInfo::from_headers(&parts.headers),
            format,
            query,
        })
    }

    async fn collect(
        &self,
        request: ListRequest,
        namespaces: Namespaces,
    ) -> Result<http::Response<Body>> {
        debug!(resource = %request.gvr, namespaces = namespaces.len(), "Listing");
        let rsp = self.collector.collect(Arc::new(request), namespaces).await?;
        Ok(json_response(rsp.into_json()))
    }

    /// Lists a resource across the cluster on behalf of the user.
    async fn forward(
        &self,
        resource: &str,
        parts: &http::request::Parts,
    ) -> Result<http::Response<Body>> {
        let gvr = self.schema.gvr_from_path(resource)?;
        let kind = self.schema.kind_for(&gvr)?;
        let format = Format::negotiate(accept(parts))?;
        let mut query = ListQuery::new(selector::decode(parts.uri.query()))?;
        let user = UserInfo::from_headers(&parts.headers);

        let lister = self.collector.lister();
        let allowed = self
            .collector
            .reviewer()
            .can_list(&user, &gvr, "")
            .await
            .map_err(|source| Error::Review {
                resource: gvr.resource.clone(),
                namespace: String::new(),
                source,
            })?;
        if !allowed {
            debug!(user = %user.user, resource = %gvr, "Access denied");
            let resource_version = list::current_resource_version(lister, &gvr).await?;
            let rsp = ListResponse::empty(&gvr, &kind, resource_version);
            return Ok(json_response(rsp.into_json()));
        }

        if query.is_watch() {
            // The API server's controllers watch every resource they discover.
            // They already observe the underlying resources directly, so the
            // watch is held open without ever producing events.
            debug!(resource = %gvr, "Holding watch open");
            return Ok(watch_response());
        }

        format.apply(&mut query);
        let target = ListTarget {
            gvr: &gvr,
            namespace: None,
            query: &query,
            format: &format,
        };
        match lister.list(target).await {
            Ok(body) => Ok(json_response(body)),
            Err(error) if client::is_not_found(&error) => Err(Error::NotFound(error.to_string())),
            Err(source) => Err(Error::List {
                resource: gvr.resource.clone(),
                namespace: String::new(),
                source,
            }),
        }
    }
}

// === impl Route ===

impl Route {
    fn new(uri: &http::Uri) -> Self {
        let Some(rest) = uri
            .path()
            .strip_prefix("/apis/")
            .and_then(|p| p.strip_prefix(GROUP_VERSION))
        else {
            return Self::NotFound;
        };
        let rest = match rest {
            "" | "/" => return Self::Discovery,
            rest => match rest.strip_prefix('/') {
                Some(rest) => rest,
                None => return Self::NotFound,
            },
        };

        let selector = SelectorQuery::find(&selector::decode(uri.query()));
        let segments = rest.split('/').collect::<Vec<_>>();
        match segments[..] {
            [resource] if !resource.is_empty() => match selector {
                Some(selector) => Self::Global {
                    resource: resource.to_string(),
                    selector,
                },
                None => Self::Forward {
                    resource: resource.to_string(),
                },
            },
            ["namespaces", UNSCOPED_NAMESPACE, resource] if !resource.is_empty() => {
                Self::Unscoped {
                    resource: resource.to_string(),
                    selector,
                }
            }
            ["namespaces", project, resource] if !project.is_empty() && !resource.is_empty() => {
                Self::Scoped {
                    project: project.to_string(),
                    resource: resource.to_string(),
                    selector,
                }
            }
            _ => Self::NotFound,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Forward { .. } => "forward",
            Self::Global { .. } => "global",
            Self::Unscoped { .. } => "unscoped",
            Self::Scoped { .. } => "scoped",
            Self::NotFound => "unknown",
        }
    }
}

fn accept(parts: &http::request::Parts) -> Option<&str> {
    parts
        .headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
}

fn json_response(body: Value) -> http::Response<Body> {
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())).boxed())
        .expect("json response must be valid")
}

/// A response that stays open until the client goes away.
fn watch_response() -> http::Response<Body> {
    let events = futures::stream::pending::<Result<Frame<Bytes>, Infallible>>();
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(StreamBody::new(events).boxed())
        .expect("watch response must be valid")
}

pub(crate) fn text_response(
    status: http::StatusCode,
    msg: impl std::fmt::Display,
) -> http::Response<Body> {
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("x-content-type-options", "nosniff")
        .body(Full::new(Bytes::from(format!("{msg}\n"))).boxed())
        .expect("error response must be valid")
}

fn error_response(error: Error) -> http::Response<Body> {
    if error.is_client_error() {
        debug!(%error, "Rejected request");
    } else {
        warn!(%error, "Request failed");
    }
    text_response(error.status(), &error)
}
