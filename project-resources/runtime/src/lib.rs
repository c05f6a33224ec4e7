//! Serves the project-scoped resource aggregation API.
//!
//! The HTTPS server is registered with the cluster's aggregation layer as
//! `resources.project.cattle.io/v1alpha1`. It authenticates the API server by
//! its client certificate and answers list requests by fanning them out over
//! the namespaces of a project.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
mod args;
mod authn;
mod client;
mod metrics;
mod server;
mod tls;

pub use self::{
    api::{Api, Body},
    args::Args,
    authn::{authenticate, AuthError, Authenticate, AuthenticateLayer},
    client::{Discover, Lister, Reviewer},
    metrics::HttpMetrics,
    server::{serve, PeerCertificates},
};
pub use project_resources_core as core;
pub use project_resources_k8s_api as k8s;
pub use project_resources_k8s_index as index;
