//! Caches of cluster state consulted while serving requests.
//!
//! Each cache is written only by the watch that feeds it:
//!
//! - [`NamespaceIndex`] holds the labels and project markers of every
//!   namespace, fed by a kubert index over a Namespace watch.
//! - [`ExtensionConfigIndex`] holds the API server's aggregation-layer client
//!   CA and allowed names.
//! - [`SchemaCache`] holds the resource kinds served by the aggregated API and
//!   is refreshed from discovery when CRDs or APIServices change.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod extension;
pub mod namespace;
pub mod schema;

pub use self::{
    extension::{ExtensionConfig, ExtensionConfigIndex, SharedExtensionConfig},
    namespace::{NamespaceIndex, Namespaces, SharedNamespaceIndex},
    schema::{SchemaCache, SchemaMetrics, SharedSchema},
};
