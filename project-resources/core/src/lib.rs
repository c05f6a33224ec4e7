#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod discovery;
mod error;
pub mod fanout;
pub mod list;
pub mod negotiate;
pub mod resource;
pub mod review;
pub mod scope;
pub mod selector;
pub mod topology;


pub use self::{
    error::{Error, Result},
    negotiate::Format,
    resource::{Gvr, ResourceDescriptor},
    review::UserInfo,
    selector::{ListQuery, SelectorQuery},
    topology::{NamespaceRecord, Topology},
};

/// The API group served by the aggregation layer.
pub const GROUP: &str = "resources.project.cattle.io";

/// The only version of [`GROUP`].
pub const VERSION: &str = "v1alpha1";

/// [`GROUP`] and [`VERSION`] joined, as used in `apiVersion` fields.
pub const GROUP_VERSION: &str = "resources.project.cattle.io/v1alpha1";

/// Pseudo-namespace under which resources of namespaces without a project
/// are listed.
pub const UNSCOPED_NAMESPACE: &str = "cattle-unscoped";
