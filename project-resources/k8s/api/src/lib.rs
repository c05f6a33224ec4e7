#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;

pub use self::labels::{Expression, Labels, Operator, Selector};
pub use k8s_openapi::{
    api::{
        authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec},
        core::v1::{ConfigMap, Namespace},
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::{APIGroup, APIResourceList},
};
pub use kube::{
    api::{Api, ObjectMeta, PostParams, ResourceExt},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};

/// Label carrying the ID of the project a namespace belongs to.
pub const PROJECT_ID_LABEL: &str = "field.cattle.io/projectId";

/// Label set on the namespaces that represent projects themselves.
pub const PARENT_LABEL: &str = "cattle.io/parent";

/// Annotation set on system namespaces backing a project.
pub const PROJECT_NAMESPACE_ANNOTATION: &str = "management.cattle.io/system-namespace";

/// Well-known label that mirrors a namespace's name.
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Namespace and name of the ConfigMap in which the API server publishes its
/// aggregation-layer client CA and allowed common names.
pub const EXTENSION_CONFIG_NAMESPACE: &str = "kube-system";
pub const EXTENSION_CONFIG_NAME: &str = "extension-apiserver-authentication";
pub const CLIENT_CA_KEY: &str = "requestheader-client-ca-file";
pub const ALLOWED_NAMES_KEY: &str = "requestheader-allowed-names";

/// Returns the `apiregistration.k8s.io/v1` APIService resource, which has no
/// generated type.
pub fn api_service_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("apiregistration.k8s.io", "v1", "APIService"),
        "apiservices",
    )
}
