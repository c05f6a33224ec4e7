use crate::{negotiate::Format, selector::ListQuery, Error, Gvr, Result};
use serde_json::{json, Value};
use std::cmp::Ordering;

const TABLE_API_VERSION: &str = "meta.k8s.io/v1";

/// Where and how to list a resource.
#[derive(Copy, Clone, Debug)]
pub struct ListTarget<'a> {
    pub gvr: &'a Gvr,
    /// Lists across all namespaces when unset.
    pub namespace: Option<&'a str>,
    pub query: &'a ListQuery,
    pub format: &'a Format,
}

/// Lists resources from the cluster, returning the raw response body.
#[async_trait::async_trait]
pub trait ListResources: Send + Sync {
    async fn list(&self, target: ListTarget<'_>) -> anyhow::Result<Value>;
}

/// One namespace's list response.
#[derive(Clone, Debug, PartialEq)]
pub enum PartialList {
    Items {
        resource_version: String,
        items: Vec<Value>,
    },
    Table {
        resource_version: String,
        column_definitions: Vec<Value>,
        rows: Vec<Value>,
    },
}

/// A merged list response.
#[derive(Clone, Debug, PartialEq)]
pub enum ListResponse {
    Items {
        api_version: String,
        kind: String,
        resource_version: String,
        items: Vec<Value>,
    },
    Table {
        resource_version: String,
        column_definitions: Vec<Value>,
        rows: Vec<Value>,
    },
}

// === impl PartialList ===

impl PartialList {
    /// Parses a list body. Bodies carrying `columnDefinitions` are tables.
    pub fn from_value(mut body: Value) -> Self {
        let resource_version = body
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut take = |key: &str| match body.get_mut(key).map(Value::take) {
            Some(Value::Array(values)) => Some(values),
            _ => None,
        };
        match take("columnDefinitions") {
            Some(column_definitions) => Self::Table {
                resource_version,
                column_definitions,
                rows: take("rows").unwrap_or_default(),
            },
            None => Self::Items {
                resource_version,
                items: take("items").unwrap_or_default(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Items { items, .. } => items.is_empty(),
            Self::Table { rows, .. } => rows.is_empty(),
        }
    }

    pub fn resource_version(&self) -> &str {
        match self {
            Self::Items {
                resource_version, ..
            }
            | Self::Table {
                resource_version, ..
            } => resource_version,
        }
    }

    /// The resource version as a number, or zero if it is not numeric.
    pub fn resource_version_number(&self) -> u64 {
        self.resource_version().parse().unwrap_or(0)
    }
}

// === impl ListResponse ===

impl ListResponse {
    pub fn empty(gvr: &Gvr, kind: &str, resource_version: String) -> Self {
        Self::Items {
            api_version: gvr.group_version(),
            kind: format!("{kind}List"),
            resource_version,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Items { items, .. } => items.len(),
            Self::Table { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resource_version(&self) -> &str {
        match self {
            Self::Items {
                resource_version, ..
            }
            | Self::Table {
                resource_version, ..
            } => resource_version,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Items {
                api_version,
                kind,
                resource_version,
                items,
            } => json!({
                "apiVersion": api_version,
                "kind": kind,
                "metadata": { "resourceVersion": resource_version },
                "items": items,
            }),
            Self::Table {
                resource_version,
                column_definitions,
                rows,
            } => json!({
                "apiVersion": TABLE_API_VERSION,
                "kind": "Table",
                "metadata": { "resourceVersion": resource_version },
                "columnDefinitions": column_definitions,
                "rows": rows,
            }),
        }
    }
}

/// Fetches the current resource version of a resource's cluster-wide list.
pub async fn current_resource_version<L>(lister: &L, gvr: &Gvr) -> Result<String>
where
    L: ListResources + ?Sized,
{
    let target = ListTarget {
        gvr,
        namespace: None,
        query: &ListQuery::limit_one(),
        format: &Format::Json,
    };
    let body = lister
        .list(target)
        .await
        .map_err(|source| Error::ResourceVersion {
            resource: gvr.resource.clone(),
            source,
        })?;
    Ok(PartialList::from_value(body).resource_version().to_string())
}

/// Orders objects by namespace and then by name.
pub(crate) fn cmp_objects(a: &Value, b: &Value) -> Ordering {
    object_key(a).cmp(&object_key(b))
}

/// Orders table rows by the namespace and name of their embedded objects.
pub(crate) fn cmp_rows(a: &Value, b: &Value) -> Ordering {
    object_key(&a["object"]).cmp(&object_key(&b["object"]))
}

fn object_key(obj: &Value) -> (&str, &str) {
    let meta = &obj["metadata"];
    (
        meta["namespace"].as_str().unwrap_or_default(),
        meta["name"].as_str().unwrap_or_default(),
    )
}
