//! Lists a resource across many namespaces and merges the results.

use crate::{
    list::{self, ListResources, ListResponse, ListTarget, PartialList},
    negotiate::Format,
    review::{ReviewAccess, UserInfo},
    scope::Namespaces,
    selector::ListQuery,
    Error, Gvr, Result,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, Instrument};

/// The number of namespaces listed concurrently per request.
pub const WORKERS: usize = 3;

/// A list request for a single resource, shared by all of its workers.
#[derive(Clone, Debug)]
pub struct ListRequest {
    pub gvr: Gvr,
    /// The upstream kind of the resource, e.g. `Deployment`.
    pub kind: String,
    pub user: UserInfo,
    pub format: Format,
    pub query: ListQuery,
}

#[derive(Clone, Debug)]
pub struct Collector<L, R> {
    lister: L,
    reviewer: R,
    workers: usize,
}

/// Accumulates partial lists as workers complete.
#[derive(Debug, Default)]
struct Merge {
    resource_version: u64,
    items: Vec<Value>,
    rows: Vec<Value>,
    column_definitions: Option<Vec<Value>>,
}

// === impl Collector ===

impl<L, R> Collector<L, R>
where
    L: ListResources + Clone + 'static,
    R: ReviewAccess + Clone + 'static,
{
    pub fn new(lister: L, reviewer: R) -> Self {
        Self {
            lister,
            reviewer,
            workers: WORKERS,
        }
    }

    pub fn lister(&self) -> &L {
        &self.lister
    }

    pub fn reviewer(&self) -> &R {
        &self.reviewer
    }

    /// Lists the resource in each namespace the user may access.
    ///
    /// Namespaces that deny access are skipped. The first failing worker
    /// fails the whole request and aborts the others.
    pub async fn collect(
        &self,
        request: Arc<ListRequest>,
        namespaces: Namespaces,
    ) -> Result<ListResponse> {
        if request.query.is_watch() {
            return Err(Error::UnsupportedAction);
        }

        let mut query = request.query.clone();
        request.format.apply(&mut query);
        let query = Arc::new(query);

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for ns in namespaces {
            let span = tracing::debug_span!("list", %ns);
            let worker = Worker {
                lister: self.lister.clone(),
                reviewer: self.reviewer.clone(),
                request: request.clone(),
                query: query.clone(),
                permits: permits.clone(),
            };
            tasks.spawn(worker.run(ns).instrument(span));
        }

        // Dropping the set on an early return aborts the remaining workers.
        let mut merge = Merge::default();
        while let Some(res) = tasks.join_next().await {
            if let Some(partial) = res.map_err(Error::Worker)?? {
                merge.add(partial);
            }
        }

        let resource_version = match merge.resource_version {
            0 => list::current_resource_version(&self.lister, &request.gvr).await?,
            rv => rv.to_string(),
        };
        Ok(merge.finish(&request, resource_version))
    }
}

struct Worker<L, R> {
    lister: L,
    reviewer: R,
    request: Arc<ListRequest>,
    query: Arc<ListQuery>,
    permits: Arc<Semaphore>,
}

impl<L: ListResources, R: ReviewAccess> Worker<L, R> {
    async fn run(self, ns: String) -> Result<Option<PartialList>> {
        // The semaphore is never closed.
        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(None);
        };

        let request = &self.request;
        let allowed = self
            .reviewer
            .can_list(&request.user, &request.gvr, &ns)
            .await
            .map_err(|source| Error::Review {
                resource: request.gvr.resource.clone(),
                namespace: ns.clone(),
                source,
            })?;
        if !allowed {
            debug!(user = %request.user.user, "Access denied");
            return Ok(None);
        }

        let target = ListTarget {
            gvr: &request.gvr,
            namespace: Some(ns.as_str()),
            query: &self.query,
            format: &request.format,
        };
        let body = self
            .lister
            .list(target)
            .await
            .map_err(|source| Error::List {
                resource: request.gvr.resource.clone(),
                namespace: ns.clone(),
                source,
            })?;
        Ok(Some(PartialList::from_value(body)))
    }
}

// === impl Merge ===

impl Merge {
    fn add(&mut self, partial: PartialList) {
        if !partial.is_empty() {
            self.resource_version = self
                .resource_version
                .max(partial.resource_version_number());
        }
        match partial {
            PartialList::Items { items, .. } => self.items.extend(items),
            PartialList::Table {
                column_definitions,
                rows,
                ..
            } => {
                if !column_definitions.is_empty() && self.column_definitions.is_none() {
                    self.column_definitions = Some(column_definitions);
                }
                self.rows.extend(rows);
            }
        }
    }

    fn finish(mut self, request: &ListRequest, resource_version: String) -> ListResponse {
        match self.column_definitions {
            Some(column_definitions) => {
                self.rows.sort_by(list::cmp_rows);
                ListResponse::Table {
                    resource_version,
                    column_definitions,
                    rows: self.rows,
                }
            }
            None => {
                self.items.sort_by(list::cmp_objects);
                ListResponse::Items {
                    api_version: request.gvr.group_version(),
                    kind: format!("{}List", request.kind),
                    resource_version,
                    items: self.items,
                }
            }
        }
    }
}
