//! Chooses the namespaces a list request fans out over.

use crate::{
    selector::{Operator, SelectorQuery},
    topology::{self, NamespaceLookup, Topology},
    Error, Result,
};
use project_resources_k8s_api::{self as k8s, labels};
use std::collections::BTreeSet;

pub type Namespaces = BTreeSet<String>;

/// Namespaces that belong to no project, optionally narrowed by name.
///
/// The selector matches by namespace name. Project namespaces carry no
/// project label themselves, so they are listed here and an identifier naming
/// a project matches its namespace by name.
pub fn unscoped<N>(lookup: &N, selector: Option<&SelectorQuery>) -> Result<Namespaces>
where
    N: NamespaceLookup + ?Sized,
{
    let mut sel = topology::orphans();
    if let Some(query) = selector {
        sel.push(by_name(query.operator, query.identifiers.iter()));
    }
    list(lookup, &sel)
}

/// Namespaces of `project`, narrowed by the selector.
///
/// The selector may name other projects and namespaces outside of `project`
/// because callers fan a single selector out over every project they can
/// see. Such identifiers are ignored here.
pub fn scoped<N>(lookup: &N, project: &str, selector: Option<&SelectorQuery>) -> Result<Namespaces>
where
    N: NamespaceLookup + ?Sized,
{
    let (operator, mut topology) = match selector {
        Some(query) => (
            query.operator,
            Topology::resolve(lookup, &query.identifiers)?,
        ),
        None => (Operator::In, Topology::default()),
    };
    topology.retain_members_of(project);

    let whole_project = match operator {
        Operator::In => {
            let whole_project = topology.projects.iter().any(|p| p == project);
            if !whole_project && topology.namespaces.is_empty() && selector.is_some() {
                tracing::trace!(%project, "Selector does not apply to project");
                return Ok(Namespaces::new());
            }
            whole_project
        }
        Operator::NotIn => {
            if topology.projects.iter().any(|p| p == project) {
                tracing::trace!(%project, "Selector excludes project");
                return Ok(Namespaces::new());
            }
            false
        }
    };

    let mut sel = topology::members_of(project);
    if !whole_project && !topology.namespaces.is_empty() {
        sel.push(by_name(operator, topology.namespace_names()));
    }
    list(lookup, &sel)
}

/// Namespaces across all projects.
///
/// An inclusive selector targets the named namespaces plus the members of the
/// named projects. An exclusive selector targets every namespace except those.
pub fn global<N>(lookup: &N, selector: &SelectorQuery) -> Result<Namespaces>
where
    N: NamespaceLookup + ?Sized,
{
    let topology = Topology::resolve(lookup, &selector.identifiers)?;

    match selector.operator {
        Operator::NotIn => {
            let mut sel = labels::Selector::default();
            if !topology.projects.is_empty() {
                sel.push(labels::Expression::new(
                    k8s::PROJECT_ID_LABEL,
                    labels::Operator::NotIn,
                    topology.projects.iter(),
                ));
            }
            if !topology.namespaces.is_empty() {
                sel.push(by_name(Operator::NotIn, topology.namespace_names()));
            }
            list(lookup, &sel)
        }
        Operator::In => {
            let mut namespaces = topology
                .namespace_names()
                .map(ToString::to_string)
                .collect::<Namespaces>();
            if !topology.projects.is_empty() {
                let sel = labels::Selector::from_iter(Some(labels::Expression::new(
                    k8s::PROJECT_ID_LABEL,
                    labels::Operator::In,
                    topology.projects.iter(),
                )));
                namespaces.extend(list(lookup, &sel)?);
            }
            Ok(namespaces)
        }
    }
}

fn by_name<I, V>(operator: Operator, names: I) -> labels::Expression
where
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    labels::Expression::new(k8s::NAMESPACE_NAME_LABEL, operator.into(), names)
}

fn list<N>(lookup: &N, selector: &labels::Selector) -> Result<Namespaces>
where
    N: NamespaceLookup + ?Sized,
{
    let namespaces = lookup
        .list(selector)
        .map_err(|source| Error::Namespaces {
            selector: selector.to_string(),
            source,
        })?;
    Ok(namespaces.into_iter().map(|ns| ns.name).collect())
}
