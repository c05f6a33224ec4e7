//! The `projectsornamespaces` field selector extension.
//!
//! Callers select the namespaces to aggregate over with a query parameter like
//! `fieldSelector=projectsornamespaces=p-abcde,ns1` or
//! `fieldSelector=projectsornamespaces!=ns2`. The upstream list endpoint does
//! not understand this selector, so it is stripped before forwarding.

use crate::{Error, Result};
use project_resources_k8s_api as k8s;

pub const QUERY_KEY: &str = "fieldSelector";
pub const SELECTOR_KEY: &str = "projectsornamespaces";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorQuery {
    pub operator: Operator,
    pub identifiers: Vec<String>,
}

/// The query parameters of a list request, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    params: Vec<(String, String)>,
    watch: bool,
}

// === impl Operator ===

impl From<Operator> for k8s::labels::Operator {
    fn from(op: Operator) -> Self {
        match op {
            Operator::In => Self::In,
            Operator::NotIn => Self::NotIn,
        }
    }
}

// === impl SelectorQuery ===

impl SelectorQuery {
    /// Parses a single `fieldSelector` value.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix(SELECTOR_KEY)?;
        let (operator, csv) = if let Some(csv) = rest.strip_prefix("!=") {
            (Operator::NotIn, csv)
        } else if let Some(csv) = rest.strip_prefix("==") {
            (Operator::In, csv)
        } else {
            (Operator::In, rest.strip_prefix('=')?)
        };
        let identifiers = csv
            .split(',')
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect();
        Some(Self {
            operator,
            identifiers,
        })
    }

    /// Finds the first selector among the `fieldSelector` parameters.
    pub fn find(params: &[(String, String)]) -> Option<Self> {
        params
            .iter()
            .filter(|(k, _)| k == QUERY_KEY)
            .find_map(|(_, v)| Self::parse(v))
    }

    pub fn is_exclusive(&self) -> bool {
        self.operator == Operator::NotIn
    }
}

/// Returns the field name of a field selector requirement: the text before
/// the first `=`, `==` or `!=`.
fn field_name(requirement: &str) -> &str {
    let bytes = requirement.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'=' => return &requirement[..i],
            b'!' if bytes.get(i + 1) == Some(&b'=') => return &requirement[..i],
            _ => {}
        }
    }
    requirement
}

/// Removes every `projectsornamespaces` field selector, leaving all other
/// parameters in place.
pub fn strip(params: Vec<(String, String)>) -> Vec<(String, String)> {
    params
        .into_iter()
        .filter(|(k, v)| k != QUERY_KEY || field_name(v) != SELECTOR_KEY)
        .collect()
}

/// Decodes a raw query string into ordered parameters.
pub fn decode(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

// === impl ListQuery ===

impl ListQuery {
    /// Validates the standard list options among `params`.
    pub fn new(params: Vec<(String, String)>) -> Result<Self> {
        let mut watch = false;
        for (k, v) in &params {
            match k.as_str() {
                "watch" => {
                    watch = parse_bool(v).ok_or_else(|| {
                        Error::InvalidQuery(format!("watch must be a boolean, got {v:?}"))
                    })?;
                }
                "limit" => {
                    v.parse::<i64>().map_err(|_| {
                        Error::InvalidQuery(format!("limit must be an integer, got {v:?}"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(Self { params, watch })
    }

    /// A query fetching at most one item, used to learn a list's current
    /// resource version.
    pub fn limit_one() -> Self {
        Self {
            params: vec![("limit".to_string(), "1".to_string())],
            watch: false,
        }
    }

    pub fn is_watch(&self) -> bool {
        self.watch
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key` to a single value, replacing any existing values.
    pub fn set(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.to_string()));
    }

    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish()
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
