use crate::{selector::ListQuery, Error, Result};

const TABLE_GROUP: &str = "meta.k8s.io";
const TABLE_VERSIONS: [&str; 2] = ["v1", "v1beta1"];

/// The representation a caller asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Table { version: String },
}

/// A single media range from an `Accept` header.
#[derive(Debug)]
struct MediaRange<'a> {
    ty: &'a str,
    subtype: &'a str,
    quality: f32,
    params: Vec<(&'a str, &'a str)>,
}

// === impl Format ===

impl Format {
    /// Negotiates a format from an `Accept` header value.
    ///
    /// Only JSON can be served. A media range may request conversion to a
    /// `meta.k8s.io` Table; any other conversion or a streaming schema makes
    /// the range unacceptable.
    pub fn negotiate(accept: Option<&str>) -> Result<Self> {
        let accept = match accept.map(str::trim) {
            None | Some("") => return Ok(Self::Json),
            Some(accept) => accept,
        };

        let mut ranges = accept
            .split(',')
            .filter_map(MediaRange::parse)
            .filter(|r| r.quality > 0.0)
            .collect::<Vec<_>>();
        // Stable, so equally weighted ranges keep the caller's order.
        ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));

        ranges
            .iter()
            .find_map(MediaRange::format)
            .ok_or(Error::UnsupportedContentType)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table { .. })
    }

    /// The `Accept` header to send upstream.
    pub fn accept(&self) -> String {
        match self {
            Self::Json => "application/json".to_string(),
            Self::Table { version } => {
                format!("application/json;as=Table;v={version};g={TABLE_GROUP}")
            }
        }
    }

    /// Adds the query parameters needed to list in this format.
    pub fn apply(&self, query: &mut ListQuery) {
        if self.is_table() {
            query.set("includeObject", "Object");
        }
    }
}

// === impl MediaRange ===

impl<'a> MediaRange<'a> {
    fn parse(range: &'a str) -> Option<Self> {
        let mut parts = range.split(';').map(str::trim);
        let (ty, subtype) = parts.next()?.split_once('/')?;
        let mut quality = 1.0;
        let mut params = Vec::new();
        for param in parts {
            let (k, v) = param.split_once('=')?;
            let (k, v) = (k.trim(), v.trim().trim_matches('"'));
            if k == "q" {
                quality = v.parse().ok()?;
            } else {
                params.push((k, v));
            }
        }
        Some(Self {
            ty: ty.trim(),
            subtype: subtype.trim(),
            quality,
            params,
        })
    }

    fn param(&self, key: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    fn format(&self) -> Option<Format> {
        if !matches!(self.ty, "application" | "*") || !matches!(self.subtype, "json" | "*") {
            return None;
        }
        if self.param("stream").is_some() {
            return None;
        }
        match self.param("as") {
            None | Some("") => Some(Format::Json),
            Some("Table") => {
                if !matches!(self.param("g"), None | Some(TABLE_GROUP)) {
                    return None;
                }
                let version = self.param("v").unwrap_or("v1");
                TABLE_VERSIONS.contains(&version).then(|| Format::Table {
                    version: version.to_string(),
                })
            }
            Some(_) => None,
        }
    }
}
