use http::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that end a list request.
///
/// Denied access reviews and selectors that map to no namespace are not
/// errors; they produce empty lists.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not find resource {0}")]
    NotFound(String),

    #[error("could not negotiate content type")]
    UnsupportedContentType,

    #[error("this action is not supported")]
    UnsupportedAction,

    #[error("failed to parse query: {0}")]
    InvalidQuery(String),

    #[error("failed to look up namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list namespaces matching {selector:?}: {source}")]
    Namespaces {
        selector: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to review access to {resource} in namespace {namespace:?}: {source}")]
    Review {
        resource: String,
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list resources {resource} for namespace {namespace}: {source}")]
    List {
        resource: String,
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to get resource version for resource {resource}: {source}")]
    ResourceVersion {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("list worker failed: {0}")]
    Worker(#[source] tokio::task::JoinError),
}

// === impl Error ===

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedContentType | Self::UnsupportedAction | Self::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Namespace { .. }
            | Self::Namespaces { .. }
            | Self::Review { .. }
            | Self::List { .. }
            | Self::ResourceVersion { .. }
            | Self::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true for errors caused by the request rather than by a
    /// collaborator.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
