use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a [`RemoteStore`](crate::store::RemoteStore)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("{operation} failed: {message}")]
    Request { operation: &'static str, message: String },

    #[error("failed to read object body: {0}")]
    Body(String),
}

/// Errors surfaced by the resolution engine.
///
/// None of these are fatal: the engine records the outcome in the cache entry
/// and the caller decides whether to resolve again.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed S3 identifier: {0}")]
    MalformedPath(String),

    #[error("no S3 client configured")]
    StoreUnavailable,

    #[error("{0} was not resolved before fetching")]
    NotResolved(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResolveError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
