pub mod metrics;
pub mod s3;

pub use metrics::StoreMetrics;
pub use s3::S3Store;

use bytes::Bytes;

use crate::cache::Timestamp;
use crate::error::StoreError;

/// Result of a metadata (HEAD) request
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    pub last_modified: Timestamp,
    pub content_tag: Option<String>,
    pub size: Option<u64>,
}

/// Result of a content (GET) request
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    /// The object body was transferred
    Fetched {
        body: Bytes,
        last_modified: Timestamp,
        content_tag: Option<String>,
    },
    /// The object has not changed since the `if_modified_since` time
    NotModified,
}

/// Backing object store.
///
/// Calls block until the store answers; timeouts and retries belong to the
/// implementation.
pub trait RemoteStore: Send + Sync {
    /// Check existence and last-modified time without transferring content
    fn head_metadata(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectMetadata, StoreError>;

    /// Download an object, optionally only if it changed after `if_modified_since`
    fn get_content(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        if_modified_since: Option<Timestamp>,
    ) -> Result<GetOutcome, StoreError>;
}
