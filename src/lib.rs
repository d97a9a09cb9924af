//! Resolve `s3://bucket/key` asset identifiers to locally cached files.
//!
//! The [`ResolutionEngine`] keeps a table of known remote objects, fetches
//! their content on demand into `<cache root>/<bucket>/<key>`, and re-checks
//! freshness with lightweight metadata requests. Versioned identifiers
//! (`?versionId=...`) are pinned and never re-checked once fetched.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod path;
pub mod shell;
pub mod store;

pub use cache::{CacheEntry, CacheState, CacheTable, Timestamp};
pub use config::ResolverConfig;
pub use engine::ResolutionEngine;
pub use error::{ResolveError, StoreError};
pub use local::{DefaultResolver, FilesystemResolver};
pub use path::S3Path;
pub use store::{GetOutcome, ObjectMetadata, RemoteStore, S3Store};
