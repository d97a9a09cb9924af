//! The resolution engine.
//!
//! Maps `s3:` identifiers to files under the local cache root and keeps one
//! [`CacheEntry`] per normalized path. Resolving never downloads content: a
//! first resolution registers the object and returns its logical
//! (`s3://`-prefixed local) path, [`ResolutionEngine::fetch_asset`] downloads
//! it, and later resolutions re-check freshness with a metadata request.
//!
//! Entry states move `NeedsFetching -> Missing (in flight) -> Fetched`, and
//! back to `NeedsFetching` when the store reports a newer object.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Context;
use dashmap::DashMap;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cache::scope::ResolveScope;
use crate::cache::{
    CacheEntry, CacheState, CacheTable, EntryHandle, ScopeGuard, ScopedResolveCache, Timestamp,
    lock_entry,
};
use crate::config::ResolverConfig;
use crate::error::{ResolveError, Result};
use crate::local::{DefaultResolver, FilesystemResolver};
use crate::path::{S3_PREFIX, S3Path, matches_schema};
use crate::store::{GetOutcome, RemoteStore, S3Store, StoreMetrics};

pub struct ResolutionEngine {
    cache_root: PathBuf,
    store: Option<Arc<dyn RemoteStore>>,
    default_resolver: Arc<dyn DefaultResolver>,
    table: CacheTable,
    scopes: ScopedResolveCache,
    metrics: Arc<StoreMetrics>,
    /// Held for the duration of a download; later fetchers of the same key wait on it
    fetches: DashMap<String, Arc<Mutex<()>>>,
}

impl ResolutionEngine {
    /// Create an engine. Without a store every remote operation reports failure.
    pub fn new(
        cache_root: impl Into<PathBuf>,
        store: Option<Arc<dyn RemoteStore>>,
        default_resolver: Arc<dyn DefaultResolver>,
    ) -> Self {
        ResolutionEngine {
            cache_root: cache_root.into(),
            store,
            default_resolver,
            table: CacheTable::new(),
            scopes: ScopedResolveCache::new(),
            metrics: StoreMetrics::new(),
            fetches: DashMap::new(),
        }
    }

    /// Engine backed by S3 and the plain filesystem resolver
    pub fn from_config(config: &ResolverConfig) -> anyhow::Result<Self> {
        let store = S3Store::new(config).context("Failed to create S3 client")?;
        Ok(Self::new(
            config.cache_root.clone(),
            Some(Arc::new(store)),
            Arc::new(FilesystemResolver::new()),
        ))
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    pub fn table(&self) -> &CacheTable {
        &self.table
    }

    /// Returns true if the path uses the S3 schema
    pub fn matches_schema(&self, path: &str) -> bool {
        matches_schema(path)
    }

    /// Snapshot of the cache entry for an identifier
    pub fn entry(&self, path: &str) -> Option<CacheEntry> {
        let s3 = S3Path::parse(path).ok()?;
        self.table.snapshot(&s3.normalized())
    }

    /// Snapshot of every cache entry, sorted by normalized path
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.table.snapshot_all()
    }

    /// Resolve any asset path.
    ///
    /// Remote identifiers go through the cache table, everything else through
    /// the default resolver. Both are deduplicated by the calling thread's
    /// innermost open scope. Failures resolve to the empty string.
    pub fn resolve(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        self.scopes
            .resolve_within_scope(path, || self.resolve_uncached(path))
    }

    /// Resolve through an explicit scope, e.g. one shared by worker threads
    pub fn resolve_in(&self, scope: &ResolveScope, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        scope.get_or_resolve(path, || self.resolve_uncached(path))
    }

    fn resolve_uncached(&self, path: &str) -> String {
        if !self.matches_schema(path) {
            return self.default_resolver.resolve(path);
        }
        match self.resolve_name(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("[S3Resolver] failed to resolve {path}: {e}");
                String::new()
            }
        }
    }

    /// Resolve an S3 identifier against the cache table.
    ///
    /// - unknown path: registers an entry needing a fetch and returns the
    ///   logical `s3://<local path>` identifier
    /// - fetched: re-checks the object's metadata unless pinned, marking it
    ///   for refetch if the store has a newer version; returns the local path
    /// - needs fetching: returns the local path
    /// - missing: returns the logical identifier; after a failed fetch the
    ///   entry is re-armed so the next fetch tries again
    pub fn resolve_name(&self, path: &str) -> Result<String> {
        let s3 = S3Path::parse(path)?;
        let key = s3.normalized();

        let (entry, created) = self.table.get_or_insert_with(&key, || {
            CacheEntry::new(s3.local_path(&self.cache_root), s3.is_versioned())
        });

        let (state, is_pinned, local_path) = {
            let mut e = lock_entry(&entry);
            let observed = e.state;
            if observed == CacheState::Missing && !e.in_flight {
                // a failed fetch is retried by the next fetch call
                e.state = CacheState::NeedsFetching;
            }
            (observed, e.is_pinned, e.local_path.clone())
        };

        if created {
            debug!("Registered {key} -> {}", local_path.display());
            return Ok(logical_path(&local_path));
        }

        match state {
            CacheState::Fetched => {
                if !is_pinned {
                    self.check_object(&s3, &key, &entry)?;
                }
                Ok(local_path.to_string_lossy().into_owned())
            }
            CacheState::NeedsFetching => Ok(local_path.to_string_lossy().into_owned()),
            CacheState::Missing => Ok(logical_path(&local_path)),
        }
    }

    /// Metadata check for a fetched entry; never downloads content
    fn check_object(&self, s3: &S3Path, key: &str, entry: &EntryHandle) -> Result<()> {
        let store = self.store.as_ref().ok_or(ResolveError::StoreUnavailable)?;

        let started = Instant::now();
        let outcome = store.head_metadata(s3.bucket(), s3.key(), s3.version_id());
        self.metrics.record_head(key, started.elapsed());

        let mut e = lock_entry(entry);
        match outcome {
            Ok(meta) => {
                if e.state == CacheState::Fetched && meta.last_modified > e.last_modified {
                    debug!(
                        "{key} changed remotely ({} > {}), marking for fetch",
                        meta.last_modified, e.last_modified
                    );
                    e.state = CacheState::NeedsFetching;
                }
                e.last_modified = meta.last_modified;
            }
            Err(err) => {
                self.metrics.record_failure();
                warn!("HeadObject error for {key}: {err}");
                e.last_modified = Timestamp::INVALID;
            }
        }
        Ok(())
    }

    /// Download a resolved asset into its cache location.
    ///
    /// The identifier must have been resolved first. Fetched entries succeed
    /// without a store call. A caller arriving while another thread downloads
    /// the same entry waits for that download; if it failed, the waiting
    /// caller retries instead of reporting success. If a local copy exists the
    /// download is conditional on its modification time.
    pub fn fetch_asset(&self, path: &str, resolved_path: &str) -> Result<()> {
        let s3 = S3Path::parse(path)?;
        let store = self.store.as_ref().ok_or(ResolveError::StoreUnavailable)?;
        let key = s3.normalized();

        let Some(entry) = self.table.get(&key) else {
            warn!("[S3Resolver] {key} was not resolved before fetching!");
            return Err(ResolveError::NotResolved(path.to_string()));
        };

        let fetch_lock = self.fetch_lock(&key);
        let _fetching = fetch_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let local_path = {
            let mut e = lock_entry(&entry);
            match e.state {
                CacheState::Fetched => return Ok(()),
                CacheState::NeedsFetching => {}
                CacheState::Missing => debug!("Retrying failed fetch of {key}"),
            }
            e.state = CacheState::Missing;
            e.in_flight = true;
            e.local_path.clone()
        };

        if !resolved_path.is_empty() && Path::new(resolved_path) != local_path {
            debug!(
                "Fetching {key} to {} (requested {resolved_path})",
                local_path.display()
            );
        }

        let if_modified_since = local_modification_time(&local_path);
        if let Some(ts) = if_modified_since {
            lock_entry(&entry).last_modified = ts;
        }

        let started = Instant::now();
        let outcome = store.get_content(s3.bucket(), s3.key(), s3.version_id(), if_modified_since);

        match outcome {
            Ok(GetOutcome::Fetched {
                body,
                last_modified,
                content_tag,
            }) => {
                self.metrics
                    .record_get(&key, body.len() as u64, started.elapsed());

                if let Err(e) = write_local(&local_path, &body) {
                    lock_entry(&entry).in_flight = false;
                    self.metrics.record_failure();
                    warn!("Failed to store {key}: {e}");
                    return Err(e);
                }

                let mut e = lock_entry(&entry);
                e.last_modified = last_modified;
                e.content_tag = content_tag;
                e.state = CacheState::Fetched;
                e.in_flight = false;
                debug!("Fetched {key} ({} bytes)", body.len());
                Ok(())
            }
            Ok(GetOutcome::NotModified) => {
                self.metrics.record_get(&key, 0, started.elapsed());
                self.metrics.record_not_modified();
                let mut e = lock_entry(&entry);
                e.state = CacheState::Fetched;
                e.in_flight = false;
                debug!("{key} not modified, keeping local copy");
                Ok(())
            }
            Err(err) => {
                self.metrics.record_get(&key, 0, started.elapsed());
                lock_entry(&entry).in_flight = false;
                self.metrics.record_failure();
                warn!("GetObject error for {key}: {err}");
                Err(err.into())
            }
        }
    }

    /// Last-modified time of an asset, or [`Timestamp::UNKNOWN`] when the
    /// store has never reported one
    pub fn get_timestamp(&self, path: &str) -> Timestamp {
        if self.store.is_none() {
            return Timestamp::UNKNOWN;
        }

        let entry = S3Path::parse(path)
            .ok()
            .and_then(|s3| self.table.snapshot(&s3.normalized()));

        match entry {
            Some(e) if e.state == CacheState::Fetched => e.last_modified,
            Some(e) if e.state == CacheState::NeedsFetching && e.last_modified.is_valid() => {
                e.last_modified
            }
            Some(_) => {
                warn!("[S3Resolver] {path} has not been fetched when querying timestamps!");
                Timestamp::UNKNOWN
            }
            None => {
                warn!("[S3Resolver] {path} is missing when querying timestamps!");
                Timestamp::UNKNOWN
            }
        }
    }

    /// Invalidate cached entries.
    ///
    /// Every refresh clears the whole table, whatever the prefix.
    pub fn refresh(&self, prefix: &str) {
        debug!(
            "Refreshing S3 cache (prefix {prefix:?}, {} entries dropped)",
            self.table.len()
        );
        self.table.clear();
        self.fetches.clear();
    }

    fn fetch_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.fetches.entry(key.to_string()).or_default().value())
    }

    /// Asset info hook; the cache is updated during fetches so nothing changes here
    pub fn update_asset_info(&self, path: &str) {
        if self.matches_schema(path) {
            debug!("update_asset_info {path}: {:?}", self.entry(path).map(|e| e.state));
        }
    }

    /// Open a resolve scope on the calling thread
    pub fn begin_scope(&self) -> ScopeGuard<'_> {
        self.scopes.begin_scope()
    }

    pub fn scopes(&self) -> &ScopedResolveCache {
        &self.scopes
    }

    pub fn is_relative_path(&self, path: &str) -> bool {
        !self.matches_schema(path) && self.default_resolver.is_relative_path(path)
    }

    pub fn get_modification_timestamp(&self, path: &str, resolved_path: &str) -> Timestamp {
        if self.matches_schema(path) {
            return self.get_timestamp(path);
        }
        self.default_resolver
            .get_modification_timestamp(path, resolved_path)
    }

    /// Make a resolved asset available locally; local files need nothing
    pub fn fetch_to_local_resolved_path(&self, path: &str, resolved_path: &str) -> bool {
        if !self.matches_schema(path) {
            return true;
        }
        match self.fetch_asset(path, resolved_path) {
            Ok(()) => true,
            Err(e) => {
                warn!("[S3Resolver] fetch of {path} failed: {e}");
                false
            }
        }
    }

    pub fn refresh_context(&self) {
        self.refresh("");
    }
}

/// Identifier for an object that is known but not fetched yet
fn logical_path(local_path: &Path) -> String {
    format!("{S3_PREFIX}{}", local_path.display())
}

fn local_modification_time(path: &Path) -> Option<Timestamp> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(Timestamp::from_system_time(modified))
}

/// Write through a temporary sibling so an interrupted download never
/// leaves a truncated file at `path`.
fn write_local(path: &Path, body: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        ResolveError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
        )
    })?;

    std::fs::create_dir_all(dir).map_err(|e| ResolveError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ResolveError::io(dir, e))?;
    tmp.write_all(body).map_err(|e| ResolveError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| ResolveError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logical_path() {
        assert_eq!(logical_path(Path::new("/tmp/b/k.usd")), "s3:///tmp/b/k.usd");
    }

    #[test]
    fn test_write_local_creates_directories() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("bucket/deep/dir/obj.usd");

        write_local(&target, b"first").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"first");

        write_local(&target, b"second").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"second");

        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_local_directory_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("bucket");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = write_local(&blocker.join("obj.usd"), b"x").unwrap_err();
        assert!(matches!(err, ResolveError::Io { .. }));
    }

    #[test]
    fn test_no_store_reports_failure() {
        let dir = TempDir::new().unwrap();
        let engine = ResolutionEngine::new(dir.path(), None, Arc::new(FilesystemResolver::new()));

        let first = engine.resolve_name("s3://bucket/a.usd").unwrap();
        assert!(first.starts_with("s3://"));
        assert!(matches!(
            engine.fetch_asset("s3://bucket/a.usd", ""),
            Err(ResolveError::StoreUnavailable)
        ));
        assert_eq!(engine.get_timestamp("s3://bucket/a.usd"), Timestamp::UNKNOWN);
    }
}
