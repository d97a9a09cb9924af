pub mod scope;

pub use scope::{ScopeGuard, ScopedResolveCache};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Modification time in seconds since the epoch, with sub-second precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// Unknown or failed metadata check; older than any real time
    pub const INVALID: Timestamp = Timestamp(f64::MIN);

    /// Returned when asking for the timestamp of an entry that was never fetched
    pub const UNKNOWN: Timestamp = Timestamp(1.0);

    pub fn from_system_time(time: std::time::SystemTime) -> Self {
        match time.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timestamp(d.as_secs_f64()),
            Err(e) => Timestamp(-e.duration().as_secs_f64()),
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != Timestamp::INVALID
    }

    /// Render as RFC 3339 for display
    pub fn to_rfc3339(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1e9) as u32;
        chrono::DateTime::from_timestamp(secs as i64, nanos).map(|d| d.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "<invalid>"),
        }
    }
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Unknown content, or a fetch is in flight / failed
    Missing,
    /// Known object whose content must be (re)downloaded
    NeedsFetching,
    /// Local copy believed current as of `last_modified`
    Fetched,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheState::Missing => "missing",
            CacheState::NeedsFetching => "needs-fetching",
            CacheState::Fetched => "fetched",
        };
        f.write_str(s)
    }
}

/// Bookkeeping for one remote object
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub state: CacheState,
    /// Where the content lives on disk; fixed when the entry is created
    pub local_path: PathBuf,
    pub last_modified: Timestamp,
    /// Versioned identifier; never re-checked once fetched
    pub is_pinned: bool,
    /// ETag of the last successful fetch, diagnostics only
    pub content_tag: Option<String>,
    /// A download for this entry is running
    pub in_flight: bool,
}

impl CacheEntry {
    pub fn new(local_path: PathBuf, is_pinned: bool) -> Self {
        CacheEntry {
            state: CacheState::NeedsFetching,
            local_path,
            last_modified: Timestamp::INVALID,
            is_pinned,
            content_tag: None,
            in_flight: false,
        }
    }
}

/// A shared, lockable cache entry
pub type EntryHandle = Arc<Mutex<CacheEntry>>;

/// Lock an entry, recovering the data if another thread panicked while holding it
pub fn lock_entry(entry: &EntryHandle) -> MutexGuard<'_, CacheEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide table of normalized S3 paths to cache entries.
///
/// Each entry sits behind its own mutex so network calls for one path never
/// hold a shard lock of the map.
pub struct CacheTable {
    entries: Arc<DashMap<String, EntryHandle>>,
}

impl CacheTable {
    pub fn new() -> Self {
        CacheTable {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Look up an entry by normalized path
    pub fn get(&self, key: &str) -> Option<EntryHandle> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Atomically fetch the entry for `key`, creating it with `make` if absent.
    ///
    /// Returns the entry and whether this call created it. Concurrent callers
    /// for the same key all receive the same entry and exactly one sees `true`.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> (EntryHandle, bool)
    where
        F: FnOnce() -> CacheEntry,
    {
        if let Some(existing) = self.get(key) {
            return (existing, false);
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let handle = Arc::new(Mutex::new(make()));
                e.insert(Arc::clone(&handle));
                (handle, true)
            }
        }
    }

    /// Copy of an entry's current contents
    pub fn snapshot(&self, key: &str) -> Option<CacheEntry> {
        self.get(key).map(|e| lock_entry(&e).clone())
    }

    /// All keys with their entries, sorted by key
    pub fn snapshot_all(&self) -> Vec<(String, CacheEntry)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), lock_entry(e.value()).clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CacheTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheTable {
    fn clone(&self) -> Self {
        CacheTable {
            entries: Arc::clone(&self.entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_insert_once() {
        let table = CacheTable::new();
        let (first, created) =
            table.get_or_insert_with("b/k", || CacheEntry::new(PathBuf::from("/tmp/b/k"), false));
        assert!(created);

        let (second, created) =
            table.get_or_insert_with("b/k", || panic!("must not construct twice"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_single_entry() {
        let table = CacheTable::new();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    table
                        .get_or_insert_with("b/k", || {
                            CacheEntry::new(PathBuf::from("/tmp/b/k"), false)
                        })
                        .1
                })
            })
            .collect();

        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(created, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clear() {
        let table = CacheTable::new();
        table.get_or_insert_with("a/1", || CacheEntry::new(PathBuf::from("/a/1"), false));
        table.get_or_insert_with("a/2", || CacheEntry::new(PathBuf::from("/a/2"), true));
        assert_eq!(table.snapshot_all().len(), 2);

        table.clear();
        assert!(table.is_empty());
        assert!(table.snapshot("a/1").is_none());
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp(0.0) > Timestamp::INVALID);
        assert!(!Timestamp::INVALID.is_valid());
        assert!(Timestamp::UNKNOWN.is_valid());
        assert_eq!(Timestamp(0.5).to_rfc3339().unwrap(), "1970-01-01T00:00:00.500+00:00");
    }
}
