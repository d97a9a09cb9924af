//! Per-operation resolve caches.
//!
//! A scope deduplicates resolutions of the same path inside one logical
//! operation (loading one stage, composing one layer stack). Scopes are
//! opened with [`ScopedResolveCache::begin_scope`] and closed when the returned
//! guard is dropped. They nest per thread; only the innermost scope of the
//! calling thread is consulted by [`ScopedResolveCache::resolve_within_scope`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Path to resolved-path results for one open scope
#[derive(Debug)]
pub struct ResolveScope {
    id: u64,
    resolved: DashMap<String, Arc<OnceLock<String>>>,
}

impl ResolveScope {
    fn new(id: u64) -> Self {
        ResolveScope {
            id,
            resolved: DashMap::new(),
        }
    }

    /// Return the stored result for `path`, computing it with `resolve` on first use.
    ///
    /// Concurrent callers for the same path wait for the first computation
    /// instead of running their own.
    pub fn get_or_resolve<F>(&self, path: &str, resolve: F) -> String
    where
        F: FnOnce() -> String,
    {
        let cell = Arc::clone(self.resolved.entry(path.to_string()).or_default().value());
        cell.get_or_init(resolve).clone()
    }

    /// Previously stored result, if any
    pub fn get(&self, path: &str) -> Option<String> {
        self.resolved.get(path).and_then(|c| c.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Registry of open scopes, keyed by the thread that opened them
#[derive(Debug, Default)]
pub struct ScopedResolveCache {
    stacks: DashMap<ThreadId, Vec<Arc<ResolveScope>>>,
    next_id: AtomicU64,
}

impl ScopedResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, empty scope on the calling thread
    pub fn begin_scope(&self) -> ScopeGuard<'_> {
        let scope = Arc::new(ResolveScope::new(self.next_id.fetch_add(1, Ordering::Relaxed)));
        let thread = thread::current().id();

        let mut stack = self.stacks.entry(thread).or_default();
        stack.push(Arc::clone(&scope));
        debug!("Opened resolve scope {} (depth {})", scope.id, stack.len());

        ScopeGuard {
            owner: self,
            scope,
            thread,
        }
    }

    /// Innermost open scope of the calling thread
    pub fn current(&self) -> Option<Arc<ResolveScope>> {
        self.stacks
            .get(&thread::current().id())
            .and_then(|stack| stack.last().cloned())
    }

    /// Resolve through the current scope if one is open, otherwise directly
    pub fn resolve_within_scope<F>(&self, path: &str, resolve: F) -> String
    where
        F: FnOnce() -> String,
    {
        match self.current() {
            Some(scope) => scope.get_or_resolve(path, resolve),
            None => resolve(),
        }
    }

    /// Number of scopes open on the calling thread
    pub fn depth(&self) -> usize {
        self.stacks
            .get(&thread::current().id())
            .map(|stack| stack.len())
            .unwrap_or(0)
    }

    fn end_scope(&self, thread: ThreadId, id: u64) {
        if let Some(mut stack) = self.stacks.get_mut(&thread) {
            stack.retain(|s| s.id != id);
        }
        self.stacks.remove_if(&thread, |_, stack| stack.is_empty());
        debug!("Closed resolve scope {id}");
    }
}

/// An open scope; closing happens on drop, including on error paths
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    owner: &'a ScopedResolveCache,
    scope: Arc<ResolveScope>,
    thread: ThreadId,
}

impl ScopeGuard<'_> {
    /// Shared handle to this scope, for worker threads cooperating on the same operation
    pub fn scope(&self) -> Arc<ResolveScope> {
        Arc::clone(&self.scope)
    }

    /// Close the scope explicitly
    pub fn end(self) {}
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.owner.end_scope(self.thread, self.scope.id);
    }
}
