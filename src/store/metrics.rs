//! Metrics collection for object store calls.
//!
//! Thread-safe counters of metadata checks, content fetches and the bytes
//! and time they cost. Only the most recent requests are kept individually,
//! since the collector lives as long as the engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Number of individual requests retained by [`StoreMetrics::requests`]
pub const RECENT_REQUEST_LIMIT: usize = 256;

/// Kind of store request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Head,
    Get,
}

/// Metrics for a single store request
#[derive(Debug, Clone)]
pub struct RequestMetric {
    pub kind: RequestKind,
    /// Normalized path of the object
    pub path: String,
    /// Number of body bytes transferred
    pub bytes: u64,
    pub duration: Duration,
}

/// Collector for store call metrics
#[derive(Debug, Default)]
pub struct StoreMetrics {
    head_count: AtomicUsize,
    get_count: AtomicUsize,
    not_modified_count: AtomicUsize,
    failure_count: AtomicUsize,
    /// Total body bytes transferred
    total_bytes: AtomicU64,
    /// Total time spent in requests (nanoseconds)
    total_request_time_ns: AtomicU64,
    /// Most recent requests, oldest first
    requests: RwLock<VecDeque<RequestMetric>>,
}

impl StoreMetrics {
    /// Create a new metrics collector wrapped in Arc for sharing
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, metric: RequestMetric) {
        match metric.kind {
            RequestKind::Head => self.head_count.fetch_add(1, Ordering::Relaxed),
            RequestKind::Get => self.get_count.fetch_add(1, Ordering::Relaxed),
        };
        self.total_bytes.fetch_add(metric.bytes, Ordering::Relaxed);
        self.total_request_time_ns
            .fetch_add(metric.duration.as_nanos() as u64, Ordering::Relaxed);

        let mut requests = self.requests.write().unwrap_or_else(PoisonError::into_inner);
        if requests.len() == RECENT_REQUEST_LIMIT {
            requests.pop_front();
        }
        requests.push_back(metric);
    }

    /// Record a completed metadata check
    pub fn record_head(&self, path: &str, duration: Duration) {
        self.record(RequestMetric {
            kind: RequestKind::Head,
            path: path.to_string(),
            bytes: 0,
            duration,
        });
    }

    /// Record a completed content fetch
    pub fn record_get(&self, path: &str, bytes: u64, duration: Duration) {
        self.record(RequestMetric {
            kind: RequestKind::Get,
            path: path.to_string(),
            bytes,
            duration,
        });
    }

    pub fn record_not_modified(&self) {
        self.not_modified_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of metadata checks issued
    pub fn head_count(&self) -> usize {
        self.head_count.load(Ordering::Relaxed)
    }

    /// Number of content fetches issued, including not-modified answers
    pub fn get_count(&self) -> usize {
        self.get_count.load(Ordering::Relaxed)
    }

    pub fn not_modified_count(&self) -> usize {
        self.not_modified_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn total_request_time(&self) -> Duration {
        Duration::from_nanos(self.total_request_time_ns.load(Ordering::Relaxed))
    }

    /// The most recent individual requests, oldest first
    pub fn requests(&self) -> Vec<RequestMetric> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.head_count.store(0, Ordering::Relaxed);
        self.get_count.store(0, Ordering::Relaxed);
        self.not_modified_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        self.total_request_time_ns.store(0, Ordering::Relaxed);
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_tracking() {
        let metrics = StoreMetrics::new();

        metrics.record_head("b/a.usd", Duration::from_millis(10));
        metrics.record_get("b/a.usd", 1000, Duration::from_millis(50));
        metrics.record_get("b/c.usd", 2000, Duration::from_millis(100));

        assert_eq!(metrics.head_count(), 1);
        assert_eq!(metrics.get_count(), 2);
        assert_eq!(metrics.total_bytes(), 3000);
        assert_eq!(metrics.total_request_time(), Duration::from_millis(160));

        let requests = metrics.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].kind, RequestKind::Head);
        assert_eq!(requests[2].path, "b/c.usd");
    }

    #[test]
    fn test_request_log_is_bounded() {
        let metrics = StoreMetrics::new();

        for i in 0..RECENT_REQUEST_LIMIT + 10 {
            metrics.record_head(&format!("b/{i}.usd"), Duration::from_millis(1));
        }

        let requests = metrics.requests();
        assert_eq!(requests.len(), RECENT_REQUEST_LIMIT);
        assert_eq!(requests[0].path, "b/10.usd");
        assert_eq!(
            requests.last().unwrap().path,
            format!("b/{}.usd", RECENT_REQUEST_LIMIT + 9)
        );
        assert_eq!(metrics.head_count(), RECENT_REQUEST_LIMIT + 10);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = StoreMetrics::new();

        metrics.record_get("b/a.usd", 1000, Duration::from_millis(50));
        metrics.record_not_modified();
        metrics.record_failure();
        assert_eq!(metrics.total_bytes(), 1000);

        metrics.reset();
        assert_eq!(metrics.total_bytes(), 0);
        assert_eq!(metrics.get_count(), 0);
        assert_eq!(metrics.not_modified_count(), 0);
        assert_eq!(metrics.failure_count(), 0);
        assert!(metrics.requests().is_empty());
    }
}
