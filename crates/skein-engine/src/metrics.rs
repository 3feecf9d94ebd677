use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine counters. Built by the process entry point and handed to the
/// executor and handlers. Every increment is also forwarded to the `metrics`
/// facade, labelled with `scope`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    scope: String,
    catalog_hits: AtomicU64,
    catalog_misses: AtomicU64,
    catalog_get_failures: AtomicU64,
    catalog_put_successes: AtomicU64,
    catalog_put_failures: AtomicU64,
    abort_failures: AtomicU64,
    indeterminate_polls: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub catalog_hits: u64,
    pub catalog_misses: u64,
    pub catalog_get_failures: u64,
    pub catalog_put_successes: u64,
    pub catalog_put_failures: u64,
    pub abort_failures: u64,
    pub indeterminate_polls: u64,
    pub retries: u64,
}

impl EngineMetrics {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn bump(&self, counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(name, "scope" => self.scope.clone()).increment(1);
    }

    pub fn record_catalog_hit(&self) {
        self.bump(&self.catalog_hits, "skein.catalog.hits_total");
    }

    pub fn record_catalog_miss(&self) {
        self.bump(&self.catalog_misses, "skein.catalog.misses_total");
    }

    pub fn record_catalog_get_failure(&self) {
        self.bump(&self.catalog_get_failures, "skein.catalog.get_failures_total");
    }

    pub fn record_catalog_put_success(&self) {
        self.bump(&self.catalog_put_successes, "skein.catalog.put_success_total");
    }

    pub fn record_catalog_put_failure(&self) {
        self.bump(&self.catalog_put_failures, "skein.catalog.put_failures_total");
    }

    pub fn record_abort_failure(&self) {
        self.bump(&self.abort_failures, "skein.node.abort_failures_total");
    }

    pub fn record_indeterminate_poll(&self) {
        self.bump(&self.indeterminate_polls, "skein.node.indeterminate_polls_total");
    }

    pub fn record_retry(&self) {
        self.bump(&self.retries, "skein.node.retries_total");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            catalog_hits: self.catalog_hits.load(Ordering::Relaxed),
            catalog_misses: self.catalog_misses.load(Ordering::Relaxed),
            catalog_get_failures: self.catalog_get_failures.load(Ordering::Relaxed),
            catalog_put_successes: self.catalog_put_successes.load(Ordering::Relaxed),
            catalog_put_failures: self.catalog_put_failures.load(Ordering::Relaxed),
            abort_failures: self.abort_failures.load(Ordering::Relaxed),
            indeterminate_polls: self.indeterminate_polls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_without_recorder() {
        let m = EngineMetrics::new("test");
        m.record_catalog_hit();
        m.record_catalog_hit();
        m.record_retry();

        let snap = m.snapshot();
        assert_eq!(snap.catalog_hits, 2);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.catalog_misses, 0);
        assert_eq!(m.scope(), "test");
    }
}
