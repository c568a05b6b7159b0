//! Operation statistics and telemetry.
//!
//! Running counters for every coordinator call, including cache
//! hit/miss tracking and cumulative operation timing. All counters are
//! atomic and can be read while operations are in progress; they reset
//! only on an explicit cache clear.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running statistics for a database instance.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
    flushes: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
    op_micros: AtomicU64,
}

impl DatabaseStats {
    /// Creates a zeroed stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_create(&self, elapsed: Duration) {
        self.creates.fetch_add(1, Ordering::Relaxed);
        self.record_operation(elapsed);
    }

    pub(crate) fn record_update(&self, elapsed: Duration) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.record_operation(elapsed);
    }

    pub(crate) fn record_delete(&self, elapsed: Duration) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.record_operation(elapsed);
    }

    pub(crate) fn record_query(&self, elapsed: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.record_operation(elapsed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_operation(&self, elapsed: Duration) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.op_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.creates.store(0, Ordering::Relaxed);
        self.updates.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.queries.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
        self.op_micros.store(0, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let operations = self.operations.load(Ordering::Relaxed);
        let op_micros = self.op_micros.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            operations,
            avg_op_micros: if operations == 0 {
                0
            } else {
                op_micros / operations
            },
        }
    }
}

/// Point-in-time view of [`DatabaseStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    /// Collections served from the cache.
    pub cache_hits: u64,
    /// Collections loaded from disk.
    pub cache_misses: u64,
    /// Hits over total lookups; zero when nothing was looked up.
    pub hit_rate: f64,
    /// Records created.
    pub creates: u64,
    /// Records updated.
    pub updates: u64,
    /// Records deleted.
    pub deletes: u64,
    /// Queries served.
    pub queries: u64,
    /// Collections flushed to disk.
    pub flushes: u64,
    /// Errors encountered (foreground and background).
    pub errors: u64,
    /// Total timed operations.
    pub operations: u64,
    /// Mean operation latency in microseconds.
    pub avg_op_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DatabaseStats::new();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_create(Duration::from_micros(50));
        stats.record_query(Duration::from_micros(150));

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.creates, 1);
        assert_eq!(snap.queries, 1);
        assert_eq!(snap.operations, 2);
        assert_eq!(snap.avg_op_micros, 100);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = DatabaseStats::new();
        stats.record_cache_miss();
        stats.record_delete(Duration::from_micros(10));
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap, StatsSnapshot {
            cache_hits: 0,
            cache_misses: 0,
            hit_rate: 0.0,
            creates: 0,
            updates: 0,
            deletes: 0,
            queries: 0,
            flushes: 0,
            errors: 0,
            operations: 0,
            avg_op_micros: 0,
        });
    }

    #[test]
    fn concurrent_recording_is_safe() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_cache_hit();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().cache_hits, 4000);
    }
}
