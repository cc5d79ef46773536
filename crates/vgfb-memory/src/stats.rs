//! Memory statistics collection.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory statistics shared by every store an allocator hands out.
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Total bytes currently held by live backing stores
    pub total_allocated: AtomicUsize,
    /// Number of live backing stores
    pub live_stores: AtomicUsize,
    /// Peak memory usage
    pub peak_usage: AtomicUsize,
}

/// Point-in-time copy of [`MemoryStats`], suitable for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_allocated: usize,
    pub live_stores: usize,
    pub peak_usage: usize,
}

impl MemoryStats {
    /// Create new memory stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `size` bytes against `limit`.
    ///
    /// Returns false, leaving the counters untouched, if the reservation
    /// would push the total past the limit.
    pub fn try_reserve(&self, size: usize, limit: usize) -> bool {
        let mut current = self.total_allocated.load(Ordering::Relaxed);
        loop {
            let Some(new_total) = current.checked_add(size).filter(|total| *total <= limit) else {
                return false;
            };
            match self.total_allocated.compare_exchange_weak(
                current,
                new_total,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.live_stores.fetch_add(1, Ordering::Relaxed);
                    self.bump_peak(new_total);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Record a store being freed.
    pub fn record_free(&self, size: usize) {
        self.total_allocated.fetch_sub(size, Ordering::Relaxed);
        self.live_stores.fetch_sub(1, Ordering::Relaxed);
    }

    fn bump_peak(&self, new_total: usize) {
        let mut peak = self.peak_usage.load(Ordering::Relaxed);
        while new_total > peak {
            match self.peak_usage.compare_exchange_weak(
                peak,
                new_total,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Get current total allocated bytes.
    pub fn total(&self) -> usize {
        self.total_allocated.load(Ordering::Relaxed)
    }

    /// Get peak memory usage.
    pub fn peak(&self) -> usize {
        self.peak_usage.load(Ordering::Relaxed)
    }

    /// Get number of live stores.
    pub fn store_count(&self) -> usize {
        self.live_stores.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_allocated: self.total(),
            live_stores: self.store_count(),
            peak_usage: self.peak(),
        }
    }

    /// Format memory size for display.
    pub fn format_bytes(bytes: usize) -> String {
        const KB: usize = 1024;
        const MB: usize = KB * 1024;
        const GB: usize = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}
