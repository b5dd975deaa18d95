//! LRU cache of curve tables

use super::HilbertCurve;
use crate::error::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

/// Tables kept when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 4;

/// Memoised index -> coordinate tables, keyed by curve order
///
/// Owned by whichever session needs it (encoder, decoder); never shared.
pub struct CurveCache {
    tables: LruCache<u32, Vec<(u32, u32)>>,
    hit_count: u64,
    miss_count: u64,
}

impl CurveCache {
    /// Create a new cache holding at most `capacity` tables
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tables: LruCache::new(capacity),
            hit_count: 0,
            miss_count: 0,
        }
    }

    /// Get the table for `order`, building it on a miss
    pub fn table(&mut self, order: u32) -> Result<&[(u32, u32)]> {
        if self.tables.contains(&order) {
            self.hit_count += 1;
        } else {
            let curve = HilbertCurve::new(order)?;
            debug!(order, cells = curve.len(), "Building curve table");
            self.tables.put(order, curve.table());
            self.miss_count += 1;
        }
        // Present: inserted above or already cached
        Ok(self
            .tables
            .get(&order)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Drop all cached tables
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CurveCacheStats {
        let total = self.hit_count + self.miss_count;
        let hit_rate = if total > 0 {
            self.hit_count as f64 / total as f64
        } else {
            0.0
        };

        CurveCacheStats {
            hits: self.hit_count,
            misses: self.miss_count,
            hit_rate,
            size: self.tables.len(),
            capacity: self.tables.cap().get(),
        }
    }
}

impl Default for CurveCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CurveCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}
