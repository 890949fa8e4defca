//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use sysinfo::System;

use crate::{attribute::AttributeId, data_block::RecordId};

/// Sorted list of record ids satisfying a filter (a combination's support
/// set, or an intersection thereof).
pub type RecordIdSet = Vec<RecordId>;

/// Per-worker LRU cache of combination -> matching record-id set (spec.md
/// §5). Never shared across workers: each synthesis worker owns one, so
/// cache contention never needs synchronization.
///
/// Insertion (not lookup) is gated by a `sysinfo` memory-pressure probe,
/// matching the original pipeline's `psutil.virtual_memory()[2] <=
/// memory_limit` check before caching a filter result.
pub struct FilterCache {
    cache: LruCache<Vec<AttributeId>, Arc<RecordIdSet>>,
    memory_limit_pct: f64,
    system: System,
    /// Count of insertions skipped due to memory pressure (spec.md §7's
    /// `MemoryPressure` degraded-mode flag is derived from this at the
    /// synthesizer level rather than being tracked here as a bool).
    skipped_insertions: u64,
}

impl FilterCache {
    pub fn new(max_size: usize, memory_limit_pct: f64) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).expect("max(1) is never zero");
        Self {
            cache: LruCache::new(capacity),
            memory_limit_pct,
            system: System::new(),
            skipped_insertions: 0,
        }
    }

    /// Number of insertions skipped so far because resident memory was
    /// above `memory_limit_pct`.
    pub fn skipped_insertions(&self) -> u64 {
        self.skipped_insertions
    }

    /// Look up a cached record-id set. Always allowed, regardless of
    /// memory pressure: a hit only frees memory by avoiding recomputation.
    pub fn get(&mut self, key: &[AttributeId]) -> Option<Arc<RecordIdSet>> {
        self.cache.get(key).cloned()
    }

    /// Insert a freshly computed record-id set, unless resident memory is
    /// already above `memory_limit_pct`.
    pub fn insert(&mut self, key: Vec<AttributeId>, value: Arc<RecordIdSet>) {
        if self.memory_pressure_exceeded() {
            self.skipped_insertions += 1;
            return;
        }
        self.cache.put(key, value);
    }

    fn memory_pressure_exceeded(&mut self) -> bool {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return false;
        }
        let used_pct = self.system.used_memory() as f64 / total as f64 * 100.0;
        used_pct > self.memory_limit_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_insert_then_hit() {
        let mut cache = FilterCache::new(8, 100.0);
        let key = vec![AttributeId(1), AttributeId(2)];
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), Arc::new(vec![0, 1, 2]));
        assert_eq!(cache.get(&key).as_deref(), Some(&vec![0, 1, 2]));
    }

    #[test]
    fn insert_is_skipped_under_simulated_memory_pressure() {
        let mut cache = FilterCache::new(8, 0.0);
        let key = vec![AttributeId(1)];
        cache.insert(key.clone(), Arc::new(vec![0]));
        // a 0% limit is exceeded by any real memory usage, so the
        // insertion above should have been dropped.
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.skipped_insertions(), 1);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = FilterCache::new(1, 100.0);
        let a = vec![AttributeId(1)];
        let b = vec![AttributeId(2)];
        cache.insert(a.clone(), Arc::new(vec![0]));
        cache.insert(b.clone(), Arc::new(vec![1]));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
    }
}
