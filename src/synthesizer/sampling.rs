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

//! Shared primitives reused by all four synthesis modes (spec.md §4.6):
//! `residual_counts`, `sample`, `extend`, all built on one per-worker
//! [`FilterCache`]-backed intersection context.

use std::{collections::HashMap, sync::Arc};

use rand::RngCore;

use crate::{
    attribute::{AttributeId, AttributeTable},
    cache::{FilterCache, RecordIdSet},
    combination::Combination,
    data_block::{DataBlock, RecordId},
    generator::{
        discrete::{Choice, DiscreteGenerator},
        Generator,
    },
};

/// Owns one worker's [`FilterCache`] and answers "which records match this
/// filter" queries against a shared, read-only [`DataBlock`].
pub struct FilterContext<'a> {
    block: &'a DataBlock,
    cache: FilterCache,
}

impl<'a> FilterContext<'a> {
    pub fn new(block: &'a DataBlock, cache_max_size: usize, memory_limit_pct: f64) -> Self {
        Self {
            block,
            cache: FilterCache::new(cache_max_size, memory_limit_pct),
        }
    }

    pub fn block(&self) -> &'a DataBlock {
        self.block
    }

    /// Number of cache insertions this worker skipped due to memory
    /// pressure (spec.md §7's `MemoryPressure` degraded-mode signal).
    pub fn memory_pressure_events(&self) -> u64 {
        self.cache.skipped_insertions()
    }

    /// Record ids matching every attribute in `filters` (all records, if
    /// `filters` is empty).
    pub fn support_of(&mut self, filters: &[AttributeId]) -> Arc<RecordIdSet> {
        if filters.is_empty() {
            return Arc::new((0..self.block.num_records() as RecordId).collect());
        }
        if let Some(hit) = self.cache.get(filters) {
            return hit;
        }
        let mut ids = filters.iter();
        let mut acc: Vec<RecordId> = self.block.records_containing(*ids.next().unwrap()).to_vec();
        for &att in ids {
            acc = intersect_sorted(&acc, self.block.records_containing(att));
        }
        let result = Arc::new(acc);
        self.cache.insert(filters.to_vec(), result.clone());
        result
    }
}

fn intersect_sorted(a: &[RecordId], b: &[RecordId]) -> Vec<RecordId> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Support (record count) for each `candidates` attribute not already in
/// `filters` or `disallowed`, restricted to those whose extended support
/// is `>= resolution` (spec.md §4.6's shared `residual_counts`).
pub fn residual_counts(
    ctx: &mut FilterContext,
    filters: &[AttributeId],
    candidates: impl IntoIterator<Item = AttributeId>,
    disallowed: &[AttributeId],
    resolution: u32,
) -> HashMap<AttributeId, u64> {
    let mut out = HashMap::new();
    for candidate in candidates {
        if filters.contains(&candidate) || disallowed.contains(&candidate) {
            continue;
        }
        let mut extended = filters.to_vec();
        extended.push(candidate);
        extended.sort_unstable();
        let support = ctx.support_of(&extended).len() as u64;
        if support >= resolution as u64 {
            out.insert(candidate, support);
        }
    }
    out
}

/// Draws one attribute from a residual-counts map, weighted by support.
///
/// When `prefer_non_null` is set, the null ("stop extending here") outcome
/// is excluded from the distribution entirely rather than drawn-then-
/// rejected-then-resampled: both converge to the same conditional
/// distribution over non-null outcomes, without an unbounded retry loop.
pub fn sample(
    rng: &mut dyn RngCore,
    counts: &HashMap<AttributeId, u64>,
    total_support: u64,
    prefer_non_null: bool,
) -> Option<AttributeId> {
    if counts.is_empty() {
        return None;
    }
    let mut choices: Vec<Choice<Option<AttributeId>>> = counts
        .iter()
        .map(|(&id, &support)| Choice {
            val: Some(id),
            weight: support as f64,
        })
        .collect();
    if !prefer_non_null {
        let candidate_sum: u64 = counts.values().sum();
        let null_weight = total_support.saturating_sub(candidate_sum) as f64;
        if null_weight > 0.0 {
            choices.push(Choice {
                val: None,
                weight: null_weight,
            });
        }
    }
    let generator = DiscreteGenerator::new(choices);
    generator.next(rng).flatten()
}

/// Extend `filters` with `attribute`, re-canonicalizing.
pub fn extend(table: &AttributeTable, filters: &[AttributeId], attribute: AttributeId) -> Combination {
    let mut combo = filters.to_vec();
    combo.push(attribute);
    table.canonicalize(&combo)
}

/// Support (record count) of `filters` as-is, for use as the `total_support`
/// argument to [`sample`].
pub fn support_len(ctx: &mut FilterContext, filters: &[AttributeId]) -> u64 {
    ctx.support_of(filters).len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use rand::{rngs::StdRng, SeedableRng};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn residual_counts_drops_below_resolution_candidates() {
        let columns = cols(&["A", "B"]);
        let rows = vec![
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "y"]),
        ];
        let config = Configuration::default();
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let mut ctx = FilterContext::new(&block, 100, 100.0);
        let bx = block.attribute_id("B", "x").unwrap();
        let by = block.attribute_id("B", "y").unwrap();
        let counts = residual_counts(&mut ctx, &[], [bx, by], &[], 2);
        assert_eq!(counts.get(&bx), Some(&2));
        assert_eq!(counts.get(&by), None);
    }

    #[test]
    fn sample_only_returns_weighted_candidates() {
        let mut counts = HashMap::new();
        counts.insert(AttributeId(0), 5u64);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(sample(&mut rng, &counts, 5, true), Some(AttributeId(0)));
        }
    }

    #[test]
    fn sample_empty_counts_yields_none() {
        let counts = HashMap::new();
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(sample(&mut rng, &counts, 0, true), None);
    }
}
