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

use std::collections::HashMap;

use ahash::AHashMap;
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    aggregates::AggregatesStore,
    combination::Combination,
    data_block::{DataBlock, RecordId},
};

/// Streams every k-subset (`k` in `1..=reporting_length`) of each record's
/// attributes into a combination count (C2), sharding records across
/// `rayon` workers and merging the per-shard partials.
///
/// Combinations are generated directly off each record's already-canonical
/// (sorted) attribute slice, so every combination `itertools::combinations`
/// yields is already in canonical order — no re-sort is needed per
/// combination.
pub struct CombinationCounter;

impl CombinationCounter {
    /// Count every combination up to `reporting_length` across `block`,
    /// fanning out over `parallel_jobs` workers.
    pub fn count(block: &DataBlock, reporting_length: usize, parallel_jobs: usize) -> AggregatesStore {
        let reporting_length = reporting_length.max(1);
        let event_scoped = block.has_subjects();
        let shards = shard_record_ids(block, parallel_jobs.max(1));

        let partials: Vec<AggregatesStore> = shards
            .par_iter()
            .map(|shard| count_shard(block, shard, reporting_length, event_scoped))
            .collect();

        let mut store = AggregatesStore::empty(block.num_records(), reporting_length, event_scoped);
        if let Some(num_subjects) = block.num_subjects() {
            store.set_subject_count(num_subjects);
        }
        for partial in &partials {
            store.merge_from(partial);
        }
        store
    }

    /// For each record, the shortest combination length at which it carries
    /// at least one combination whose count in `store` is either below
    /// `resolution` ("rare") or exactly `1` ("unique" — always charged
    /// regardless of `resolution`, including `resolution == 1` where no
    /// count can be `< resolution`), bucketed into a length -> record-count
    /// map. Records with no rare-or-unique combination at any length up to
    /// `store.reporting_length()` are bucketed under key `0`.
    ///
    /// Mirrors the original pipeline's shortest-unique-rare-combination
    /// record mapping: a record is charged at the *first* (shortest) length
    /// where it becomes distinguishable below the reporting resolution,
    /// since that is the length an attacker would use to re-identify it.
    pub fn records_analysis_by_length(
        block: &DataBlock,
        store: &AggregatesStore,
        resolution: u32,
    ) -> HashMap<usize, usize> {
        let reporting_length = store.reporting_length();
        let mut buckets: HashMap<usize, usize> = HashMap::new();
        for rid in 0..block.num_records() as RecordId {
            let attrs = block.record_attributes(rid);
            let width = attrs.len().min(reporting_length);
            let mut shortest_rare = None;
            'lengths: for k in 1..=width {
                for combo in attrs.iter().copied().combinations(k) {
                    if let Some(count) = store.get(&combo) {
                        if count.primary() < resolution as u64 || count.primary() == 1 {
                            shortest_rare = Some(k);
                            break 'lengths;
                        }
                    }
                }
            }
            *buckets.entry(shortest_rare.unwrap_or(0)).or_insert(0) += 1;
        }
        buckets
    }
}

/// Partitions record ids into up to `parallel_jobs` shards. In subject/event
/// mode, every event for a given subject is kept in the same shard so each
/// combination's subject-dedup bookkeeping stays local to one worker and
/// the merge step is a plain sum.
fn shard_record_ids(block: &DataBlock, parallel_jobs: usize) -> Vec<Vec<RecordId>> {
    if block.has_subjects() {
        let mut groups: AHashMap<u32, Vec<RecordId>> = AHashMap::default();
        for rid in 0..block.num_records() as RecordId {
            let sid = block.subject_of(rid).expect("has_subjects() checked above");
            groups.entry(sid).or_default().push(rid);
        }
        let mut group_list: Vec<Vec<RecordId>> = groups.into_values().collect();
        group_list.sort_by_key(|g| g[0]);
        partition_groups(group_list, parallel_jobs)
    } else {
        let n = block.num_records();
        if n == 0 {
            return vec![Vec::new()];
        }
        let chunk = ((n + parallel_jobs - 1) / parallel_jobs).max(1);
        (0..n as RecordId)
            .collect::<Vec<_>>()
            .chunks(chunk)
            .map(<[RecordId]>::to_vec)
            .collect()
    }
}

/// Greedily packs whole subject groups into shards targeting an even split
/// of total records, never splitting a group across shards.
fn partition_groups(groups: Vec<Vec<RecordId>>, parallel_jobs: usize) -> Vec<Vec<RecordId>> {
    let total: usize = groups.iter().map(Vec::len).sum();
    if total == 0 {
        return vec![Vec::new()];
    }
    let target = ((total + parallel_jobs - 1) / parallel_jobs).max(1);
    let mut shards = Vec::new();
    let mut current = Vec::new();
    for group in groups {
        if !current.is_empty() && current.len() + group.len() > target {
            shards.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        shards.push(current);
    }
    shards
}

fn count_shard(
    block: &DataBlock,
    shard: &[RecordId],
    reporting_length: usize,
    event_scoped: bool,
) -> AggregatesStore {
    let mut store = AggregatesStore::empty(shard.len(), reporting_length, event_scoped);
    // ahash: this map is rebuilt per shard per call and keyed by the
    // (already-canonical) combination itself, the hottest allocation in C2.
    let mut seen_by_combo: AHashMap<Combination, Vec<u32>> = AHashMap::default();
    for &rid in shard {
        let attrs = block.record_attributes(rid);
        let subject = block.subject_of(rid);
        let width = attrs.len().min(reporting_length);
        for k in 1..=width {
            for combo in attrs.iter().copied().combinations(k) {
                let seen = seen_by_combo.entry(combo.clone()).or_default();
                store.entry(combo).add_observation(subject, seen);
            }
        }
    }
    store
}
