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

//! Mode B: row-seeded synthesis (spec.md §4.6). Grounded on
//! `original_source/generator.py::synthesizeRowSeeded`: walk a sensitive
//! record's own attributes, keeping only the privacy-safe prefix; leftover
//! (unused) seed attributes feed C7's `ConsolidationPlanner`.

use std::collections::HashMap;

use rand::RngCore;
use rayon::prelude::*;

use crate::{
    attribute::AttributeId,
    combination::Combination,
    data_block::{DataBlock, RecordId},
    rng::WorkerRngFactory,
    synthesizer::{
        sampling::{extend, residual_counts, sample, support_len, FilterContext},
        SynthesisOutcome, SynthesizerConfig,
    },
};

/// Walks `candidates` (a seed record's attributes, or any other fixed pool)
/// under `ctx`'s sensitive index, repeatedly sampling the next attribute
/// whose extended support is `>= resolution`, until no candidate qualifies.
///
/// Shared by modes B and C (spec.md §4.6's common synthesizer primitives).
pub fn walk(
    ctx: &mut FilterContext,
    candidates: &[AttributeId],
    resolution: u32,
    rng: &mut dyn RngCore,
) -> Combination {
    let table = ctx.block().attributes();
    let mut filters: Vec<AttributeId> = Vec::new();
    loop {
        let counts = residual_counts(ctx, &filters, candidates.iter().copied(), &[], resolution);
        let total_support = support_len(ctx, &filters);
        let prefer_non_null = filters.is_empty();
        match sample(rng, &counts, total_support, prefer_non_null) {
            Some(a) => filters = extend(table, &filters, a),
            None => break,
        }
    }
    filters
}

/// Runs mode B across `cfg.parallel_jobs` workers, one seed per sensitive
/// record.
pub fn synthesize(block: &DataBlock, cfg: &SynthesizerConfig) -> SynthesisOutcome {
    let n = block.num_records();
    let jobs = cfg.parallel_jobs.max(1);
    let chunk = ((n + jobs - 1) / jobs).max(1);
    let shards: Vec<Vec<RecordId>> = (0..n as RecordId)
        .collect::<Vec<_>>()
        .chunks(chunk.max(1))
        .map(<[RecordId]>::to_vec)
        .collect();

    let rng_factory = WorkerRngFactory::new(cfg.root_seed);
    let partials: Vec<(Vec<Combination>, HashMap<AttributeId, u64>, u64)> = shards
        .par_iter()
        .enumerate()
        .map(|(worker, shard)| {
            let mut ctx = FilterContext::new(block, cfg.cache_max_size, cfg.memory_limit_pct);
            let mut rng = rng_factory.for_worker(worker);
            let mut records = Vec::with_capacity(shard.len());
            let mut available: HashMap<AttributeId, u64> = HashMap::new();
            for &rid in shard {
                let seed = block.record_attributes(rid).to_vec();
                let filters = walk(&mut ctx, &seed, cfg.resolution, &mut rng);
                for &a in &seed {
                    if !filters.contains(&a) {
                        *available.entry(a).or_insert(0) += 1;
                    }
                }
                if !filters.is_empty() {
                    records.push(filters);
                }
            }
            (records, available, ctx.memory_pressure_events())
        })
        .collect();

    let mut records = Vec::new();
    let mut available_atts: HashMap<AttributeId, u64> = HashMap::new();
    let mut memory_pressure_events = 0u64;
    for (chunk_records, available, events) in partials {
        records.extend(chunk_records);
        for (a, n) in available {
            *available_atts.entry(a).or_insert(0) += n;
        }
        memory_pressure_events += events;
    }

    SynthesisOutcome {
        records,
        available_atts,
        memory_pressure_events,
    }
}
