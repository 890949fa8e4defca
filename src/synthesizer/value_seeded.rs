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

//! Mode C: row-seeded synthesis plus bounded oversampling (spec.md §4.6).
//!
//! Builds the same base record as mode B (`row_seeded::walk`), then tries
//! to extend it with additional leftover seed attributes, each checked
//! against the *reportable* store (rather than the sensitive index) so
//! oversampled records still honor the released, privacy-protected counts.
//! Bounded by `oversampling_tries` (attempts per seed) and
//! `oversampling_ratio` (max synthetic records per seed, rounded to the
//! nearest integer >= 1 — see DESIGN.md for why this crate resolves the
//! ratio this way).

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::{
    aggregates::AggregatesStore,
    attribute::AttributeId,
    combination::Combination,
    data_block::{DataBlock, RecordId},
    rng::WorkerRngFactory,
    synthesizer::{
        row_seeded::walk,
        sampling::FilterContext,
        SynthesisOutcome, SynthesizerConfig,
    },
};

pub fn synthesize(
    block: &DataBlock,
    reportable: &AggregatesStore,
    cfg: &SynthesizerConfig,
) -> SynthesisOutcome {
    let n = block.num_records();
    let jobs = cfg.parallel_jobs.max(1);
    let chunk = ((n + jobs - 1) / jobs).max(1);
    let shards: Vec<Vec<RecordId>> = (0..n as RecordId)
        .collect::<Vec<_>>()
        .chunks(chunk.max(1))
        .map(<[RecordId]>::to_vec)
        .collect();

    let per_seed_cap = cfg.oversampling_ratio.round().max(1.0) as usize;
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
                let base = walk(&mut ctx, &seed, cfg.resolution, &mut rng);
                let mut leftover: Vec<AttributeId> = seed
                    .iter()
                    .copied()
                    .filter(|a| !base.contains(a))
                    .collect();
                leftover.shuffle(&mut rng);

                let mut emitted = Vec::new();
                if !base.is_empty() {
                    emitted.push(base.clone());
                }

                let mut tries = 0usize;
                while emitted.len() < per_seed_cap
                    && tries < cfg.oversampling_tries
                    && !leftover.is_empty()
                {
                    tries += 1;
                    let mut found = None;
                    for (idx, &candidate) in leftover.iter().enumerate() {
                        let extended = block.attributes().canonicalize(
                            &base.iter().copied().chain(std::iter::once(candidate)).collect::<Vec<_>>(),
                        );
                        let meets_floor = reportable
                            .get(&extended)
                            .map(|count| count.primary() >= cfg.resolution as u64)
                            .unwrap_or(false);
                        if meets_floor {
                            found = Some((idx, extended));
                            break;
                        }
                    }
                    match found {
                        Some((idx, extended)) => {
                            leftover.remove(idx);
                            emitted.push(extended);
                        }
                        None => break,
                    }
                }

                let used: std::collections::HashSet<AttributeId> =
                    emitted.iter().flatten().copied().collect();
                for &a in &seed {
                    if !used.contains(&a) {
                        *available.entry(a).or_insert(0) += 1;
                    }
                }
                records.extend(emitted);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{combination_counter::CombinationCounter, config::Configuration, protector::ProtectorStrategy};
    use rand::{rngs::StdRng, SeedableRng};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn oversampling_never_exceeds_the_per_seed_cap() {
        let columns = cols(&["A", "B", "C"]);
        let rows: Vec<_> = (0..12)
            .map(|i| row(&["1", if i % 2 == 0 { "x" } else { "y" }, "z"]))
            .collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 2;
        config.oversampling_ratio = 2.0;
        config.oversampling_tries = 5;
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = CombinationCounter::count(&block, 3, 1);
        let strategy = ProtectorStrategy::from_config(&config);
        let mut rng = StdRng::seed_from_u64(9);
        let reportable = strategy.protect(&block, &store, &mut rng).unwrap();

        let cfg = SynthesizerConfig::from_config(&config);
        let outcome = synthesize(&block, &reportable, &cfg);
        // at most 2 records emitted per seed row.
        assert!(outcome.records.len() <= block.num_records() * 2);
    }

    #[test]
    fn oversampled_prefixes_appear_in_the_reportable_store() {
        let columns = cols(&["A", "B"]);
        let rows: Vec<_> = (0..10).map(|_| row(&["1", "x"])).collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 2;
        config.oversampling_ratio = 2.0;
        config.oversampling_tries = 3;
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = CombinationCounter::count(&block, 2, 1);
        let strategy = ProtectorStrategy::from_config(&config);
        let mut rng = StdRng::seed_from_u64(4);
        let reportable = strategy.protect(&block, &store, &mut rng).unwrap();

        let cfg = SynthesizerConfig::from_config(&config);
        let outcome = synthesize(&block, &reportable, &cfg);
        for record in &outcome.records {
            if record.len() > 1 {
                assert!(reportable.get(record).is_some());
            }
        }
    }
}
