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

//! Mode A: unconstrained sampling of attribute distributions (spec.md
//! §4.6). Grounded on `original_source/generator.py::synthesizeRowUnseeded`:
//! shuffle the column order, then for each column sample one value (or none)
//! weighted by its residual support under the filters accumulated so far.

use std::collections::HashMap;

use rand::{seq::SliceRandom, RngCore};
use rayon::prelude::*;

use crate::{
    data_block::DataBlock,
    rng::WorkerRngFactory,
    synthesizer::{
        sampling::{sample, support_len, FilterContext},
        SynthesisOutcome, SynthesizerConfig,
    },
};

/// Runs mode A across `cfg.parallel_jobs` workers, targeting
/// `block.num_records()` synthetic records (overshoot from uneven chunking
/// is trimmed away, per spec.md §4.6).
pub fn synthesize(block: &DataBlock, cfg: &SynthesizerConfig) -> SynthesisOutcome {
    let target = block.num_records();
    let jobs = cfg.parallel_jobs.max(1);
    let chunk = ((target + jobs - 1) / jobs).max(1);
    let chunks: Vec<usize> = {
        let mut remaining = target;
        let mut out = Vec::new();
        while remaining > 0 {
            let take = chunk.min(remaining);
            out.push(take);
            remaining -= take;
        }
        if out.is_empty() {
            out.push(0);
        }
        out
    };

    let rng_factory = WorkerRngFactory::new(cfg.root_seed);
    let partials: Vec<(Vec<Vec<crate::attribute::AttributeId>>, u64)> = chunks
        .par_iter()
        .enumerate()
        .map(|(worker, &count)| {
            let mut ctx = FilterContext::new(block, cfg.cache_max_size, cfg.memory_limit_pct);
            let mut rng = rng_factory.for_worker(worker);
            let mut records = Vec::with_capacity(count);
            for _ in 0..count {
                records.push(synthesize_one(block, &mut ctx, cfg.resolution, &mut rng));
            }
            (records, ctx.memory_pressure_events())
        })
        .collect();

    let mut records = Vec::with_capacity(target);
    let mut memory_pressure_events = 0u64;
    for (chunk_records, events) in partials {
        records.extend(chunk_records);
        memory_pressure_events += events;
    }
    records.truncate(target);

    SynthesisOutcome {
        records,
        available_atts: HashMap::new(),
        memory_pressure_events,
    }
}

fn synthesize_one(
    block: &DataBlock,
    ctx: &mut FilterContext,
    resolution: u32,
    rng: &mut dyn RngCore,
) -> Vec<crate::attribute::AttributeId> {
    let mut columns = block.columns().to_vec();
    columns.shuffle(rng);

    let mut filters: Vec<crate::attribute::AttributeId> = Vec::new();
    for col in &columns {
        let candidates = block.attribute_ids_for_column(col);
        if candidates.is_empty() {
            continue;
        }
        let mut counts = HashMap::new();
        for &candidate in candidates {
            let mut extended = filters.clone();
            extended.push(candidate);
            extended.sort_unstable();
            let support = ctx.support_of(&extended).len() as u64;
            if support >= resolution as u64 {
                counts.insert(candidate, support);
            }
        }
        let total_support = support_len(ctx, &filters);
        if let Some(chosen) = sample(rng, &counts, total_support, false) {
            filters.push(chosen);
            filters.sort_unstable();
        }
    }
    block.attributes().canonicalize(&filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn emits_target_record_count() {
        let columns = cols(&["A", "B"]);
        let rows = vec![
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["2", "y"]),
        ];
        let config = Configuration::default();
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let cfg = SynthesizerConfig {
            resolution: 2,
            cache_max_size: 100,
            memory_limit_pct: 100.0,
            parallel_jobs: 2,
            oversampling_ratio: 1.0,
            oversampling_tries: 0,
            use_synthetic_counts: false,
            root_seed: 7,
        };
        let outcome = synthesize(&block, &cfg);
        assert_eq!(outcome.records.len(), block.num_records());
    }

    #[test]
    fn every_prefix_of_every_record_meets_the_privacy_floor() {
        // spec.md §8 property 3.
        let columns = cols(&["A", "B"]);
        let rows = vec![
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "y"]),
            row(&["2", "y"]),
        ];
        let config = Configuration::default();
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let cfg = SynthesizerConfig {
            resolution: 3,
            cache_max_size: 100,
            memory_limit_pct: 100.0,
            parallel_jobs: 1,
            oversampling_ratio: 1.0,
            oversampling_tries: 0,
            use_synthetic_counts: false,
            root_seed: 3,
        };
        let mut ctx = FilterContext::new(&block, 100, 100.0);
        let outcome = synthesize(&block, &cfg);
        for record in &outcome.records {
            for i in 1..=record.len() {
                let prefix = &record[..i];
                assert!(ctx.support_of(prefix).len() as u32 >= cfg.resolution);
            }
        }
    }
}
