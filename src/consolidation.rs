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

//! C7: `ConsolidationPlanner`, the seeded-path-only pass that turns leftover
//! attribute budget into extra synthetic records (spec.md §4.8). Grounded on
//! `original_source/generator.py::divideAndConsolidate`/`consolidate`/
//! `consolidateRecord`: ceil-divide the budget across workers, then each
//! worker greedily assembles records from its own copy, always preferring a
//! non-null extension, until no candidate qualifies.
//!
//! Budget combines two sources per spec.md §4.8: leftover `available_atts`
//! from modes B/C, plus `max(0, reportable - observed)` for every
//! single-attribute combination — the latter tops back up attributes that
//! came in under their reportable count (possible after DP noise), which
//! the original pipeline's `available_atts`-only budget never did.

use std::collections::HashMap;

use rand::RngCore;
use rayon::prelude::*;

use crate::{
    aggregates::AggregatesStore,
    attribute::AttributeId,
    combination::Combination,
    data_block::DataBlock,
    rng::WorkerRngFactory,
    synthesizer::{
        sampling::{extend, residual_counts, sample, support_len, FilterContext},
        SynthesizerConfig,
    },
};

/// Computes the consolidation budget: `available_atts` plus
/// `max(0, reportable - observed)`, restricted to attributes whose
/// reportable single-attribute count exists.
fn compute_budget(
    reportable: &AggregatesStore,
    available_atts: &HashMap<AttributeId, u64>,
    reconciled_records: &[Combination],
) -> HashMap<AttributeId, u64> {
    let mut observed: HashMap<AttributeId, u64> = HashMap::new();
    for record in reconciled_records {
        for &a in record {
            *observed.entry(a).or_insert(0) += 1;
        }
    }

    let mut budget: HashMap<AttributeId, u64> = available_atts
        .iter()
        .filter(|&(_, &n)| n > 0)
        .map(|(&a, &n)| (a, n))
        .collect();

    for (combo, count) in reportable.length(1) {
        let a = combo[0];
        let reportable_count = count.primary();
        let observed_count = observed.get(&a).copied().unwrap_or(0);
        let shortfall = reportable_count.saturating_sub(observed_count);
        if shortfall > 0 {
            *budget.entry(a).or_insert(0) += shortfall;
        }
    }

    budget
}

/// Assembles one record greedily from `budget`, decrementing as it goes.
/// Returns an empty combination once no remaining attribute can extend the
/// current prefix at `>= resolution` support — callers must stop calling
/// this once it returns empty, since the same stall recurs forever
/// otherwise (the budget that failed to place stays unchanged).
fn consolidate_record(
    ctx: &mut FilterContext,
    budget: &mut HashMap<AttributeId, u64>,
    resolution: u32,
    rng: &mut dyn RngCore,
) -> Combination {
    let mut filters: Combination = Vec::new();
    loop {
        if budget.is_empty() {
            break;
        }
        let candidates: Vec<AttributeId> = budget.keys().copied().collect();
        let counts = residual_counts(ctx, &filters, candidates, &[], resolution);
        let total_support = support_len(ctx, &filters);
        match sample(rng, &counts, total_support, true) {
            Some(a) => {
                filters = extend(ctx.block().attributes(), &filters, a);
                let exhausted = {
                    let remaining = budget.get_mut(&a).expect("sampled only from budget keys");
                    *remaining -= 1;
                    *remaining == 0
                };
                if exhausted {
                    budget.remove(&a);
                }
            }
            None => break,
        }
    }
    filters
}

/// Runs consolidation across `cfg.parallel_jobs` workers. Each worker gets
/// its own ceil-divided copy of the full budget and assembles records
/// independently until that copy is either exhausted or stalls.
pub fn consolidate(
    block: &DataBlock,
    reportable: &AggregatesStore,
    available_atts: &HashMap<AttributeId, u64>,
    reconciled_records: &[Combination],
    cfg: &SynthesizerConfig,
) -> Vec<Combination> {
    let budget = compute_budget(reportable, available_atts, reconciled_records);
    if budget.is_empty() {
        return Vec::new();
    }

    let jobs = cfg.parallel_jobs.max(1) as u64;
    let per_worker_budget: HashMap<AttributeId, u64> = budget
        .iter()
        .map(|(&a, &n)| (a, (n + jobs - 1) / jobs))
        .collect();

    let rng_factory = WorkerRngFactory::new(cfg.root_seed);
    let partials: Vec<Vec<Combination>> = (0..jobs as usize)
        .into_par_iter()
        .map(|worker| {
            let mut ctx = FilterContext::new(block, cfg.cache_max_size, cfg.memory_limit_pct);
            let mut rng = rng_factory.for_worker(worker);
            let mut local_budget = per_worker_budget.clone();
            let mut records = Vec::new();
            while !local_budget.is_empty() {
                let record = consolidate_record(&mut ctx, &mut local_budget, cfg.resolution, &mut rng);
                if record.is_empty() {
                    break;
                }
                records.push(record);
            }
            records
        })
        .collect();

    partials.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        combination_counter::CombinationCounter, config::Configuration, protector::ProtectorStrategy,
        synthesizer::SynthesizerConfig,
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn consolidates_leftover_budget_into_new_records() {
        let columns = cols(&["A", "B"]);
        let rows: Vec<_> = (0..12)
            .map(|i| row(&["1", if i % 2 == 0 { "x" } else { "y" }]))
            .collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 2;
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = CombinationCounter::count(&block, 2, 1);
        let strategy = ProtectorStrategy::from_config(&config);
        let mut rng = StdRng::seed_from_u64(6);
        let reportable = strategy.protect(&block, &store, &mut rng).unwrap();

        let a1 = block.attribute_id("A", "1").unwrap();
        let bx = block.attribute_id("B", "x").unwrap();
        let mut available_atts = HashMap::new();
        available_atts.insert(a1, 4u64);
        available_atts.insert(bx, 2u64);

        let cfg = SynthesizerConfig::from_config(&config);
        let new_records = consolidate(&block, &reportable, &available_atts, &[], &cfg);
        assert!(!new_records.is_empty());
        for record in &new_records {
            for i in 1..=record.len() {
                assert!(!record[..i].is_empty());
            }
        }
    }

    #[test]
    fn empty_budget_yields_no_records() {
        // no leftover `available_atts`, and the reconciled records already
        // account for every reportable single-attribute count in full, so
        // the shortfall term contributes nothing either.
        let columns = cols(&["A"]);
        let rows = vec![row(&["1"]), row(&["1"])];
        let config = Configuration::default();
        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = CombinationCounter::count(&block, 1, 1);
        let strategy = ProtectorStrategy::from_config(&config);
        let mut rng = StdRng::seed_from_u64(7);
        let reportable = strategy.protect(&block, &store, &mut rng).unwrap();
        let a1 = block.attribute_id("A", "1").unwrap();
        let reportable_count = reportable.get(&[a1]).unwrap().primary();
        let reconciled_records: Vec<Combination> =
            (0..reportable_count).map(|_| vec![a1]).collect();

        let cfg = SynthesizerConfig::from_config(&config);
        let new_records = consolidate(&block, &reportable, &HashMap::new(), &reconciled_records, &cfg);
        assert!(new_records.is_empty());
    }
}
