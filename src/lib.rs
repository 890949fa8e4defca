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

//! Privacy-preserving synthetic microdata and reportable aggregates engine.
//!
//! Consumes an already-parsed categorical record table plus a
//! [`Configuration`] and produces a reportable [`AggregatesStore`] and a
//! synthetic record table. CSV/TSV parsing, CLI argument handling, and
//! multi-stage pipeline orchestration (aggregate → generate → evaluate →
//! navigate) are left to callers; this crate wires together C1 through C7
//! for a single run.

pub mod aggregates;
pub mod attribute;
pub mod cache;
pub mod combination;
pub mod combination_counter;
pub mod config;
pub mod consolidation;
pub mod data_block;
pub mod error;
pub mod generator;
pub mod protector;
pub mod reconciler;
pub mod rng;
pub mod synthesizer;

use std::collections::HashMap;

use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use crate::{
    aggregates::{AggregatesStore, ReportableAggregatesStore},
    combination::Combination,
    combination_counter::CombinationCounter,
    config::{Configuration, SynthesisMode},
    data_block::DataBlock,
    error::Result,
    protector::ProtectorStrategy,
    synthesizer::{SynthesisOutcome, SynthesizerConfig},
};

/// Everything a single engine run produces: the sensitive aggregates (never
/// released), the reportable aggregates (privacy-protected, release-safe),
/// and the final synthetic record table.
pub struct Outcome {
    pub sensitive: AggregatesStore,
    pub reportable: ReportableAggregatesStore,
    pub synthetic_records: Vec<Combination>,
    /// How many `FilterCache` insertions were skipped across all synthesis
    /// workers due to memory pressure (spec.md §7's `MemoryPressure` flag).
    pub memory_pressure_events: u64,
}

/// Runs the full C1 → C7 pipeline once: build the data block, count
/// combinations, privacy-protect them, synthesize records, reconcile, and
/// (on the seeded paths) consolidate leftover attribute budget into extra
/// records.
pub fn run(rows: &[Vec<String>], columns: &[String], config: &Configuration) -> Result<Outcome> {
    config.validate()?;

    info!(records = rows.len(), columns = columns.len(), "building data block");
    let block = DataBlock::build(rows, columns, config)?;
    let reporting_length = block.normalize_reporting_length(config.reporting_length, config);
    let parallel_jobs = config.effective_parallel_jobs();

    info!(reporting_length, parallel_jobs, "counting combinations");
    let sensitive = CombinationCounter::count(&block, reporting_length, parallel_jobs);

    info!("protecting aggregates");
    let strategy = ProtectorStrategy::from_config(config);
    let mut protect_rng = StdRng::seed_from_u64(config.root_seed);
    let reportable = strategy.protect(&block, &sensitive, &mut protect_rng)?;

    info!(mode = ?config.synthesis_mode, "synthesizing records");
    let synth_cfg = SynthesizerConfig::from_config(config);
    let SynthesisOutcome {
        records,
        available_atts,
        memory_pressure_events,
    } = synthesizer::synthesize(&block, &reportable, config.synthesis_mode, &synth_cfg);
    if memory_pressure_events > 0 {
        tracing::warn!(memory_pressure_events, "synthesis ran in degraded (cache-limited) mode");
    }

    info!(records = records.len(), "reconciling synthetic records");
    let mut reconcile_rng = StdRng::seed_from_u64(config.root_seed.wrapping_add(1));
    let reconciled = reconciler::reconcile(
        records,
        &reportable,
        config.reporting_resolution,
        &mut reconcile_rng,
    );

    let seeded = matches!(
        config.synthesis_mode,
        SynthesisMode::RowSeeded | SynthesisMode::ValueSeeded
    );
    let mut synthetic_records = reconciled;
    if seeded {
        info!(available_attributes = available_atts.len(), "consolidating leftover attribute budget");
        let extra = consolidation::consolidate(
            &block,
            &reportable,
            &available_atts,
            &synthetic_records,
            &synth_cfg,
        );
        info!(extra_records = extra.len(), "consolidation complete");
        synthetic_records.extend(extra);
    }

    sort_output(&mut synthetic_records);

    Ok(Outcome {
        sensitive,
        reportable,
        synthetic_records,
        memory_pressure_events,
    })
}

/// Sorts the final record table: primarily by the record's attribute
/// tuple ascending, secondarily by non-empty-attribute count descending
/// (spec.md §5). Both keys are applied via stable sorts, so the second
/// sort's ties preserve the first sort's order.
fn sort_output(records: &mut [Combination]) {
    records.sort();
    records.sort_by_key(|r| std::cmp::Reverse(r.len()));
}

/// Attribute counts across `records`, for callers that want to compare
/// synthetic marginals against the reportable store without re-deriving
/// them (e.g. reporting S5's reconciliation-match invariant).
pub fn observed_attribute_counts(
    records: &[Combination],
) -> HashMap<attribute::AttributeId, u64> {
    let mut counts = HashMap::new();
    for record in records {
        for &a in record {
            *counts.entry(a).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Surfaces this crate's `tracing::info!`/`warn!` stage logs under
    /// `cargo test -- --nocapture`; harmless (and ignored) if a subscriber
    /// is already installed.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn end_to_end_row_seeded_run_produces_reconciled_output() {
        init_tracing();
        let columns = cols(&["A", "B"]);
        let rows: Vec<_> = (0..20)
            .map(|i| row(&["1", if i % 2 == 0 { "x" } else { "y" }]))
            .collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 3;
        config.parallel_jobs = 2;

        let outcome = run(&rows, &columns, &config).unwrap();
        assert!(!outcome.synthetic_records.is_empty());
        assert_eq!(outcome.sensitive.record_count(), 20);

        // Output is sorted: non-empty-attribute count descending.
        let widths: Vec<usize> = outcome.synthetic_records.iter().map(Vec::len).collect();
        for pair in widths.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn end_to_end_unseeded_run_skips_consolidation() {
        let columns = cols(&["A", "B"]);
        let rows: Vec<_> = (0..10).map(|_| row(&["1", "x"])).collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 2;
        config.synthesis_mode = SynthesisMode::Unseeded;

        let outcome = run(&rows, &columns, &config).unwrap();
        assert_eq!(outcome.synthetic_records.len(), 10);
    }

    #[test]
    fn end_to_end_aggregate_seeded_run_matches_record_count() {
        let columns = cols(&["A", "B"]);
        let rows: Vec<_> = (0..10).map(|_| row(&["1", "x"])).collect();
        let mut config = Configuration::default();
        config.reporting_resolution = 2;
        config.synthesis_mode = SynthesisMode::AggregateSeeded;

        let outcome = run(&rows, &columns, &config).unwrap();
        assert_eq!(outcome.synthetic_records.len(), 10);
    }

    #[test]
    fn invalid_configuration_is_rejected_before_building_the_block() {
        let columns = cols(&["A"]);
        let rows = vec![row(&["1"])];
        let config = Configuration {
            oversampling_ratio: -1.0,
            ..Configuration::default()
        };
        assert!(run(&rows, &columns, &config).is_err());
    }
}
