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

//! C5: four synthesis modes sharing the primitives in [`sampling`] (spec.md
//! §4.6, §9's "Polymorphism over Synthesizer mode").

pub mod aggregate_seeded;
pub mod row_seeded;
pub mod sampling;
pub mod unseeded;
pub mod value_seeded;

use std::collections::HashMap;

use crate::{
    aggregates::AggregatesStore,
    attribute::AttributeId,
    combination::Combination,
    config::{Configuration, SynthesisMode},
    data_block::DataBlock,
};

/// A synthesized record: a canonical sorted tuple of attribute ids.
pub type SyntheticRecord = Combination;

/// Tuning parameters threaded through every synthesis mode, collected from
/// [`Configuration`] once per run.
#[derive(Debug, Clone, Copy)]
pub struct SynthesizerConfig {
    pub resolution: u32,
    pub cache_max_size: usize,
    pub memory_limit_pct: f64,
    pub parallel_jobs: usize,
    pub oversampling_ratio: f64,
    pub oversampling_tries: usize,
    pub use_synthetic_counts: bool,
    pub root_seed: u64,
}

impl SynthesizerConfig {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            resolution: config.reporting_resolution,
            cache_max_size: config.cache_max_size,
            memory_limit_pct: config.memory_limit_pct,
            parallel_jobs: config.effective_parallel_jobs(),
            oversampling_ratio: config.oversampling_ratio,
            oversampling_tries: config.oversampling_tries,
            use_synthetic_counts: config.use_synthetic_counts,
            root_seed: config.root_seed,
        }
    }
}

/// Result of a synthesis run, before reconciliation (C6).
#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    pub records: Vec<SyntheticRecord>,
    /// Unused seed attributes, one count per attribute (modes B/C only).
    /// Fed into C7's `ConsolidationPlanner`.
    pub available_atts: HashMap<AttributeId, u64>,
    /// How many `FilterCache` insertions were skipped across all workers
    /// due to memory pressure (spec.md §7, `MemoryPressure`).
    pub memory_pressure_events: u64,
}

/// Runs the configured synthesis mode (spec.md §4.6).
///
/// `reportable` is consulted by mode D (the only mode that never touches raw
/// records) and by mode C's oversampling pass; modes A and B ignore it.
pub fn synthesize(
    block: &DataBlock,
    reportable: &AggregatesStore,
    mode: SynthesisMode,
    cfg: &SynthesizerConfig,
) -> SynthesisOutcome {
    match mode {
        SynthesisMode::Unseeded => unseeded::synthesize(block, cfg),
        SynthesisMode::RowSeeded => row_seeded::synthesize(block, cfg),
        SynthesisMode::ValueSeeded => value_seeded::synthesize(block, reportable, cfg),
        SynthesisMode::AggregateSeeded => aggregate_seeded::synthesize(block, reportable, cfg),
    }
}
