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

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Which synthesis strategy to run (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Unconstrained sampling of attribute distributions.
    Unseeded,
    /// Walk each sensitive record, keeping only the privacy-safe prefix.
    RowSeeded,
    /// Row-seeded plus bounded oversampling against the reportable store.
    ValueSeeded,
    /// Sample only from the reportable aggregates, never touching raw records.
    AggregateSeeded,
}

/// Fixed vs adaptive DP threshold selection (spec.md §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseThresholdType {
    /// Drop combinations with noised count below a configured per-length value.
    Fixed,
    /// Choose the threshold so the expected false-positive rate stays below a target.
    Adaptive,
}

/// All recognized configuration options (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Restrict to these columns; empty = all.
    #[serde(default)]
    pub use_columns: Vec<String>,
    /// Columns in which `"0"` is a real value rather than "absent".
    #[serde(default)]
    pub sensitive_zeros: Vec<String>,
    /// Column -> delimiter for set-valued cells.
    #[serde(default)]
    pub multi_value_columns: HashMap<String, String>,
    /// Column holding the subject id, for two-level (subject, event) counting.
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Column holding the event id, for two-level counting.
    #[serde(default)]
    pub event_column: Option<String>,
    /// Truncate input to this many rows (0 = all).
    #[serde(default)]
    pub record_limit: usize,

    /// Maximum combination length to report (0 = natural max).
    #[serde(default)]
    pub reporting_length: usize,
    /// k-anonymity resolution `R`.
    #[serde(default = "default::reporting_resolution")]
    pub reporting_resolution: u32,

    /// Switch the protector from k-anonymity to differential privacy.
    #[serde(default)]
    pub dp_aggregates: bool,
    /// Total epsilon budget.
    #[serde(default = "default::noise_epsilon")]
    pub noise_epsilon: f64,
    /// Delta. `0.0` means "derive from record count" (`1 / (2N)`), matching
    /// the original pipeline's fallback.
    #[serde(default)]
    pub noise_delta: f64,
    /// Percentile used for per-length sensitivity selection.
    #[serde(default = "default::percentile_percentage")]
    pub percentile_percentage: f64,
    /// Proportion of epsilon reserved for percentile/sensitivity selection.
    #[serde(default = "default::percentile_epsilon_proportion")]
    pub percentile_epsilon_proportion: f64,
    /// Per-length share of the remaining epsilon budget; must sum to 1.
    #[serde(default)]
    pub sigma_proportions: Vec<f64>,
    /// Fixed vs adaptive threshold selection.
    #[serde(default = "default::noise_threshold_type")]
    pub noise_threshold_type: NoiseThresholdType,
    /// Per-length fixed thresholds (used when `noise_threshold_type == Fixed`).
    #[serde(default)]
    pub noise_threshold_values: Vec<u32>,
    /// Target false-positive rate for the adaptive threshold rule.
    #[serde(default = "default::adaptive_false_positive_target")]
    pub adaptive_false_positive_target: f64,

    /// Which synthesis mode to run.
    #[serde(default = "default::synthesis_mode")]
    pub synthesis_mode: SynthesisMode,
    /// Cap on synthetic_count / sensitive_count for value-seeded oversampling.
    #[serde(default = "default::oversampling_ratio")]
    pub oversampling_ratio: f64,
    /// Max oversampling attempts per seed record.
    #[serde(default = "default::oversampling_tries")]
    pub oversampling_tries: usize,
    /// Aggregate-seeded variant: sample from residual (reportable - emitted)
    /// need instead of raw reportable counts.
    #[serde(default)]
    pub use_synthetic_counts: bool,

    /// Max entries held in the FilterCache (LRU).
    #[serde(default = "default::cache_max_size")]
    pub cache_max_size: usize,
    /// Resident-set percentage above which FilterCache insertion is disabled.
    #[serde(default = "default::memory_limit_pct")]
    pub memory_limit_pct: f64,

    /// Number of parallel workers (0 = use all available cores).
    #[serde(default)]
    pub parallel_jobs: usize,
    /// Root seed for the per-worker deterministic RNG streams.
    #[serde(default = "default::root_seed")]
    pub root_seed: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields have defaults")
    }
}

impl Configuration {
    /// Validate cross-field invariants that `serde` defaults alone can't
    /// express (spec.md §7, `ConfigInvalid`).
    pub fn validate(&self) -> Result<()> {
        if self.dp_aggregates {
            if self.sigma_proportions.is_empty() {
                return Err(CoreError::ConfigInvalid(
                    "dp_aggregates=true requires non-empty sigma_proportions".into(),
                ));
            }
            let sum: f64 = self.sigma_proportions.iter().sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(CoreError::ConfigInvalid(format!(
                    "sigma_proportions must sum to 1.0, got {sum}"
                )));
            }
            if !(0.0..1.0).contains(&self.percentile_epsilon_proportion) {
                return Err(CoreError::ConfigInvalid(
                    "percentile_epsilon_proportion must be in (0, 1)".into(),
                ));
            }
            if self.noise_threshold_type == NoiseThresholdType::Fixed
                && self.noise_threshold_values.len() != self.sigma_proportions.len()
            {
                return Err(CoreError::ConfigInvalid(
                    "noise_threshold_values must have one entry per reporting length when fixed"
                        .into(),
                ));
            }
        }
        if self.oversampling_ratio <= 0.0 {
            return Err(CoreError::ConfigInvalid(
                "oversampling_ratio must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective worker count: `parallel_jobs`, or all available cores if 0.
    pub fn effective_parallel_jobs(&self) -> usize {
        if self.parallel_jobs == 0 {
            rayon::current_num_threads()
        } else {
            self.parallel_jobs
        }
    }
}

/// Default values for configuration fields not covered by `#[derive(Default)]`.
#[allow(missing_docs)]
pub mod default {
    use super::{NoiseThresholdType, SynthesisMode};

    pub fn reporting_resolution() -> u32 {
        10
    }

    pub fn noise_epsilon() -> f64 {
        1.0
    }

    pub fn percentile_percentage() -> f64 {
        99.0
    }

    pub fn percentile_epsilon_proportion() -> f64 {
        0.1
    }

    pub fn noise_threshold_type() -> NoiseThresholdType {
        NoiseThresholdType::Fixed
    }

    pub fn adaptive_false_positive_target() -> f64 {
        0.05
    }

    pub fn synthesis_mode() -> SynthesisMode {
        SynthesisMode::RowSeeded
    }

    pub fn oversampling_ratio() -> f64 {
        1.0
    }

    pub fn oversampling_tries() -> usize {
        10
    }

    pub fn cache_max_size() -> usize {
        100_000
    }

    pub fn memory_limit_pct() -> f64 {
        80.0
    }

    pub fn root_seed() -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn dp_requires_sigma_proportions() {
        let mut config = Configuration {
            dp_aggregates: true,
            ..Configuration::default()
        };
        assert!(config.validate().is_err());
        config.sigma_proportions = vec![0.5, 0.5];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sigma_proportions_must_sum_to_one() {
        let config = Configuration {
            dp_aggregates: true,
            sigma_proportions: vec![0.5, 0.6],
            ..Configuration::default()
        };
        assert!(config.validate().is_err());
    }
}
