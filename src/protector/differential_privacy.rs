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

use itertools::Itertools;
use rand::RngCore;
use rand_distr::{Distribution, Normal};

use crate::{
    aggregates::{AggregatesStore, ReportableAggregatesStore},
    combination::{Combination, Count},
    config::{Configuration, NoiseThresholdType},
    data_block::DataBlock,
    error::{CoreError, Result},
    generator::{
        discrete::{Choice, DiscreteGenerator},
        Generator,
    },
};

/// Gaussian-noise protector with per-length sensitivity capping
/// (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct DifferentialPrivacyProtector {
    epsilon: f64,
    delta: f64,
    percentile_percentage: f64,
    percentile_epsilon_proportion: f64,
    sigma_proportions: Vec<f64>,
    threshold_type: NoiseThresholdType,
    threshold_values: Vec<u32>,
    adaptive_false_positive_target: f64,
}

impl DifferentialPrivacyProtector {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            epsilon: config.noise_epsilon,
            delta: config.noise_delta,
            percentile_percentage: config.percentile_percentage,
            percentile_epsilon_proportion: config.percentile_epsilon_proportion,
            sigma_proportions: config.sigma_proportions.clone(),
            threshold_type: config.noise_threshold_type,
            threshold_values: config.noise_threshold_values.clone(),
            adaptive_false_positive_target: config.adaptive_false_positive_target,
        }
    }

    pub fn protect(
        &self,
        block: &DataBlock,
        store: &AggregatesStore,
        rng: &mut dyn RngCore,
    ) -> Result<ReportableAggregatesStore> {
        let reporting_length = store.reporting_length();
        if self.sigma_proportions.len() != reporting_length {
            return Err(CoreError::ConfigInvalid(format!(
                "sigma_proportions has {} entries, expected {reporting_length}",
                self.sigma_proportions.len()
            )));
        }
        if self.epsilon <= 0.0 {
            return Err(CoreError::Budget(format!(
                "noise_epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        // Every per-length share draws from `epsilon * (1 - percentile_epsilon_proportion)`,
        // so the sum of all per-length budgets plus the reserved percentile budget can
        // never exceed `epsilon` by construction (sigma_proportions sums to 1, enforced by
        // `Configuration::validate`). The only way a run can ask for more budget than
        // `epsilon` allows is a non-positive `epsilon` itself.
        let n = store.record_count().max(1);
        let delta = if self.delta > 0.0 {
            self.delta
        } else {
            1.0 / (2.0 * n as f64)
        };
        let event_scoped = store.is_event_scoped();
        let epsilon_reserved = self.epsilon * self.percentile_epsilon_proportion;
        let epsilon_remaining = self.epsilon - epsilon_reserved;

        let mut out = AggregatesStore::empty(store.record_count(), reporting_length, event_scoped);

        // The grand total is itself a released count (spec.md §6's
        // grand-total row) and must be DP-noised like every other
        // combination, not copied through in the clear (examples/
        // original_source/aggregator.py:84 protects it the same way as
        // every other row). Every record/subject contributes exactly one
        // unit to the total, so its sensitivity is always 1; it draws from
        // the same per-length-1 budget as length-1 combinations.
        let epsilon_total = epsilon_remaining * self.sigma_proportions[0];
        if epsilon_total > 0.0 {
            let std_dev_total = (2.0 * (1.25 / delta).ln()).sqrt() / epsilon_total;
            if let Ok(normal_total) = Normal::new(0.0, std_dev_total.max(f64::EPSILON)) {
                let noised_events = noisy_scalar(store.record_count(), &normal_total, rng);
                let noised_subjects = if event_scoped {
                    noisy_scalar(store.subject_count(), &normal_total, rng)
                } else {
                    noised_events
                };
                out.set_record_count(noised_events);
                out.set_subject_count(noised_subjects);
            }
        }

        for k in 1..=reporting_length {
            let epsilon_p = epsilon_reserved;
            let epsilon_k = epsilon_remaining * self.sigma_proportions[k - 1];
            if epsilon_k <= 0.0 {
                continue;
            }

            let sensitivity = select_sensitivity(
                block,
                k,
                self.percentile_percentage,
                epsilon_p,
                reporting_length,
                rng,
            );
            if sensitivity == 0 {
                continue;
            }

            let clipped = clipped_length_counts(block, k, sensitivity, event_scoped);
            let std_dev = sensitivity as f64 * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon_k;
            let normal = Normal::new(0.0, std_dev.max(f64::EPSILON))
                .map_err(|e| CoreError::ConfigInvalid(format!("invalid DP noise parameters: {e}")))?;

            let threshold = match self.threshold_type {
                NoiseThresholdType::Fixed => *self
                    .threshold_values
                    .get(k - 1)
                    .ok_or_else(|| CoreError::ConfigInvalid(format!(
                        "noise_threshold_values missing entry for length {k}"
                    )))?,
                NoiseThresholdType::Adaptive => {
                    adaptive_threshold(std_dev, self.adaptive_false_positive_target)
                }
            };

            for (combo, count) in clipped {
                let noised = noisy_count(count, &normal, rng);
                if noised >= threshold as i64 {
                    out.set(combo, clamp_events(count, noised as u64));
                }
            }
        }

        Ok(out)
    }
}

/// Adds independent Gaussian noise to each dimension of `count` and rounds
/// to the nearest integer; the primary (privacy-relevant) dimension is what
/// gets compared against the threshold.
fn noisy_count(count: Count, normal: &Normal<f64>, rng: &mut dyn RngCore) -> i64 {
    let noise = normal.sample(&mut SmallRngAdapter(rng));
    (count.primary() as f64 + noise).round() as i64
}

/// Adds Gaussian noise to a raw scalar (the grand total) and clamps at
/// zero; unlike [`noisy_count`] there's no per-combination threshold to
/// compare against, since the grand-total row is never dropped.
fn noisy_scalar(n: usize, normal: &Normal<f64>, rng: &mut dyn RngCore) -> usize {
    let noise = normal.sample(&mut SmallRngAdapter(rng));
    ((n as f64 + noise).round().max(0.0)) as usize
}

/// Keeps the noised primary count but carries the (un-noised) event count
/// through unchanged in subject/event mode, since only the subject
/// dimension is privacy-sensitive (spec.md §4.5, §9).
fn clamp_events(original: Count, noised_primary: u64) -> Count {
    match original {
        Count::Records(_) => Count::Records(noised_primary),
        Count::SubjectEvent { events, .. } => Count::SubjectEvent {
            subjects: noised_primary,
            events,
        },
    }
}

/// `rand_distr::Distribution` requires `rand::Rng`, which is blanket
/// implemented for any `RngCore`; this newtype lets us pass a `&mut dyn
/// RngCore` trait object through that blanket impl.
struct SmallRngAdapter<'a>(&'a mut dyn RngCore);

impl rand::RngCore for SmallRngAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

/// Per-record contribution count at length `k`: the number of length-`k`
/// combinations that record participates in, i.e. `C(width, k)`.
fn contribution_count(width: usize, k: usize) -> u64 {
    if width < k {
        return 0;
    }
    binomial(width as u64, k as u64)
}

fn binomial(n: u64, k: u64) -> u64 {
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result * (n - i) as u128 / (i + 1) as u128;
    }
    result as u64
}

/// Exponential-mechanism selection of the `percentile`-th percentile of
/// per-record contribution counts at length `k`, spending `epsilon_p`
/// divided across the `reporting_length` lengths (spec.md §4.5 step 1).
fn select_sensitivity(
    block: &DataBlock,
    k: usize,
    percentile: f64,
    epsilon_p: f64,
    reporting_length: usize,
    rng: &mut dyn RngCore,
) -> u64 {
    let n = block.num_records().max(1) as f64;
    let mut contributions: Vec<u64> = (0..block.num_records())
        .map(|rid| contribution_count(block.record_attributes(rid as u32).len(), k))
        .collect();
    contributions.sort_unstable();
    contributions.dedup();
    if contributions.is_empty() {
        return 0;
    }

    let target = percentile / 100.0;
    let weights: Vec<Choice<u64>> = contributions
        .iter()
        .enumerate()
        .map(|(rank, &s)| {
            let frac = rank as f64 / n;
            let score = -((frac - target).abs());
            let weight = (score * epsilon_p / (2.0 * reporting_length as f64)).exp();
            Choice { val: s, weight }
        })
        .collect();
    let gen = DiscreteGenerator::new(weights);
    gen.next(rng).unwrap_or(0)
}

/// Re-derives length-`k` combination counts directly from `block`,
/// capping each record's contribution to at most `cap` combinations so the
/// resulting counts have bounded sensitivity `cap` (spec.md §4.5 step 1).
fn clipped_length_counts(
    block: &DataBlock,
    k: usize,
    cap: u64,
    event_scoped: bool,
) -> HashMap<Combination, Count> {
    let mut counts: HashMap<Combination, Count> = HashMap::new();
    let mut seen_by_combo: HashMap<Combination, Vec<u32>> = HashMap::new();
    let cap = cap as usize;
    for rid in 0..block.num_records() as u32 {
        let attrs = block.record_attributes(rid);
        if attrs.len() < k {
            continue;
        }
        let subject = block.subject_of(rid);
        for combo in attrs.iter().copied().combinations(k).take(cap) {
            let seen = seen_by_combo.entry(combo.clone()).or_default();
            counts
                .entry(combo.clone())
                .or_insert_with(|| Count::zero(event_scoped))
                .add_observation(subject, seen);
        }
    }
    counts
}

/// Smallest integer `T >= 0` such that the probability a true-zero count
/// noises up to `T` or above is below `target` (Open Question (i), spec.md
/// §9, resolved for this crate).
fn adaptive_threshold(std_dev: f64, target: f64) -> u32 {
    if std_dev <= 0.0 {
        return 0;
    }
    let mut t = 0u32;
    loop {
        let tail = 0.5 * (1.0 - erf(t as f64 / (std_dev * std::f64::consts::SQRT_2)));
        if tail < target || t > 1_000_000 {
            return t;
        }
        t += 1;
    }
}

/// Abramowitz & Stegun 7.1.26 rational approximation of the error
/// function (max absolute error ~1.5e-7); avoids pulling in a statistics
/// crate for a single closed-form tail computation.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
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
    fn binomial_matches_known_values() {
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(4, 0), 1);
        assert_eq!(binomial(4, 4), 1);
    }

    #[test]
    fn erf_is_odd_and_bounded() {
        assert!((erf(0.0)).abs() < 1e-9);
        assert!((erf(10.0) - 1.0).abs() < 1e-6);
        assert!((erf(-10.0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn adaptive_threshold_increases_with_sigma() {
        let small = adaptive_threshold(1.0, 0.05);
        let large = adaptive_threshold(10.0, 0.05);
        assert!(large > small);
    }

    #[test]
    fn protect_drops_combinations_below_threshold_on_a_toy_block() {
        let columns = cols(&["A", "B"]);
        let rows = vec![
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["2", "y"]),
        ];
        let mut config = Configuration::default();
        config.dp_aggregates = true;
        config.sigma_proportions = vec![1.0];
        config.noise_threshold_type = NoiseThresholdType::Fixed;
        config.noise_threshold_values = vec![0];
        config.noise_epsilon = 50.0;
        config.percentile_epsilon_proportion = 0.1;
        assert!(config.validate().is_ok());

        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = crate::combination_counter::CombinationCounter::count(&block, 1, 1);
        let protector = DifferentialPrivacyProtector::from_config(&config);
        let mut rng = StdRng::seed_from_u64(7);
        let reportable = protector.protect(&block, &store, &mut rng).unwrap();
        assert!(reportable.reporting_length() == 1);
    }

    #[test]
    fn protect_noises_the_grand_total_instead_of_copying_it_through() {
        let columns = cols(&["A", "B"]);
        let rows = vec![
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["1", "x"]),
            row(&["2", "y"]),
        ];
        let mut config = Configuration::default();
        config.dp_aggregates = true;
        config.sigma_proportions = vec![1.0];
        config.noise_threshold_type = NoiseThresholdType::Fixed;
        config.noise_threshold_values = vec![0];
        // A very large epsilon collapses the noise's standard deviation
        // near zero, so the noised grand total should land within a few
        // units of the true record count rather than being copied through
        // verbatim (which would be exactly 6 every single run).
        config.noise_epsilon = 1_000_000.0;
        config.percentile_epsilon_proportion = 0.1;

        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = crate::combination_counter::CombinationCounter::count(&block, 1, 1);
        let protector = DifferentialPrivacyProtector::from_config(&config);
        let mut rng = StdRng::seed_from_u64(11);
        let reportable = protector.protect(&block, &store, &mut rng).unwrap();
        assert!((reportable.record_count() as i64 - store.record_count() as i64).abs() <= 3);
    }

    #[test]
    fn protect_rejects_a_non_positive_epsilon_budget() {
        let columns = cols(&["A"]);
        let rows = vec![row(&["1"]), row(&["1"])];
        let mut config = Configuration::default();
        config.dp_aggregates = true;
        config.sigma_proportions = vec![1.0];
        config.noise_epsilon = 0.0;

        let block = DataBlock::build(&rows, &columns, &config).unwrap();
        let store = crate::combination_counter::CombinationCounter::count(&block, 1, 1);
        let protector = DifferentialPrivacyProtector::from_config(&config);
        let mut rng = StdRng::seed_from_u64(1);
        let err = protector.protect(&block, &store, &mut rng).unwrap_err();
        assert!(matches!(err, CoreError::Budget(_)));
    }
}
