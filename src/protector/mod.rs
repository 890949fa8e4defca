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

//! Turns a sensitive [`crate::aggregates::AggregatesStore`] into a
//! reportable one (C4, spec.md §4.4/§4.5): either k-anonymity floor
//! rounding or Gaussian-noise differential privacy.

pub mod differential_privacy;
pub mod k_anonymity;

use rand::RngCore;

use crate::{
    aggregates::{AggregatesStore, ReportableAggregatesStore},
    config::Configuration,
    data_block::DataBlock,
    error::Result,
};

use differential_privacy::DifferentialPrivacyProtector;
use k_anonymity::KAnonymityProtector;

/// The two protection strategies, selected by `Configuration::dp_aggregates`
/// (spec.md §9: "Polymorphism over Protector").
pub enum ProtectorStrategy {
    KAnonymity(KAnonymityProtector),
    DifferentialPrivacy(DifferentialPrivacyProtector),
}

impl ProtectorStrategy {
    pub fn from_config(config: &Configuration) -> Self {
        if config.dp_aggregates {
            ProtectorStrategy::DifferentialPrivacy(DifferentialPrivacyProtector::from_config(config))
        } else {
            ProtectorStrategy::KAnonymity(KAnonymityProtector {
                resolution: config.reporting_resolution,
            })
        }
    }

    /// Protect `store`. `block` is only consulted by the DP strategy (it
    /// needs per-record contribution counts for sensitivity selection);
    /// k-anonymity works purely off the aggregated counts.
    pub fn protect(
        &self,
        block: &DataBlock,
        store: &AggregatesStore,
        rng: &mut dyn RngCore,
    ) -> Result<ReportableAggregatesStore> {
        match self {
            ProtectorStrategy::KAnonymity(p) => Ok(p.protect(store)),
            ProtectorStrategy::DifferentialPrivacy(p) => p.protect(block, store, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combination_counter::CombinationCounter;
    use rand::SeedableRng;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }
    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn from_config_selects_k_anonymity_by_default() {
        let config = Configuration::default();
        assert!(matches!(
            ProtectorStrategy::from_config(&config),
            ProtectorStrategy::KAnonymity(_)
        ));
    }

    #[test]
    fn k_anonymity_protect_ignores_the_block() {
        let columns = cols(&["A"]);
        let rows = vec![row(&["1"]), row(&["1"]), row(&["1"])];
        let config = Configuration::default();
        let block = crate::data_block::DataBlock::build(&rows, &columns, &config).unwrap();
        let store = CombinationCounter::count(&block, 1, 1);
        let strategy = ProtectorStrategy::from_config(&config);
        let mut rng = rand::rngs::StdRng::from_seed([0u8; 32]);
        let reportable = strategy.protect(&block, &store, &mut rng).unwrap();
        let a1 = block.attribute_id("A", "1").unwrap();
        assert!(reportable.get(&[a1]).is_some());
    }
}
