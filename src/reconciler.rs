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

//! C6: post-synthesis reconciliation (spec.md §4.7). Grounded on
//! `original_source/generator.py::suppressToTargets`: compare each
//! attribute's observed count across synthetic records to its reportable
//! single-attribute count, then shuffle records and suppress one occurrence
//! at a time from any record still holding an over-represented attribute
//! until the excess reaches zero.
//!
//! Suppress-only: under-represented attributes (possible after DP noise,
//! or naturally produced by mode D) are left untouched here. Topping them
//! back up is [`crate::consolidation::ConsolidationPlanner`]'s job, and
//! only runs on the seeded paths.

use std::collections::HashMap;

use rand::{seq::SliceRandom, RngCore};

use crate::{aggregates::AggregatesStore, attribute::AttributeId, combination::Combination};

/// Suppresses over-represented attributes from `records` so each
/// attribute's observed count never exceeds its reportable single-attribute
/// count. Returns the reconciled records, same length as the input.
pub fn reconcile(
    records: Vec<Combination>,
    reportable: &AggregatesStore,
    resolution: u32,
    rng: &mut dyn RngCore,
) -> Vec<Combination> {
    let mut observed: HashMap<AttributeId, u64> = HashMap::new();
    for record in &records {
        for &a in record {
            *observed.entry(a).or_insert(0) += 1;
        }
    }

    let mut excess: HashMap<AttributeId, i64> = HashMap::new();
    for (&a, &count) in &observed {
        let reportable_count = reportable.get(&[a]).map(|c| c.primary()).unwrap_or(0);
        if reportable_count < resolution as u64 {
            continue;
        }
        let diff = count as i64 - reportable_count as i64;
        if diff > 0 {
            excess.insert(a, diff);
        }
    }
    if excess.is_empty() {
        return records;
    }

    let mut records = records;
    records.shuffle(rng);

    for record in &mut records {
        let mut i = 0;
        while i < record.len() {
            let a = record[i];
            let done = match excess.get_mut(&a) {
                Some(remaining) => {
                    record.remove(i);
                    *remaining -= 1;
                    *remaining <= 0
                }
                None => {
                    i += 1;
                    continue;
                }
            };
            if done {
                excess.remove(&a);
            }
            if excess.is_empty() {
                break;
            }
        }
        if excess.is_empty() {
            break;
        }
    }

    records
}
