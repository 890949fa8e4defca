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

use crate::aggregates::{AggregatesStore, ReportableAggregatesStore};

/// Floor-rounds every combination's count to the nearest multiple of
/// `resolution`, dropping it if that rounds to zero (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct KAnonymityProtector {
    pub resolution: u32,
}

/// Floor-rounds a raw scalar (the grand total) to the nearest multiple of
/// `resolution`, without the combination-level "drop if zero" rule: the
/// grand-total row is always present (spec.md §6), even if protection
/// floors it to zero.
fn floor_to_resolution(n: usize, resolution: u32) -> usize {
    let resolution = resolution as usize;
    if resolution == 0 {
        return 0;
    }
    (n / resolution) * resolution
}

impl KAnonymityProtector {
    pub fn protect(&self, store: &AggregatesStore) -> ReportableAggregatesStore {
        let mut out = AggregatesStore::empty(
            floor_to_resolution(store.record_count(), self.resolution),
            store.reporting_length(),
            store.is_event_scoped(),
        );
        out.set_subject_count(floor_to_resolution(store.subject_count(), self.resolution));
        for (_, map) in store.lengths() {
            for (combo, count) in map {
                if let Some(protected) = count.protect_k_anonymity(self.resolution) {
                    out.set(combo.clone(), protected);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{attribute::AttributeTable, combination::Count};

    #[test]
    fn drops_below_resolution_and_floors_the_rest() {
        let mut table = AttributeTable::new();
        let a = table.intern("A", "1");
        let b = table.intern("B", "2");
        let mut store = AggregatesStore::empty(10, 1, false);
        store.set(vec![a], Count::Records(7));
        store.set(vec![b], Count::Records(1));

        let protector = KAnonymityProtector { resolution: 5 };
        let reportable = protector.protect(&store);
        assert_eq!(reportable.get(&[a]).unwrap().primary(), 5);
        assert!(reportable.get(&[b]).is_none());
        assert_eq!(reportable.record_count(), 10);
    }

    /// spec.md §8 S1: grand total of 4 records under R=2 floor-rounds to 4.
    #[test]
    fn grand_total_is_floor_rounded() {
        let store = AggregatesStore::empty(4, 1, false);
        let protector = KAnonymityProtector { resolution: 2 };
        let reportable = protector.protect(&store);
        assert_eq!(reportable.record_count(), 4);

        let store = AggregatesStore::empty(9, 1, false);
        let protector = KAnonymityProtector { resolution: 5 };
        let reportable = protector.protect(&store);
        assert_eq!(reportable.record_count(), 5);
    }
}
