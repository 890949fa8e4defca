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

use crate::attribute::{AttributeId, AttributeTable};

/// A canonical sorted tuple of attribute ids: a combination (spec.md §3).
pub type Combination = Vec<AttributeId>;

/// The count stored for a combination.
///
/// Plain mode carries a single non-negative integer. Subject/event mode
/// (spec.md §3, §9) carries a pair: the number of distinct subjects whose
/// events contain the combination, and the number of events that do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    /// Plain record count.
    Records(u64),
    /// `(distinct_subjects, events)`.
    SubjectEvent { subjects: u64, events: u64 },
}

impl Count {
    /// The privacy-relevant dimension: distinct subjects in subject/event
    /// mode (an individual is the subject, not a single event), the record
    /// count otherwise. Protection and monotonicity invariants are checked
    /// against this value.
    pub fn primary(&self) -> u64 {
        match self {
            Count::Records(n) => *n,
            Count::SubjectEvent { subjects, .. } => *subjects,
        }
    }

    /// Event count: equal to `primary()` in plain mode.
    pub fn events(&self) -> u64 {
        match self {
            Count::Records(n) => *n,
            Count::SubjectEvent { events, .. } => *events,
        }
    }

    /// Zero-valued count for the given counting mode.
    pub fn zero(event_scoped: bool) -> Count {
        if event_scoped {
            Count::SubjectEvent {
                subjects: 0,
                events: 0,
            }
        } else {
            Count::Records(0)
        }
    }

    /// Record one observation: one record in plain mode, or one event
    /// belonging to `subject_id` in subject/event mode. `seen_subjects`
    /// tracks which subjects have already been counted for *this*
    /// combination, so repeat events from the same subject increment only
    /// the event dimension.
    ///
    /// # Panics
    ///
    /// Panics if `subject_id.is_some()` doesn't match the count's own
    /// variant; the counting mode is fixed for an entire aggregates store
    /// and must not vary combination-to-combination.
    pub fn add_observation(&mut self, subject_id: Option<u32>, seen_subjects: &mut Vec<u32>) {
        match (self, subject_id) {
            (Count::Records(n), None) => *n += 1,
            (Count::SubjectEvent { subjects, events }, Some(sid)) => {
                *events += 1;
                if !seen_subjects.contains(&sid) {
                    *subjects += 1;
                    seen_subjects.push(sid);
                }
            }
            _ => unreachable!("counting mode must be uniform across a single aggregates store"),
        }
    }

    /// Apply k-anonymity floor-rounding to both dimensions independently
    /// (events floor-rounds against the same resolution as subjects, since
    /// the resolution is expressed in terms of distinct individuals).
    pub fn protect_k_anonymity(&self, resolution: u32) -> Option<Count> {
        let resolution = resolution as u64;
        if resolution == 0 {
            return None;
        }
        match self {
            Count::Records(n) => {
                let protected = (n / resolution) * resolution;
                (protected > 0).then_some(Count::Records(protected))
            }
            Count::SubjectEvent { subjects, events } => {
                let protected_subjects = (subjects / resolution) * resolution;
                (protected_subjects > 0).then_some(Count::SubjectEvent {
                    subjects: protected_subjects,
                    events: *events,
                })
            }
        }
    }
}

/// Renders a combination as `col:val;col:val;...` in canonical order, the
/// TSV `selections` column format (spec.md §6). An empty combination (the
/// grand-total row) renders as the empty string.
pub fn combo_to_string(table: &AttributeTable, combo: &[AttributeId]) -> String {
    combo
        .iter()
        .map(|id| {
            let av = table.resolve(*id);
            format!("{}:{}", av.column, av.value)
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses a `selections`-column string back into interned attribute ids,
/// interning any attribute not yet seen (used when loading an aggregates
/// file independently of the `DataBlock` that produced it).
pub fn string_to_combo(table: &mut AttributeTable, selections: &str) -> Combination {
    if selections.is_empty() {
        return Vec::new();
    }
    selections
        .split(';')
        .filter_map(|part| {
            // `:` inside a value was escaped to `..` at load time, so the
            // first `:` is always the column/value separator.
            let (col, val) = part.split_once(':')?;
            Some(table.intern(col, val))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combo_string_round_trips() {
        let mut table = AttributeTable::new();
        let a = table.intern("A", "1");
        let b = table.intern("B", "x");
        let s = combo_to_string(&table, &[a, b]);
        assert_eq!(s, "A:1;B:x");
        let parsed = string_to_combo(&mut table, &s);
        assert_eq!(parsed, vec![a, b]);
    }

    #[test]
    fn empty_combo_is_empty_string() {
        let table = AttributeTable::new();
        assert_eq!(combo_to_string(&table, &[]), "");
    }

    #[test]
    fn protect_k_anonymity_floors_and_drops_zero() {
        let c = Count::Records(7);
        assert_eq!(c.protect_k_anonymity(2), Some(Count::Records(6)));
        let c = Count::Records(1);
        assert_eq!(c.protect_k_anonymity(2), None);
    }

    #[test]
    fn subject_event_add_observation_dedups_subjects() {
        let mut c = Count::zero(true);
        let mut seen = Vec::new();
        c.add_observation(Some(5), &mut seen);
        c.add_observation(Some(5), &mut seen);
        c.add_observation(Some(6), &mut seen);
        assert_eq!(
            c,
            Count::SubjectEvent {
                subjects: 2,
                events: 3
            }
        );
    }
}
