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

use std::{
    collections::HashMap,
    io::{Read, Write},
};

use serde::{Deserialize, Serialize};

use crate::{
    attribute::{AttributeId, AttributeTable},
    combination::{combo_to_string, string_to_combo, Combination, Count},
    error::{CoreError, Result},
};

/// A count map: length -> combination -> count (C3).
///
/// Invariants (spec.md §3): for a combination `c` of length `k > 1` and any
/// sub-combination `s`, `count(s) >= count(c)`; every stored count is
/// `<= record_count`.
#[derive(Debug, Clone)]
pub struct AggregatesStore {
    record_count: usize,
    /// Distinct-subject grand total, in subject/event mode. Equal to
    /// `record_count` otherwise (plain mode has no subject/event split).
    subject_count: usize,
    reporting_length: usize,
    event_scoped: bool,
    /// `by_length[k - 1]` holds length-`k` combinations.
    by_length: Vec<HashMap<Combination, Count>>,
}

/// Marker type distinguishing a sensitive store (exact counts, never
/// released) from a reportable one (privacy-protected, release-safe).
/// Both share the same representation; the distinction is load-bearing
/// only at the API boundary (spec.md §3).
pub type ReportableAggregatesStore = AggregatesStore;

impl AggregatesStore {
    /// Build an empty store for `reporting_length` lengths.
    pub fn empty(record_count: usize, reporting_length: usize, event_scoped: bool) -> Self {
        Self {
            record_count,
            subject_count: record_count,
            reporting_length,
            event_scoped,
            by_length: (0..reporting_length).map(|_| HashMap::new()).collect(),
        }
    }

    /// Total input record (or event) count.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Distinct-subject grand total. Equal to [`Self::record_count`] unless
    /// [`Self::is_event_scoped`] and [`Self::set_subject_count`] narrowed it.
    pub fn subject_count(&self) -> usize {
        self.subject_count
    }

    /// Sets the distinct-subject grand total (spec.md §6's `id_count`
    /// column), independent of the event-count grand total.
    pub fn set_subject_count(&mut self, subject_count: usize) {
        self.subject_count = subject_count;
    }

    /// Sets the record (event) grand total, e.g. after protecting it
    /// independently of per-combination counts.
    pub fn set_record_count(&mut self, record_count: usize) {
        self.record_count = record_count;
    }

    /// The reporting length this store was built for.
    pub fn reporting_length(&self) -> usize {
        self.reporting_length
    }

    /// Whether counts are `(subjects, events)` pairs.
    pub fn is_event_scoped(&self) -> bool {
        self.event_scoped
    }

    /// Count of a specific combination at `length = combo.len()`.
    pub fn get(&self, combo: &[AttributeId]) -> Option<Count> {
        if combo.is_empty() || combo.len() > self.reporting_length {
            return None;
        }
        self.by_length[combo.len() - 1].get(combo).copied()
    }

    /// Insert/overwrite a combination's count.
    pub fn set(&mut self, combo: Combination, count: Count) {
        debug_assert!(!combo.is_empty());
        debug_assert!(combo.len() <= self.reporting_length);
        self.by_length[combo.len() - 1].insert(combo, count);
    }

    /// The entry for `combo`, inserting a zero count (in this store's
    /// counting mode) if absent. Used by the streaming counter to
    /// accumulate observations in place.
    pub fn entry(&mut self, combo: Combination) -> &mut Count {
        let event_scoped = self.event_scoped;
        let len = combo.len();
        self.by_length[len - 1]
            .entry(combo)
            .or_insert_with(|| Count::zero(event_scoped))
    }

    /// Iterate combinations of a given length (1-indexed).
    pub fn length(&self, length: usize) -> impl Iterator<Item = (&Combination, &Count)> {
        self.by_length[length - 1].iter()
    }

    /// Iterate all lengths 1..=reporting_length with their maps.
    pub fn lengths(&self) -> impl Iterator<Item = (usize, &HashMap<Combination, Count>)> {
        self.by_length
            .iter()
            .enumerate()
            .map(|(i, m)| (i + 1, m))
    }

    /// Mutable access to all lengths, for in-place protection passes.
    pub fn lengths_mut(&mut self) -> impl Iterator<Item = (usize, &mut HashMap<Combination, Count>)> {
        self.by_length
            .iter_mut()
            .enumerate()
            .map(|(i, m)| (i + 1, m))
    }

    /// Number of distinct combinations at each length.
    pub fn total_by_length(&self) -> HashMap<usize, usize> {
        self.lengths().map(|(len, m)| (len, m.len())).collect()
    }

    /// Number of combinations at each length whose primary count is `< resolution`.
    pub fn rare_by_length(&self, resolution: u32) -> HashMap<usize, usize> {
        self.lengths()
            .map(|(len, m)| {
                let rare = m
                    .values()
                    .filter(|c| c.primary() < resolution as u64)
                    .count();
                (len, rare)
            })
            .collect()
    }

    /// Mean combination count at each length. `0.0` for an empty length
    /// (spec.md §7's `Arithmetic` recovery: division-by-zero substitutes 0).
    pub fn mean_combinations_count_by_length(&self) -> HashMap<usize, f64> {
        self.lengths()
            .map(|(len, m)| {
                let mean = if m.is_empty() {
                    0.0
                } else {
                    m.values().map(|c| c.primary() as f64).sum::<f64>() / m.len() as f64
                };
                (len, mean)
            })
            .collect()
    }

    /// Merge `other` into `self` by summing counts (commutative,
    /// associative — safe for shard merge after parallel counting).
    pub fn merge_from(&mut self, other: &AggregatesStore) {
        for (len, map) in other.lengths() {
            let target = &mut self.by_length[len - 1];
            for (combo, count) in map {
                let entry = target
                    .entry(combo.clone())
                    .or_insert_with(|| Count::zero(self.event_scoped));
                *entry = match (*entry, *count) {
                    (Count::Records(a), Count::Records(b)) => Count::Records(a + b),
                    (
                        Count::SubjectEvent { subjects: sa, events: ea },
                        Count::SubjectEvent { subjects: sb, events: eb },
                    ) => Count::SubjectEvent {
                        subjects: sa + sb,
                        events: ea + eb,
                    },
                    _ => unreachable!("counting mode is uniform across a store"),
                };
            }
        }
    }

    /// Writes the TSV format of spec.md §6: a header row, then the
    /// grand-total row (empty `selections`), then all other rows.
    /// `column_label` is `"count"` for a sensitive store and
    /// `"protected_count"` for a reportable one.
    pub fn write_tsv<W: Write>(
        &self,
        table: &AttributeTable,
        mut out: W,
        column_label: &str,
    ) -> Result<()> {
        if self.event_scoped {
            writeln!(out, "selections\tid_count\tevent_count")?;
            writeln!(out, "\t{}\t{}", self.subject_count, self.record_count)?;
        } else {
            writeln!(out, "selections\t{column_label}")?;
            writeln!(out, "\t{}", self.record_count)?;
        }
        let mut lengths: Vec<_> = (1..=self.reporting_length).collect();
        lengths.sort_unstable();
        for len in lengths {
            let mut rows: Vec<_> = self.length(len).collect();
            rows.sort_by_key(|(combo, _)| combo.clone());
            for (combo, count) in rows {
                let selections = combo_to_string(table, combo);
                match count {
                    Count::Records(n) => writeln!(out, "{selections}\t{n}")?,
                    Count::SubjectEvent { subjects, events } => {
                        writeln!(out, "{selections}\t{subjects}\t{events}")?
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads the TSV format written by [`Self::write_tsv`], interning any
    /// attribute not already known to `table`.
    pub fn read_tsv<R: Read>(table: &mut AttributeTable, input: R, reporting_length: usize) -> Result<Self> {
        let reader = std::io::BufReader::new(input);
        use std::io::BufRead;
        let mut lines = reader.lines();
        let header = lines
            .next()
            .ok_or_else(|| CoreError::InputSchema("empty aggregates TSV".into()))??;
        let event_scoped = header.split('\t').count() == 3;

        let total_line = lines
            .next()
            .ok_or_else(|| CoreError::InputSchema("missing grand-total row".into()))??;
        let total_parts: Vec<&str> = total_line.split('\t').collect();
        let first: usize = total_parts
            .get(1)
            .ok_or_else(|| CoreError::InputSchema("malformed grand-total row".into()))?
            .parse()
            .map_err(|_| CoreError::InputSchema("non-numeric grand-total count".into()))?;
        let (subject_count, record_count) = if event_scoped {
            let events: usize = total_parts
                .get(2)
                .ok_or_else(|| CoreError::InputSchema("malformed grand-total row".into()))?
                .parse()
                .map_err(|_| CoreError::InputSchema("non-numeric grand-total count".into()))?;
            (first, events)
        } else {
            (first, first)
        };

        let mut store = AggregatesStore::empty(record_count, reporting_length, event_scoped);
        store.set_subject_count(subject_count);
        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            let combo = string_to_combo(table, parts[0]);
            if combo.is_empty() || combo.len() > reporting_length {
                continue;
            }
            let count = if event_scoped {
                let subjects: u64 = parts[1].parse().unwrap_or(0);
                let events: u64 = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(subjects);
                Count::SubjectEvent { subjects, events }
            } else {
                Count::Records(parts[1].parse().unwrap_or(0))
            };
            store.set(combo, count);
        }
        Ok(store)
    }

    /// Writes the JSON interchange format of spec.md §6.
    pub fn write_json<W: Write>(&self, table: &AttributeTable, out: W) -> Result<()> {
        let mut aggregates_count = HashMap::new();
        for (_, map) in self.lengths() {
            for (combo, count) in map {
                let key = combo_to_string(table, combo);
                aggregates_count.insert(key, JsonCount::from(*count));
            }
        }
        let intern_table: Vec<String> = table
            .iter()
            .map(|(_, av)| format!("{}:{}", av.column, av.value))
            .collect();
        let doc = JsonAggregates {
            number_of_records: self.record_count,
            reporting_length: self.reporting_length,
            aggregates_count,
            attribute_intern_table: intern_table,
        };
        serde_json::to_writer_pretty(out, &doc)
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))
    }

    /// Reads the JSON interchange format, rebuilding an `AttributeTable`
    /// from `attributeInternTable` (order == interned id).
    pub fn read_json<R: Read>(input: R) -> Result<(Self, AttributeTable)> {
        let doc: JsonAggregates = serde_json::from_reader(input)
            .map_err(|e| CoreError::InputSchema(format!("invalid aggregates JSON: {e}")))?;
        let mut table = AttributeTable::new();
        for entry in &doc.attribute_intern_table {
            if let Some((col, val)) = entry.split_once(':') {
                table.intern(col, val);
            }
        }
        let event_scoped = doc
            .aggregates_count
            .values()
            .any(|c| c.event_count.is_some());
        let mut store =
            AggregatesStore::empty(doc.number_of_records, doc.reporting_length, event_scoped);
        for (key, count) in doc.aggregates_count {
            let combo = string_to_combo(&mut table, &key);
            if combo.is_empty() || combo.len() > store.reporting_length {
                continue;
            }
            let count = if event_scoped {
                Count::SubjectEvent {
                    subjects: count.count,
                    events: count.event_count.unwrap_or(count.count),
                }
            } else {
                Count::Records(count.count)
            };
            store.set(combo, count);
        }
        Ok((store, table))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonAggregates {
    #[serde(rename = "numberOfRecords")]
    number_of_records: usize,
    #[serde(rename = "reportingLength")]
    reporting_length: usize,
    #[serde(rename = "aggregatesCount")]
    aggregates_count: HashMap<String, JsonCount>,
    #[serde(rename = "attributeInternTable")]
    attribute_intern_table: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonCount {
    count: u64,
    #[serde(rename = "eventCount", skip_serializing_if = "Option::is_none")]
    event_count: Option<u64>,
}

impl From<Count> for JsonCount {
    fn from(value: Count) -> Self {
        match value {
            Count::Records(n) => JsonCount {
                count: n,
                event_count: None,
            },
            Count::SubjectEvent { subjects, events } => JsonCount {
                count: subjects,
                event_count: Some(events),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (AttributeTable, AggregatesStore) {
        let mut table = AttributeTable::new();
        let a1 = table.intern("A", "1");
        let bx = table.intern("B", "x");
        let mut store = AggregatesStore::empty(4, 2, false);
        store.set(vec![a1], Count::Records(3));
        store.set(vec![bx], Count::Records(3));
        store.set(vec![a1, bx], Count::Records(3));
        (table, store)
    }

    #[test]
    fn tsv_round_trip_reproduces_the_map() {
        let (table, store) = fixture();
        let mut buf = Vec::new();
        store.write_tsv(&table, &mut buf, "count").unwrap();
        let mut table2 = AttributeTable::new();
        let reloaded = AggregatesStore::read_tsv(&mut table2, &buf[..], 2).unwrap();
        assert_eq!(reloaded.record_count(), store.record_count());
        for len in 1..=2 {
            let mut original: Vec<_> = store.length(len).map(|(c, v)| (c.clone(), *v)).collect();
            let mut actual: Vec<_> = reloaded.length(len).map(|(c, v)| (c.clone(), *v)).collect();
            original.sort_by_key(|(c, _)| c.clone());
            actual.sort_by_key(|(c, _)| c.clone());
            assert_eq!(original, actual);
        }
    }

    #[test]
    fn json_round_trip_reproduces_the_map() {
        let (table, store) = fixture();
        let mut buf = Vec::new();
        store.write_json(&table, &mut buf).unwrap();
        let (reloaded, _) = AggregatesStore::read_json(&buf[..]).unwrap();
        assert_eq!(reloaded.record_count(), store.record_count());
        assert_eq!(reloaded.total_by_length(), store.total_by_length());
    }

    #[test]
    fn rare_by_length_counts_below_resolution() {
        let (_, store) = fixture();
        let rare = store.rare_by_length(4);
        assert_eq!(rare[&1], 2);
        assert_eq!(rare[&2], 1);
    }

    #[test]
    fn merge_from_sums_counts() {
        let mut table = AttributeTable::new();
        let a = table.intern("A", "1");
        let mut store1 = AggregatesStore::empty(2, 1, false);
        store1.set(vec![a], Count::Records(2));
        let mut store2 = AggregatesStore::empty(2, 1, false);
        store2.set(vec![a], Count::Records(3));
        store1.merge_from(&store2);
        assert_eq!(store1.get(&[a]), Some(Count::Records(5)));
    }

    /// The grand-total row's `id_count` column must carry the distinct
    /// subject total, not the event total, once the two diverge (3
    /// subjects generating 10 events).
    #[test]
    fn event_scoped_tsv_round_trip_keeps_subject_and_event_totals_distinct() {
        let mut table = AttributeTable::new();
        let a1 = table.intern("A", "1");
        let mut store = AggregatesStore::empty(10, 1, true);
        store.set_subject_count(3);
        store.set(
            vec![a1],
            Count::SubjectEvent {
                subjects: 3,
                events: 10,
            },
        );

        let mut buf = Vec::new();
        store.write_tsv(&table, &mut buf, "protected_count").unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), "\t3\t10");

        let mut table2 = AttributeTable::new();
        let reloaded = AggregatesStore::read_tsv(&mut table2, &buf[..], 1).unwrap();
        assert_eq!(reloaded.subject_count(), 3);
        assert_eq!(reloaded.record_count(), 10);
    }
}
