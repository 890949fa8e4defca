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

use crate::{
    attribute::{AttributeId, AttributeTable, AttributeValue},
    config::Configuration,
    error::{CoreError, Result},
};

/// A 0-based record id. For subject/event datasets this indexes *events*,
/// not subjects.
pub type RecordId = u32;

/// Normalized in-memory table: record x attribute-id grid, with attribute
/// interning and a precomputed inverted index (C1).
///
/// Immutable once built. Shared by reference across synthesis workers.
#[derive(Debug)]
pub struct DataBlock {
    attributes: AttributeTable,
    /// Per-record canonical (sorted, deduped) attribute id lists.
    records: Vec<Vec<AttributeId>>,
    /// attribute id -> sorted record ids containing it.
    index: HashMap<AttributeId, Vec<RecordId>>,
    /// Attribute columns, in the order they'll be written back out.
    columns: Vec<String>,
    /// column name -> attribute ids interned for that column, in id order.
    column_attributes: HashMap<String, Vec<AttributeId>>,
    /// Per-record subject id, when two-level (subject, event) counting is enabled.
    subject_ids: Option<Vec<u32>>,
}

impl DataBlock {
    /// Build a `DataBlock` from a row-major table.
    ///
    /// `rows[i][j]` is the cell for `columns[j]` in row `i`. Cells are
    /// expected to already have reserved-character escaping and `nan`/
    /// trailing-`.0` normalization applied (see [`crate::attribute::normalize_cell`]);
    /// this constructor only decides attribute absence (`""` or a
    /// non-sensitive-zero `"0"`) and performs multi-value splitting.
    pub fn build(rows: &[Vec<String>], columns: &[String], config: &Configuration) -> Result<Self> {
        let column_index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        for used in &config.use_columns {
            if !column_index.contains_key(used.as_str()) {
                return Err(CoreError::InputSchema(format!(
                    "use_columns references unknown column {used:?}"
                )));
            }
        }
        for mv in config.multi_value_columns.keys() {
            if !column_index.contains_key(mv.as_str()) {
                return Err(CoreError::InputSchema(format!(
                    "multi_value_columns references unknown column {mv:?}"
                )));
            }
        }
        if let Some(subject_col) = &config.subject_id {
            if !column_index.contains_key(subject_col.as_str()) {
                return Err(CoreError::InputSchema(format!(
                    "subject_id references unknown column {subject_col:?}"
                )));
            }
        }

        let excluded: Vec<&str> = [config.subject_id.as_deref(), config.event_column.as_deref()]
            .into_iter()
            .flatten()
            .collect();

        let attribute_columns: Vec<String> = if !config.use_columns.is_empty() {
            config.use_columns.clone()
        } else {
            columns
                .iter()
                .filter(|c| !excluded.contains(&c.as_str()))
                .cloned()
                .collect()
        };

        let limit = if config.record_limit == 0 {
            rows.len()
        } else {
            config.record_limit.min(rows.len())
        };

        let mut attributes = AttributeTable::new();
        let mut records = Vec::with_capacity(limit);
        let mut index: HashMap<AttributeId, Vec<RecordId>> = HashMap::new();
        let mut subject_id_table: HashMap<String, u32> = HashMap::new();
        let mut subject_ids = config.subject_id.is_some().then(Vec::new);

        for row in &rows[..limit] {
            let mut ids: Vec<AttributeId> = Vec::new();
            for col in &attribute_columns {
                let idx = column_index[col.as_str()];
                let raw = row.get(idx).map(String::as_str).unwrap_or("");
                if let Some(delim) = config.multi_value_columns.get(col) {
                    for piece in raw.split(delim.as_str()) {
                        if let Some(val) = present_value(col, piece, config) {
                            ids.push(attributes.intern(col, val));
                        }
                    }
                } else if let Some(val) = present_value(col, raw, config) {
                    ids.push(attributes.intern(col, val));
                }
            }
            let canonical = attributes.canonicalize(&ids);
            let rid = records.len() as RecordId;
            for &att in &canonical {
                index.entry(att).or_default().push(rid);
            }
            records.push(canonical);

            if let (Some(subject_col), Some(subject_ids)) =
                (&config.subject_id, subject_ids.as_mut())
            {
                let idx = column_index[subject_col.as_str()];
                let raw = row.get(idx).map(String::as_str).unwrap_or("").to_string();
                let next_id = subject_id_table.len() as u32;
                let sid = *subject_id_table.entry(raw).or_insert(next_id);
                subject_ids.push(sid);
            }
        }

        let mut column_attributes: HashMap<String, Vec<AttributeId>> = HashMap::new();
        for (id, av) in attributes.iter() {
            column_attributes.entry(av.column.clone()).or_default().push(id);
        }

        Ok(Self {
            attributes,
            records,
            index,
            columns: attribute_columns,
            column_attributes,
            subject_ids,
        })
    }

    /// Number of records (events, in subject/event mode).
    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    /// Attribute columns, in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The interned attribute table.
    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Resolve `(col, val)` to an interned id, if present.
    pub fn attribute_id(&self, col: &str, val: &str) -> Option<AttributeId> {
        self.attributes.lookup(col, val)
    }

    /// Resolve an interned id back to its attribute pair.
    pub fn resolve(&self, id: AttributeId) -> &AttributeValue {
        self.attributes.resolve(id)
    }

    /// A record's canonical (sorted) attribute ids.
    pub fn record_attributes(&self, rid: RecordId) -> &[AttributeId] {
        &self.records[rid as usize]
    }

    /// All records, in id order.
    pub fn records(&self) -> &[Vec<AttributeId>] {
        &self.records
    }

    /// Sorted record ids containing `att_id`.
    pub fn records_containing(&self, att_id: AttributeId) -> &[RecordId] {
        self.index.get(&att_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Single-attribute support (record count), the invariant
    /// `|records_containing(a)| == count({a})`.
    pub fn support(&self, att_id: AttributeId) -> usize {
        self.records_containing(att_id).len()
    }

    /// Subject id for `rid`, when two-level counting is enabled.
    pub fn subject_of(&self, rid: RecordId) -> Option<u32> {
        self.subject_ids.as_ref().map(|v| v[rid as usize])
    }

    /// Whether two-level (subject, event) counting is enabled.
    pub fn has_subjects(&self) -> bool {
        self.subject_ids.is_some()
    }

    /// Number of distinct subjects, when two-level counting is enabled.
    pub fn num_subjects(&self) -> Option<usize> {
        self.subject_ids
            .as_ref()
            .map(|ids| ids.iter().collect::<std::collections::HashSet<_>>().len())
    }

    /// Widest record, in attribute count.
    pub fn max_record_width(&self) -> usize {
        self.records.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Effective reporting length: `requested` (if > 0), the widest record,
    /// and (when `use_columns` is non-empty) the attribute-column count are
    /// combined by taking the minimum, per spec.md §4.1.
    pub fn normalize_reporting_length(&self, requested: usize, config: &Configuration) -> usize {
        let mut candidates = vec![self.max_record_width()];
        if requested > 0 {
            candidates.push(requested);
        }
        if !config.use_columns.is_empty() {
            candidates.push(config.use_columns.len());
        }
        candidates.into_iter().min().unwrap_or(0).max(1)
    }

    /// All attribute ids appearing in at least one record, in id order. Used
    /// by aggregate-seeded/unseeded synthesis to enumerate candidates
    /// without raw record access.
    pub fn all_attribute_ids(&self) -> Vec<AttributeId> {
        self.attributes.iter().map(|(id, _)| id).collect()
    }

    /// Attribute ids interned for `col`, in id order. Empty if the column
    /// never had a present value. Used by unseeded synthesis (C5 mode A) to
    /// enumerate one column's candidate values at a time.
    pub fn attribute_ids_for_column(&self, col: &str) -> &[AttributeId] {
        self.column_attributes
            .get(col)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Decides whether `raw` is a present value for `col` under the configured
/// sensitive-zero columns, per spec.md §3: empty means absent; `"0"` is
/// absent unless `col` is listed in `sensitive_zeros`.
fn present_value<'a>(col: &str, raw: &'a str, config: &Configuration) -> Option<&'a str> {
    if raw.is_empty() {
        return None;
    }
    if raw == "0" && !config.sensitive_zeros.iter().any(|c| c == col) {
        return None;
    }
    Some(raw)
}
