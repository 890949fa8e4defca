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

/// Interned id for an `(column, value)` attribute pair.
///
/// Ids are assigned in first-seen order during `DataBlock` construction and
/// never reused, so a `DataBlock` and the aggregates derived from it can
/// share ids by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

/// A `(column, value)` attribute pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeValue {
    /// Column name.
    pub column: String,
    /// Cell value. Never empty: absent cells are not interned.
    pub value: String,
}

impl AttributeValue {
    /// The canonical ordering key: `"column:value"`, lowercased.
    ///
    /// This is the sort key the original implementation uses for both
    /// per-record attribute ordering and combination canonicalization.
    pub fn sort_key(&self) -> String {
        format!("{}:{}", self.column, self.value).to_lowercase()
    }
}

/// Bijective table mapping attribute pairs to compact ids.
///
/// Uses a contiguous id space (§9: "Arena + index for graph-like
/// structures") rather than hashed pointer graphs.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    by_id: Vec<AttributeValue>,
    by_pair: HashMap<(String, String), AttributeId>,
}

impl AttributeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned attributes.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the table has no interned attributes.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Intern `(column, value)`, returning its id. Deterministic for a given
    /// sequence of calls: the first caller for a given pair gets the next
    /// sequential id.
    pub fn intern(&mut self, column: &str, value: &str) -> AttributeId {
        let key = (column.to_string(), value.to_string());
        if let Some(&id) = self.by_pair.get(&key) {
            return id;
        }
        let id = AttributeId(self.by_id.len() as u32);
        self.by_id.push(AttributeValue {
            column: column.to_string(),
            value: value.to_string(),
        });
        self.by_pair.insert(key, id);
        id
    }

    /// Look up an already-interned id without inserting.
    pub fn lookup(&self, column: &str, value: &str) -> Option<AttributeId> {
        self.by_pair
            .get(&(column.to_string(), value.to_string()))
            .copied()
    }

    /// Resolve an id back to its attribute pair.
    pub fn resolve(&self, id: AttributeId) -> &AttributeValue {
        &self.by_id[id.0 as usize]
    }

    /// Iterate over all interned attributes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, &AttributeValue)> {
        self.by_id
            .iter()
            .enumerate()
            .map(|(i, v)| (AttributeId(i as u32), v))
    }

    /// Canonicalize a set of ids into a sorted, deduplicated combination
    /// tuple ordered by `AttributeValue::sort_key`.
    pub fn canonicalize(&self, ids: &[AttributeId]) -> Vec<AttributeId> {
        let mut sorted = ids.to_vec();
        sorted.sort_by(|a, b| {
            self.resolve(*a)
                .sort_key()
                .cmp(&self.resolve(*b).sort_key())
        });
        sorted.dedup();
        sorted
    }
}

/// Normalizes a raw input cell per spec.md §3 / §6:
///
/// - the literal substring `nan` is stripped (pandas' stringified-null
///   marker in the original source);
/// - a trailing `.0` is stripped (pandas' float coercion of integer-looking
///   columns);
/// - the reserved combination-serialization delimiters `;` and `:` are
///   replaced with `.,` and `..` respectively.
///
/// This does not decide absence (that depends on `sensitive_zeros`, which
/// is column-scoped); it only normalizes the raw text.
pub fn normalize_cell(raw: &str) -> String {
    let without_nan = raw.replace("nan", "");
    let without_trailing_float = if let Some(stripped) = without_nan.strip_suffix(".0") {
        stripped.to_string()
    } else {
        without_nan
    };
    without_trailing_float
        .replace(';', ".,")
        .replace(':', "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_deterministic_and_bijective() {
        let mut table = AttributeTable::new();
        let a = table.intern("A", "1");
        let b = table.intern("B", "x");
        let a_again = table.intern("A", "1");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(table.resolve(a).column, "A");
        assert_eq!(table.resolve(a).value, "1");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn sort_key_is_case_insensitive_column_value() {
        let v = AttributeValue {
            column: "Col".into(),
            value: "Val".into(),
        };
        assert_eq!(v.sort_key(), "col:val");
    }

    #[test]
    fn normalize_cell_strips_nan_and_trailing_float_and_escapes_reserved_chars() {
        assert_eq!(normalize_cell("nan"), "");
        assert_eq!(normalize_cell("5.0"), "5");
        assert_eq!(normalize_cell("a;b"), "a.,b");
        assert_eq!(normalize_cell("a:b"), "a..b");
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let mut table = AttributeTable::new();
        let b = table.intern("B", "x");
        let a = table.intern("A", "1");
        let canon = table.canonicalize(&[b, a, a]);
        assert_eq!(canon, vec![a, b]);
    }
}
