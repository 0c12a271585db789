//! FILENAME: pivot-engine/src/value.rs
//! Record values - the loosely-typed input side of the engine.
//!
//! Records arrive as flat key -> value maps (typically straight from JSON).
//! This module owns the two coercion policies the rest of the engine relies on:
//! - `coerce_numeric`: numeric-looking strings become numbers before aggregation
//! - `key_string`: every value has exactly one string form for grouping/filtering

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Placeholder used for a missing (absent or null) dimension value.
pub const MISSING_KEY: &str = "-";

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A single value inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Returns the number if this is a finite numeric value.
    pub fn as_finite(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// The string form used for tuple keys, filters and filter-value discovery.
    pub fn key_string(&self) -> String {
        match self {
            FieldValue::Null => MISSING_KEY.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => number_key_string(*n),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// String form of an optional value: absent keys read the same as null.
pub fn key_string(value: Option<&FieldValue>) -> String {
    value.map_or_else(|| MISSING_KEY.to_string(), FieldValue::key_string)
}

/// Shortest decimal form of a number (`10`, `1.5`, `-0.25`).
pub fn number_key_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == 0.0 {
        // also folds -0
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Turns a string that trims to a finite numeric literal into a number.
/// Every other value is returned unchanged.
pub fn coerce_numeric(value: &FieldValue) -> FieldValue {
    if let FieldValue::Text(s) = value {
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            if let Ok(n) = trimmed.parse::<f64>() {
                if n.is_finite() {
                    return FieldValue::Number(n);
                }
            }
        }
    }
    value.clone()
}

// ============================================================================
// RECORD
// ============================================================================

/// One fact row: field key -> value. A key that is not present is "absent",
/// which is distinct from an explicit null for measures (absent values are skipped).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: FxHashMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Parses a JSON array of flat objects into records.
pub fn records_from_json(json: &str) -> Result<Vec<Record>, serde_json::Error> {
    serde_json::from_str(json)
}

// ============================================================================
// DISTINCT VALUES
// ============================================================================

/// Wrapper around f64 that implements Eq and Hash for use in hash sets.
/// NaN values are treated as equal to each other, and -0 equals 0.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            u64::MAX.hash(state);
        } else if self.0 == 0.0 {
            0u64.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

/// Hashable identity of a pushed value, used by distinct counting.
/// `1` and `"1"` stay distinct here; coercion happens before values reach this point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DistinctValue {
    Null,
    Bool(bool),
    Number(OrderedFloat),
    Text(String),
}

impl From<&FieldValue> for DistinctValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => DistinctValue::Null,
            FieldValue::Bool(b) => DistinctValue::Bool(*b),
            FieldValue::Number(n) => DistinctValue::Number(OrderedFloat(*n)),
            FieldValue::Text(s) => DistinctValue::Text(s.clone()),
        }
    }
}

// ============================================================================
// ORDERING
// ============================================================================

/// Case- and accent-folded characters: the primary collation key.
fn base_letters(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
}

/// Locale-style string comparison. Base letters decide first (`Éire` sorts
/// with the `e`s), then accents (unaccented first), then case (lower case
/// first), then plain byte order so the result is total.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    base_letters(a)
        .cmp(base_letters(b))
        .then_with(|| {
            a.nfd()
                .flat_map(char::to_lowercase)
                .cmp(b.nfd().flat_map(char::to_lowercase))
        })
        .then_with(|| {
            a.chars()
                .map(char::is_uppercase)
                .cmp(b.chars().map(char::is_uppercase))
        })
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_coerce_numeric_strings() {
        assert_eq!(coerce_numeric(&FieldValue::text(" 42 ")), FieldValue::Number(42.0));
        assert_eq!(coerce_numeric(&FieldValue::text("-1.5e2")), FieldValue::Number(-150.0));
        assert_eq!(coerce_numeric(&FieldValue::text("")), FieldValue::text(""));
        assert_eq!(coerce_numeric(&FieldValue::text("   ")), FieldValue::text("   "));
        assert_eq!(coerce_numeric(&FieldValue::text("12abc")), FieldValue::text("12abc"));
        assert_eq!(coerce_numeric(&FieldValue::text("inf")), FieldValue::text("inf"));
        assert_eq!(coerce_numeric(&FieldValue::text("NaN")), FieldValue::text("NaN"));
    }

    #[test]
    fn test_coerce_numeric_leaves_non_text_alone() {
        assert_eq!(coerce_numeric(&FieldValue::Bool(true)), FieldValue::Bool(true));
        assert_eq!(coerce_numeric(&FieldValue::Null), FieldValue::Null);
        assert_eq!(coerce_numeric(&FieldValue::Number(3.0)), FieldValue::Number(3.0));
    }

    #[test]
    fn test_key_strings() {
        assert_eq!(FieldValue::Number(10.0).key_string(), "10");
        assert_eq!(FieldValue::Number(1.5).key_string(), "1.5");
        assert_eq!(FieldValue::Number(-0.0).key_string(), "0");
        assert_eq!(FieldValue::Number(f64::INFINITY).key_string(), "Infinity");
        assert_eq!(FieldValue::Bool(false).key_string(), "false");
        assert_eq!(FieldValue::Null.key_string(), "-");
        assert_eq!(key_string(None), "-");
        assert_eq!(key_string(Some(&FieldValue::text("FR"))), "FR");
    }

    #[test]
    fn test_distinct_value_identity() {
        let mut set = HashSet::new();
        set.insert(DistinctValue::from(&FieldValue::Number(1.0)));
        set.insert(DistinctValue::from(&FieldValue::text("1")));
        set.insert(DistinctValue::from(&FieldValue::Number(f64::NAN)));
        set.insert(DistinctValue::from(&FieldValue::Number(f64::NAN)));
        set.insert(DistinctValue::from(&FieldValue::Number(0.0)));
        set.insert(DistinctValue::from(&FieldValue::Number(-0.0)));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_locale_cmp() {
        let mut keys = vec!["beta", "Alpha", "alpha", "10", "Zulu", "a / b"];
        keys.sort_by(|a, b| locale_cmp(a, b));
        assert_eq!(keys, vec!["10", "a / b", "alpha", "Alpha", "beta", "Zulu"]);
    }

    #[test]
    fn test_locale_cmp_folds_accents() {
        let mut keys = vec!["Zambia", "Österreich", "Éire", "France", "eire", "Oman"];
        keys.sort_by(|a, b| locale_cmp(a, b));
        assert_eq!(keys, vec!["eire", "Éire", "France", "Oman", "Österreich", "Zambia"]);

        assert_eq!(locale_cmp("cote", "côte"), Ordering::Less);
        assert_eq!(locale_cmp("côte", "Cote"), Ordering::Greater);
    }

    #[test]
    fn test_records_from_json() {
        let records = records_from_json(r#"[{"c":"FR","u":10,"ok":true,"n":null}]"#).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.get("c"), Some(&FieldValue::text("FR")));
        assert_eq!(r.get("u"), Some(&FieldValue::Number(10.0)));
        assert_eq!(r.get("ok"), Some(&FieldValue::Bool(true)));
        assert_eq!(r.get("n"), Some(&FieldValue::Null));
        assert_eq!(r.get("missing"), None);
    }
}
