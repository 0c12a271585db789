//! FILENAME: pivot-engine/src/definition.rs
//! Pivot Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a pivot:
//! the field catalog, the value specs and the layout (row/column/filter/value shelves).
//! These structures are designed to be:
//! - Serializable (JSON from the dashboard layer)
//! - Hashable, so a layout can key a memoized result
//! - Immutable snapshots of user intent

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::PivotError;

// ============================================================================
// FIELD CATALOG
// ============================================================================

/// Whether a field partitions records or gets aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Dimension,
    Measure,
}

/// Static description of one available field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Unique key used in records.
    pub key: String,

    /// Display label (used for CSV/table headers).
    pub label: String,

    pub kind: FieldKind,

    #[serde(default)]
    pub description: String,
}

impl Field {
    pub fn dimension(key: impl Into<String>, label: impl Into<String>) -> Self {
        Field {
            key: key.into(),
            label: label.into(),
            kind: FieldKind::Dimension,
            description: String::new(),
        }
    }

    pub fn measure(key: impl Into<String>, label: impl Into<String>) -> Self {
        Field {
            key: key.into(),
            label: label.into(),
            kind: FieldKind::Measure,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_dimension(&self) -> bool {
        self.kind == FieldKind::Dimension
    }
}

/// The set of fields a dashboard exposes, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldCatalog {
    fields: Vec<Field>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<Field>) -> Self {
        FieldCatalog { fields }
    }

    pub fn from_json(json: &str) -> Result<Self, PivotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Display label for a key, falling back to the key itself.
    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.get(key).map_or(key, |f| f.label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Dimension)
    }

    pub fn measures(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Measure)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for value specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationType {
    Sum,
    #[serde(rename = "avg")]
    Average,
    Count,
    DistinctCount,
    Min,
    Max,
}

impl Default for AggregationType {
    fn default() -> Self {
        AggregationType::Sum
    }
}

impl AggregationType {
    /// Aggregations that make sense for non-numeric (dimension) values.
    pub fn is_categorical(self) -> bool {
        matches!(self, AggregationType::Count | AggregationType::DistinctCount)
    }
}

/// Derived measure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcKind {
    /// `finalize(key) / finalize(denominatorKey)`, 0 when the denominator is 0.
    Ratio,
}

/// Display format hint for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Number,
    Currency,
    Percent,
    Decimal,
    Compact,
}

// ============================================================================
// VALUE SPEC
// ============================================================================

/// One entry of the values shelf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSpec {
    /// Stable identifier (survives UI re-renders).
    pub id: String,

    /// Source field (the numerator for ratios).
    pub key: String,

    /// Denominator field for `calc = ratio`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator_key: Option<String>,

    pub label: String,

    #[serde(default)]
    pub agg: AggregationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc: Option<CalcKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
}

impl ValueSpec {
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        label: impl Into<String>,
        agg: AggregationType,
    ) -> Self {
        ValueSpec {
            id: id.into(),
            key: key.into(),
            denominator_key: None,
            label: label.into(),
            agg,
            calc: None,
            format: None,
        }
    }

    pub fn ratio(
        id: impl Into<String>,
        key: impl Into<String>,
        denominator_key: impl Into<String>,
        label: impl Into<String>,
        agg: AggregationType,
    ) -> Self {
        ValueSpec {
            denominator_key: Some(denominator_key.into()),
            calc: Some(CalcKind::Ratio),
            ..ValueSpec::new(id, key, label, agg)
        }
    }

    /// Default spec for a field dropped on the values shelf.
    /// Dimensions are counted rather than summed.
    pub fn for_field(field: &Field) -> Self {
        let agg = match field.kind {
            FieldKind::Measure => AggregationType::Sum,
            FieldKind::Dimension => AggregationType::Count,
        };
        ValueSpec::new(field.key.clone(), field.key.clone(), field.label.clone(), agg)
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn is_ratio(&self) -> bool {
        self.calc == Some(CalcKind::Ratio)
    }
}

// ============================================================================
// FILTER SET
// ============================================================================

/// Dimension key -> allowed string forms of its values.
/// An empty or absent set means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSet {
    pub fn new() -> Self {
        FilterSet::default()
    }

    /// Builder-style: restricts `dimension` to `values`.
    pub fn with_allowed<I, S>(mut self, dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_allowed(dimension, values);
        self
    }

    pub fn set_allowed<I, S>(&mut self, dimension: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .insert(dimension.into(), values.into_iter().map(Into::into).collect());
    }

    /// Adds one allowed value to a dimension's set.
    pub fn allow(&mut self, dimension: impl Into<String>, value: impl Into<String>) {
        self.allowed.entry(dimension.into()).or_default().insert(value.into());
    }

    pub fn clear(&mut self, dimension: &str) {
        self.allowed.remove(dimension);
    }

    pub fn allowed(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(dimension)
    }

    /// Entries that actually restrict records (non-empty sets).
    pub fn active(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.allowed
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| (key.as_str(), values))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

/// The complete pivot configuration: what goes on each shelf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    /// Row dimensions, outer to inner.
    #[serde(default)]
    pub rows: Vec<String>,

    /// Column dimensions, outer to inner.
    #[serde(default)]
    pub columns: Vec<String>,

    #[serde(default)]
    pub filters: FilterSet,

    /// Value specs, in display order within each column bucket.
    #[serde(default)]
    pub values: Vec<ValueSpec>,
}

impl Layout {
    pub fn new() -> Self {
        Layout::default()
    }

    pub fn from_json(json: &str) -> Result<Self, PivotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PivotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn with_rows<I, S>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows = rows.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_value(mut self, spec: ValueSpec) -> Self {
        self.values.push(spec);
        self
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Fields that get aggregated: the union of every `ValueSpec.key`, in first-seen order.
    ///
    /// Denominator keys are deliberately NOT included. A ratio whose denominator
    /// is not also used as a plain value key never gets a populated denominator
    /// state and evaluates to 0 everywhere (see `orphan_denominators`).
    pub fn measure_keys(&self) -> Vec<&str> {
        let mut seen = FxHashSet::default();
        self.values
            .iter()
            .map(|v| v.key.as_str())
            .filter(|key| seen.insert(*key))
            .collect()
    }

    /// Ratio denominators that are not collected as measure keys.
    pub fn orphan_denominators(&self) -> Vec<&str> {
        let measures = self.measure_keys();
        let mut seen = FxHashSet::default();
        self.values
            .iter()
            .filter(|v| v.is_ratio())
            .filter_map(|v| v.denominator_key.as_deref())
            .filter(|key| !measures.contains(key) && seen.insert(*key))
            .collect()
    }

    /// Checks the layout against the catalog. Runs once when a layout is built,
    /// never per record.
    ///
    /// Unknown value keys are allowed: they aggregate to 0.
    pub fn validate(&self, catalog: &FieldCatalog) -> Result<(), PivotError> {
        let grouping = self
            .rows
            .iter()
            .chain(self.columns.iter())
            .map(String::as_str)
            .chain(self.filters.dimensions());

        for key in grouping {
            let field = catalog
                .get(key)
                .ok_or_else(|| PivotError::UnknownField(key.to_string()))?;
            if !field.is_dimension() {
                return Err(PivotError::NotADimension(key.to_string()));
            }
        }

        let mut ids = FxHashSet::default();
        for spec in &self.values {
            if !ids.insert(spec.id.as_str()) {
                return Err(PivotError::DuplicateValueId(spec.id.clone()));
            }
            if spec.is_ratio() && spec.denominator_key.is_none() {
                return Err(PivotError::MissingDenominator(spec.id.clone()));
            }
            if let Some(field) = catalog.get(&spec.key) {
                if field.is_dimension() && !spec.agg.is_categorical() {
                    return Err(PivotError::DimensionAggregation {
                        key: spec.key.clone(),
                        agg: spec.agg,
                    });
                }
            }
        }

        Ok(())
    }
}
