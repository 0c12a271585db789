//! FILENAME: pivot-engine/src/engine.rs
//! Pivot Engine - The grouping pass that turns records into aggregation states.
//!
//! This module takes a Layout (configuration) and a record slice (data)
//! and produces a PivotResult (cells, row/column/grand totals, ordered axes).
//!
//! Algorithm:
//! 1. Filter records against the layout's FilterSet
//! 2. Derive the row and column tuple keys for each surviving record
//! 3. Push every present measure value (numeric-coerced) into the cell,
//!    row total, column total and grand total states
//! 4. Sort the encountered row/column buckets by locale-aware key order
//!
//! The computation is a pure function of (records, layout): one fresh state
//! graph per call, nothing shared between calls.

use log::{debug, trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::{smallvec, SmallVec};

use crate::accumulator::{AggregationState, MeasureStates};
use crate::definition::{FieldCatalog, FilterSet, Layout};
use crate::error::PivotError;
use crate::value::{coerce_numeric, key_string, locale_cmp, FieldValue, Record};

/// Key and label of the single bucket used when an axis has no dimensions.
pub const ALL_KEY: &str = "All";

/// Separator between dimension values inside a tuple key.
pub const TUPLE_SEPARATOR: &str = " / ";

/// Separator between row key and column key in cell keys.
pub const CELL_KEY_SEPARATOR: &str = "__";

/// String-coerced dimension values identifying one row or column group.
pub type Tuple = SmallVec<[String; 4]>;

// ============================================================================
// RESULT STRUCTURES
// ============================================================================

/// One row or column group: its joined key and the tuple it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisBucket {
    pub key: String,
    pub tuple: Tuple,
}

impl AxisBucket {
    fn all() -> Self {
        AxisBucket {
            key: ALL_KEY.to_string(),
            tuple: smallvec![ALL_KEY.to_string()],
        }
    }
}

/// Counters collected during the grouping pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PivotStats {
    pub total_records: usize,
    pub filtered_records: usize,
    pub cell_count: usize,
    pub state_count: usize,
}

/// The cross-tab produced by one grouping pass. Read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct PivotResult {
    /// Row buckets in ascending locale order. Never empty.
    pub rows: Vec<AxisBucket>,

    /// Column buckets in ascending locale order. Never empty.
    pub cols: Vec<AxisBucket>,

    /// `"rowKey__colKey"` -> measure states. Cells without data are absent.
    pub cells: FxHashMap<String, MeasureStates>,

    pub row_totals: FxHashMap<String, MeasureStates>,

    pub col_totals: FxHashMap<String, MeasureStates>,

    pub grand_totals: MeasureStates,

    pub stats: PivotStats,
}

impl PivotResult {
    pub fn cell(&self, row_key: &str, col_key: &str) -> Option<&MeasureStates> {
        self.cells.get(&cell_key(row_key, col_key))
    }

    pub fn row_total(&self, row_key: &str) -> Option<&MeasureStates> {
        self.row_totals.get(row_key)
    }

    pub fn col_total(&self, col_key: &str) -> Option<&MeasureStates> {
        self.col_totals.get(col_key)
    }

    pub fn grand_total(&self) -> &MeasureStates {
        &self.grand_totals
    }

    /// Convenience lookup of a single cell state.
    pub fn cell_state(&self, row_key: &str, col_key: &str, measure: &str) -> Option<&AggregationState> {
        self.cell(row_key, col_key).and_then(|states| states.get(measure))
    }
}

/// Builds the cell map key for a (row, column) pair.
pub fn cell_key(row_key: &str, col_key: &str) -> String {
    let mut key = String::with_capacity(row_key.len() + CELL_KEY_SEPARATOR.len() + col_key.len());
    key.push_str(row_key);
    key.push_str(CELL_KEY_SEPARATOR);
    key.push_str(col_key);
    key
}

// ============================================================================
// PIVOT CALCULATOR
// ============================================================================

/// The grouping engine for one (layout, measure keys) configuration.
pub struct PivotCalculator<'a> {
    layout: &'a Layout,
    measure_keys: &'a [&'a str],

    cells: FxHashMap<String, MeasureStates>,
    row_totals: FxHashMap<String, MeasureStates>,
    col_totals: FxHashMap<String, MeasureStates>,
    grand_totals: MeasureStates,

    /// Encountered buckets (key -> tuple).
    row_buckets: FxHashMap<String, Tuple>,
    col_buckets: FxHashMap<String, Tuple>,

    stats: PivotStats,
}

impl<'a> PivotCalculator<'a> {
    pub fn new(layout: &'a Layout, measure_keys: &'a [&'a str]) -> Self {
        PivotCalculator {
            layout,
            measure_keys,
            cells: FxHashMap::default(),
            row_totals: FxHashMap::default(),
            col_totals: FxHashMap::default(),
            grand_totals: MeasureStates::default(),
            row_buckets: FxHashMap::default(),
            col_buckets: FxHashMap::default(),
            stats: PivotStats::default(),
        }
    }

    /// Executes the grouping pass and assembles the result.
    pub fn calculate(mut self, records: &[Record]) -> PivotResult {
        self.stats.total_records = records.len();

        for record in records {
            // Step 1: Filter
            if !passes_filters(record, &self.layout.filters) {
                continue;
            }
            self.stats.filtered_records += 1;

            // Step 2: Tuple keys
            let row_tuple = axis_tuple(record, &self.layout.rows);
            let col_tuple = axis_tuple(record, &self.layout.columns);
            let row_key = tuple_key(&row_tuple);
            let col_key = tuple_key(&col_tuple);

            // Step 3: Aggregate
            self.accumulate(record, &row_key, &col_key);

            self.row_buckets.entry(row_key).or_insert(row_tuple);
            self.col_buckets.entry(col_key).or_insert(col_tuple);
        }

        // Step 4: Order axes
        let rows = sorted_buckets(self.row_buckets);
        let cols = sorted_buckets(self.col_buckets);

        self.stats.cell_count = self.cells.len();
        self.stats.state_count = self.cells.values().map(|m| m.len()).sum::<usize>()
            + self.row_totals.values().map(|m| m.len()).sum::<usize>()
            + self.col_totals.values().map(|m| m.len()).sum::<usize>()
            + self.grand_totals.len();

        debug!(
            target: "pivot",
            "grouped {} of {} records into {} rows x {} cols ({} cells)",
            self.stats.filtered_records,
            self.stats.total_records,
            rows.len(),
            cols.len(),
            self.stats.cell_count
        );
        trace!(target: "pivot", "allocated {} aggregation states", self.stats.state_count);

        PivotResult {
            rows,
            cols,
            cells: self.cells,
            row_totals: self.row_totals,
            col_totals: self.col_totals,
            grand_totals: self.grand_totals,
            stats: self.stats,
        }
    }

    /// Pushes the record's measure values into all four aggregation targets.
    fn accumulate(&mut self, record: &Record, row_key: &str, col_key: &str) {
        let mut cell_id: Option<String> = None;

        for &measure in self.measure_keys {
            // Absent keys are skipped entirely; explicit nulls are pushed.
            let Some(raw) = record.get(measure) else {
                continue;
            };
            let value = coerce_numeric(raw);

            let id = cell_id.get_or_insert_with(|| cell_key(row_key, col_key));
            push_grouped(&mut self.cells, id, measure, &value);
            push_grouped(&mut self.row_totals, row_key, measure, &value);
            push_grouped(&mut self.col_totals, col_key, measure, &value);
            push_state(&mut self.grand_totals, measure, &value);
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// True when the record satisfies every active filter entry.
///
/// Values are matched by their `key_string` form, the same string used for
/// tuple keys. Null and absent values both read as `"-"` (as does a literal
/// `"-"` text value); there is no separate `"null"`/`"undefined"` spelling.
pub fn passes_filters(record: &Record, filters: &FilterSet) -> bool {
    filters
        .active()
        .all(|(dimension, allowed)| allowed.contains(&key_string(record.get(dimension))))
}

/// String-coerced values of `dimensions`, or `["All"]` when there are none.
pub fn axis_tuple(record: &Record, dimensions: &[String]) -> Tuple {
    if dimensions.is_empty() {
        return smallvec![ALL_KEY.to_string()];
    }
    dimensions
        .iter()
        .map(|dimension| key_string(record.get(dimension)))
        .collect()
}

/// Joins a tuple into its group key.
pub fn tuple_key(tuple: &[String]) -> String {
    if tuple.is_empty() {
        return ALL_KEY.to_string();
    }
    tuple.join(TUPLE_SEPARATOR)
}

fn push_grouped(
    groups: &mut FxHashMap<String, MeasureStates>,
    group: &str,
    measure: &str,
    value: &FieldValue,
) {
    match groups.get_mut(group) {
        Some(states) => push_state(states, measure, value),
        None => {
            let mut states = MeasureStates::default();
            push_state(&mut states, measure, value);
            groups.insert(group.to_string(), states);
        }
    }
}

fn push_state(states: &mut MeasureStates, measure: &str, value: &FieldValue) {
    match states.get_mut(measure) {
        Some(state) => state.push(value),
        None => {
            let mut state = AggregationState::new();
            state.push(value);
            states.insert(measure.to_string(), state);
        }
    }
}

fn sorted_buckets(buckets: FxHashMap<String, Tuple>) -> Vec<AxisBucket> {
    if buckets.is_empty() {
        return vec![AxisBucket::all()];
    }
    let mut sorted: Vec<AxisBucket> = buckets
        .into_iter()
        .map(|(key, tuple)| AxisBucket { key, tuple })
        .collect();
    sorted.sort_by(|a, b| locale_cmp(&a.key, &b.key));
    sorted
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Runs the grouping pass with an explicit list of measure keys.
pub fn group(records: &[Record], layout: &Layout, measure_keys: &[&str]) -> PivotResult {
    PivotCalculator::new(layout, measure_keys).calculate(records)
}

/// Calculates a pivot from records and layout.
/// This is the main entry point for the calculation engine.
///
/// Measure keys come from `Layout::measure_keys`, which does not include ratio
/// denominators; an unpaired denominator is logged and its ratio evaluates to 0.
pub fn calculate_pivot(records: &[Record], layout: &Layout) -> PivotResult {
    for denominator in layout.orphan_denominators() {
        warn!(
            target: "pivot",
            "ratio denominator '{}' is not a value key; its ratios will evaluate to 0",
            denominator
        );
    }
    let measure_keys = layout.measure_keys();
    group(records, layout, &measure_keys)
}

/// Validates the layout against the catalog, then calculates.
pub fn build_pivot(
    records: &[Record],
    layout: &Layout,
    catalog: &FieldCatalog,
) -> Result<PivotResult, PivotError> {
    layout.validate(catalog)?;
    Ok(calculate_pivot(records, layout))
}

/// Sorted distinct string forms of a dimension across the (unfiltered) records.
/// Used to offer filter choices.
pub fn distinct_values(records: &[Record], dimension: &str) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut values: Vec<String> = records
        .iter()
        .map(|record| key_string(record.get(dimension)))
        .filter(|value| seen.insert(value.clone()))
        .collect();
    values.sort_by(|a, b| locale_cmp(a, b));
    values
}

/// Source records behind a cell or total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrillDownResult {
    /// Row bucket, `None` for a column or grand total.
    pub row_key: Option<String>,
    /// Column bucket, `None` for a row or grand total.
    pub col_key: Option<String>,
    /// Indices into the input record slice, in input order.
    pub source_rows: Vec<usize>,
    pub total_count: usize,
    pub max_records: usize,
    pub is_truncated: bool,
}

/// Performs a drill-down to find the records aggregated into a cell.
pub fn drill_down(
    records: &[Record],
    layout: &Layout,
    row_key: Option<&str>,
    col_key: Option<&str>,
    max_records: usize,
) -> DrillDownResult {
    let mut result = DrillDownResult {
        row_key: row_key.map(str::to_string),
        col_key: col_key.map(str::to_string),
        max_records,
        ..DrillDownResult::default()
    };

    for (index, record) in records.iter().enumerate() {
        if !passes_filters(record, &layout.filters) {
            continue;
        }
        let row_matches = row_key.map_or(true, |k| tuple_key(&axis_tuple(record, &layout.rows)) == k);
        let col_matches =
            col_key.map_or(true, |k| tuple_key(&axis_tuple(record, &layout.columns)) == k);

        if row_matches && col_matches {
            result.total_count += 1;
            if result.source_rows.len() < max_records {
                result.source_rows.push(index);
            }
        }
    }

    result.is_truncated = result.total_count > max_records;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::finalize;
    use crate::definition::{AggregationType, Field, ValueSpec};

    fn create_test_records() -> Vec<Record> {
        vec![
            Record::new().with("c", "FR").with("p", "A").with("u", 10.0),
            Record::new().with("c", "FR").with("p", "B").with("u", 5.0),
            Record::new().with("c", "DE").with("p", "A").with("u", 7.0),
        ]
    }

    fn create_test_layout() -> Layout {
        Layout::new()
            .with_rows(["c"])
            .with_columns(["p"])
            .with_value(ValueSpec::new("u_sum", "u", "Units", AggregationType::Sum))
    }

    fn sum_of(states: Option<&MeasureStates>, measure: &str) -> f64 {
        finalize(states.and_then(|s| s.get(measure)), AggregationType::Sum)
    }

    #[test]
    fn test_basic_cross_tab() {
        let result = calculate_pivot(&create_test_records(), &create_test_layout());

        let row_keys: Vec<&str> = result.rows.iter().map(|b| b.key.as_str()).collect();
        let col_keys: Vec<&str> = result.cols.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(row_keys, vec!["DE", "FR"]);
        assert_eq!(col_keys, vec!["A", "B"]);

        assert_eq!(sum_of(result.cell("FR", "A"), "u"), 10.0);
        assert_eq!(sum_of(result.cell("FR", "B"), "u"), 5.0);
        assert_eq!(sum_of(result.cell("DE", "A"), "u"), 7.0);
        assert!(result.cell("DE", "B").is_none());
        assert_eq!(sum_of(result.cell("DE", "B"), "u"), 0.0);

        assert_eq!(sum_of(result.row_total("FR"), "u"), 15.0);
        assert_eq!(sum_of(result.row_total("DE"), "u"), 7.0);
        assert_eq!(sum_of(result.col_total("A"), "u"), 17.0);
        assert_eq!(sum_of(Some(result.grand_total()), "u"), 22.0);
    }

    #[test]
    fn test_no_row_or_column_fields() {
        let layout = Layout::new().with_value(ValueSpec::new("v", "u", "Units", AggregationType::Sum));
        let result = calculate_pivot(&create_test_records(), &layout);

        assert_eq!(result.rows, vec![AxisBucket::all()]);
        assert_eq!(result.cols, vec![AxisBucket::all()]);
        assert_eq!(sum_of(result.cell("All", "All"), "u"), 22.0);
        assert_eq!(sum_of(Some(result.grand_total()), "u"), 22.0);
    }

    #[test]
    fn test_empty_input_falls_back_to_all_bucket() {
        let result = calculate_pivot(&[], &create_test_layout());
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].key, "All");
        assert_eq!(result.cols[0].key, "All");
        assert!(result.cells.is_empty());
        assert!(result.grand_totals.is_empty());
    }

    #[test]
    fn test_multi_dimension_tuple_keys() {
        let records = vec![
            Record::new().with("c", "FR").with("p", "A").with("u", 1.0),
            Record::new().with("p", "B").with("u", 2.0),
        ];
        let layout = Layout::new()
            .with_rows(["c", "p"])
            .with_value(ValueSpec::new("v", "u", "Units", AggregationType::Sum));
        let result = calculate_pivot(&records, &layout);

        let keys: Vec<&str> = result.rows.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["- / B", "FR / A"]);
        assert_eq!(result.rows[0].tuple.to_vec(), vec!["-", "B"]);
        assert_eq!(result.cols[0].key, "All");
    }

    #[test]
    fn test_filters_restrict_records() {
        let layout = create_test_layout().with_filters(FilterSet::new().with_allowed("c", ["FR"]));
        let result = calculate_pivot(&create_test_records(), &layout);

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].key, "FR");
        assert_eq!(result.stats.filtered_records, 2);
        assert_eq!(sum_of(Some(result.grand_total()), "u"), 15.0);
    }

    #[test]
    fn test_missing_values_filter_as_dash() {
        let mut records = create_test_records();
        records.push(Record::new().with("p", "A").with("u", 1.0));
        records.push(Record::new().with("c", FieldValue::Null).with("p", "B").with("u", 2.0));
        records.push(Record::new().with("c", "-").with("p", "B").with("u", 4.0));

        let dash = create_test_layout().with_filters(FilterSet::new().with_allowed("c", ["-"]));
        let result = calculate_pivot(&records, &dash);
        assert_eq!(result.stats.filtered_records, 3);
        assert_eq!(sum_of(Some(result.grand_total()), "u"), 7.0);

        let spelled = create_test_layout().with_filters(FilterSet::new().with_allowed("c", ["null", "undefined"]));
        let result = calculate_pivot(&records, &spelled);
        assert_eq!(result.stats.filtered_records, 0);
    }

    #[test]
    fn test_repeated_groups_accumulate_into_one_state() {
        let records = vec![
            Record::new().with("c", "FR").with("u", 1.0),
            Record::new().with("c", "FR").with("u", 2.0),
            Record::new().with("c", "FR").with("u", 3.0),
        ];
        let layout = Layout::new()
            .with_rows(["c"])
            .with_value(ValueSpec::new("v", "u", "Units", AggregationType::Sum));
        let result = calculate_pivot(&records, &layout);

        assert_eq!(result.row_totals.len(), 1);
        assert_eq!(result.row_totals["FR"]["u"].count, 3);
        assert_eq!(result.cell_state("FR", "All", "u").map(|s| s.sum), Some(6.0));
        assert_eq!(result.stats.state_count, 4);
    }

    #[test]
    fn test_empty_filter_set_is_no_restriction() {
        let layout = create_test_layout()
            .with_filters(FilterSet::new().with_allowed("c", Vec::<String>::new()));
        let result = calculate_pivot(&create_test_records(), &layout);
        assert_eq!(result.stats.filtered_records, 3);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let records = vec![
            Record::new().with("u", " 4 "),
            Record::new().with("u", "6"),
            Record::new().with("u", "n/a"),
        ];
        let layout = Layout::new().with_value(ValueSpec::new("v", "u", "Units", AggregationType::Sum));
        let result = calculate_pivot(&records, &layout);
        let grand = &result.grand_totals["u"];
        assert_eq!(grand.sum, 10.0);
        assert_eq!(grand.count, 3);
    }

    #[test]
    fn test_absent_measure_is_skipped_but_null_is_counted() {
        let records = vec![
            Record::new().with("c", "FR"),
            Record::new().with("c", "FR").with("u", FieldValue::Null),
        ];
        let layout = Layout::new()
            .with_rows(["c"])
            .with_value(ValueSpec::new("v", "u", "Units", AggregationType::Count));
        let result = calculate_pivot(&records, &layout);
        assert_eq!(result.grand_totals["u"].count, 1);
        assert_eq!(result.rows[0].key, "FR");
    }

    #[test]
    fn test_unpaired_denominator_is_never_populated() {
        let records = vec![Record::new().with("r", 10.0).with("u", 2.0)];
        let layout = Layout::new()
            .with_value(ValueSpec::ratio("q", "r", "u", "Rev/Unit", AggregationType::Sum));
        let result = calculate_pivot(&records, &layout);
        assert!(result.grand_totals.contains_key("r"));
        assert!(!result.grand_totals.contains_key("u"));
    }

    #[test]
    fn test_idempotent() {
        let records = create_test_records();
        let layout = create_test_layout();
        let a = calculate_pivot(&records, &layout);
        let b = calculate_pivot(&records, &layout);
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.cols, b.cols);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_build_pivot_validates() {
        let catalog = FieldCatalog::new(vec![Field::dimension("c", "Country"), Field::measure("u", "Units")]);
        let bad = Layout::new().with_rows(["u"]);
        assert!(matches!(
            build_pivot(&create_test_records(), &bad, &catalog),
            Err(PivotError::NotADimension(_))
        ));
        let good = Layout::new()
            .with_rows(["c"])
            .with_value(ValueSpec::new("v", "u", "Units", AggregationType::Sum));
        assert!(build_pivot(&create_test_records(), &good, &catalog).is_ok());
    }

    #[test]
    fn test_distinct_values() {
        let mut records = create_test_records();
        records.push(Record::new().with("u", 1.0));
        assert_eq!(distinct_values(&records, "c"), vec!["-", "DE", "FR"]);
        assert_eq!(distinct_values(&records, "u"), vec!["1", "10", "5", "7"]);
    }

    #[test]
    fn test_drill_down() {
        let records = create_test_records();
        let layout = create_test_layout();

        let cell = drill_down(&records, &layout, Some("FR"), Some("A"), 10);
        assert_eq!(cell.source_rows, vec![0]);
        assert_eq!(cell.total_count, 1);

        let column = drill_down(&records, &layout, None, Some("A"), 10);
        assert_eq!(column.source_rows, vec![0, 2]);

        let grand = drill_down(&records, &layout, None, None, 2);
        assert_eq!(grand.source_rows, vec![0, 1]);
        assert_eq!(grand.total_count, 3);
        assert!(grand.is_truncated);
    }
}
