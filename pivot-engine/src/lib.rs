//! FILENAME: pivot-engine/src/lib.rs
//! In-process pivot (cross-tab) engine for dashboard record sets.
//!
//! Given flat records and a declarative layout (row, column, filter and value
//! shelves), the engine groups the records in a single pass and exposes the
//! cross-tab with row totals, column totals and a grand total, plus table,
//! chart-series and CSV projections.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the pivot IS)
//! - `value`: Record values and the coercion policies
//! - `accumulator`: Incremental aggregation state per (group, measure)
//! - `engine`: The grouping pass (HOW we calculate)
//! - `evaluate`: Final numbers and display text per value spec
//! - `view`: Table, chart and CSV projections (WHAT we display)
//! - `memo`: Optional caller-owned result cache

pub mod accumulator;
pub mod definition;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod memo;
pub mod value;
pub mod view;

pub use accumulator::{finalize, AggregationState, MeasureStates};
pub use definition::*;
pub use engine::{
    axis_tuple, build_pivot, calculate_pivot, cell_key, distinct_values, drill_down, group,
    passes_filters, tuple_key, AxisBucket, DrillDownResult, PivotCalculator, PivotResult,
    PivotStats, Tuple, ALL_KEY,
};
pub use error::PivotError;
pub use evaluate::{evaluate, format_value, FormatOptions};
pub use memo::{layout_fingerprint, PivotMemo};
pub use value::{coerce_numeric, key_string, locale_cmp, records_from_json, FieldValue, Record};
pub use view::*;
