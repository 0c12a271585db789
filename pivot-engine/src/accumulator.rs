//! FILENAME: pivot-engine/src/accumulator.rs
//! Aggregation state - the incremental accumulator behind every cell and total.
//!
//! One `AggregationState` exists per (group, measure) pair. It is created the
//! first time a value is pushed into it, mutated in place during the grouping
//! pass, and only read afterwards.
//!
//! Memory note: `distinct` keeps every distinct pushed value, so a distinctCount
//! over a high-cardinality field grows linearly with the data.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::definition::AggregationType;
use crate::value::{DistinctValue, FieldValue};

/// Measure key -> state, for one group.
pub type MeasureStates = FxHashMap<String, AggregationState>;

/// Accumulator for computing aggregates incrementally.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationState {
    pub sum: f64,
    /// Every pushed value, numeric or not, duplicates included.
    pub count: u64,
    /// Stays at +Infinity until a finite number is pushed.
    pub min: f64,
    /// Stays at -Infinity until a finite number is pushed.
    pub max: f64,
    pub distinct: FxHashSet<DistinctValue>,
}

impl Default for AggregationState {
    fn default() -> Self {
        AggregationState::new()
    }
}

impl AggregationState {
    pub fn new() -> Self {
        AggregationState {
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            distinct: FxHashSet::default(),
        }
    }

    /// Adds a value. Only finite numbers touch sum/min/max; everything is
    /// counted and recorded for distinct counting.
    pub fn push(&mut self, value: &FieldValue) {
        if let Some(n) = value.as_finite() {
            self.sum += n;
            self.min = self.min.min(n);
            self.max = self.max.max(n);
        }
        self.count += 1;
        self.distinct.insert(DistinctValue::from(value));
    }

    pub fn distinct_count(&self) -> usize {
        self.distinct.len()
    }

    /// Computes the final aggregate value.
    ///
    /// When only non-numeric values were pushed, min/max return their
    /// infinite sentinels (count > 0); formatting renders those as "-".
    pub fn finalize(&self, aggregation: AggregationType) -> f64 {
        match aggregation {
            AggregationType::Sum => self.sum,
            AggregationType::Average => {
                if self.count > 0 {
                    self.sum / (self.count as f64)
                } else {
                    0.0
                }
            }
            AggregationType::Count => self.count as f64,
            AggregationType::DistinctCount => self.distinct.len() as f64,
            AggregationType::Min => {
                if self.count > 0 {
                    self.min
                } else {
                    0.0
                }
            }
            AggregationType::Max => {
                if self.count > 0 {
                    self.max
                } else {
                    0.0
                }
            }
        }
    }
}

/// Finalizes a possibly absent state. Absent means 0.
pub fn finalize(state: Option<&AggregationState>, aggregation: AggregationType) -> f64 {
    state.map_or(0.0, |s| s.finalize(aggregation))
}
