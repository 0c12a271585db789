//! FILENAME: pivot-engine/src/memo.rs
//! Caller-owned memoization of pivot results.
//!
//! The engine itself never caches. A collaborator that re-renders often
//! (hover, drag) keeps a `PivotMemo` and only pays for the grouping pass when
//! the record set or the layout actually changed.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::debug;
use rustc_hash::FxHasher;

use crate::definition::Layout;
use crate::engine::{calculate_pivot, PivotResult};
use crate::value::Record;

/// Structural hash of a layout. Equal layouts always share a fingerprint.
pub fn layout_fingerprint(layout: &Layout) -> u64 {
    let mut hasher = FxHasher::default();
    layout.hash(&mut hasher);
    hasher.finish()
}

/// Holds the last computed result and the inputs it was computed from.
///
/// Records are keyed by `Arc` identity. The memo keeps its own handle on the
/// record set, so the allocation cannot be reused by another set while the
/// cached result refers to it.
#[derive(Debug, Default)]
pub struct PivotMemo {
    records: Option<Arc<[Record]>>,
    fingerprint: u64,
    layout: Option<Layout>,
    cached: Option<PivotResult>,
    computations: u64,
}

impl PivotMemo {
    pub fn new() -> Self {
        PivotMemo::default()
    }

    fn holds(&self, records: &Arc<[Record]>, fingerprint: u64, layout: &Layout) -> bool {
        let same_records = self
            .records
            .as_ref()
            .map_or(false, |held| Arc::ptr_eq(held, records));
        same_records && self.fingerprint == fingerprint && self.layout.as_ref() == Some(layout)
    }

    /// Returns the cached result, recomputing only when the inputs changed.
    pub fn get_or_compute(&mut self, records: &Arc<[Record]>, layout: &Layout) -> &PivotResult {
        let fingerprint = layout_fingerprint(layout);
        if !self.holds(records, fingerprint, layout) {
            self.cached = None;
            self.records = Some(Arc::clone(records));
            self.fingerprint = fingerprint;
            self.layout = Some(layout.clone());
        }

        let computations = &mut self.computations;
        self.cached.get_or_insert_with(|| {
            *computations += 1;
            debug!(target: "pivot", "memo miss, recomputing (#{})", computations);
            calculate_pivot(records, layout)
        })
    }

    /// Drops the cached result and releases the held record set.
    pub fn invalidate(&mut self) {
        self.records = None;
        self.layout = None;
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// Number of grouping passes this memo has run.
    pub fn computations(&self) -> u64 {
        self.computations
    }
}
