//! FILENAME: pivot-engine/src/view.rs
//! Pivot View - Read-only projections of a PivotResult for collaborators.
//!
//! Three views are built from the same result:
//! - `table_view`: the cross-tab grid, with a totals column and footer row
//!   when columns are configured
//! - `chart_series`: one series per column bucket for a single ValueSpec
//! - `write_csv` / `to_csv_string`: the same grid as quoted CSV
//!
//! Totals are always evaluated against their own total states, never
//! re-derived from cells (avg/distinctCount/min/max do not add up).

use std::io;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::accumulator::MeasureStates;
use crate::definition::{FieldCatalog, Layout, ValueSpec};
use crate::engine::{PivotResult, Tuple};
use crate::error::PivotError;
use crate::evaluate::{evaluate, format_value, FormatOptions};
use crate::value::number_key_string;

/// Label used for the totals column bucket and the footer row.
pub const TOTALS_LABEL: &str = "Totals";

// ============================================================================
// TABLE VIEW
// ============================================================================

/// One evaluated value with its display text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCell {
    pub value: f64,
    pub display: String,
}

/// Header of one value column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumn {
    /// Column bucket key, `None` for the row-totals column.
    pub col_key: Option<String>,
    pub value_id: String,
    pub label: String,
}

/// One data (or footer) row of the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub key: String,
    pub tuple: Tuple,
    /// One entry per `TableView::columns`, in the same order.
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    /// Labels of the row dimensions.
    pub row_headers: Vec<String>,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
    /// Column totals + grand totals; present only when columns are configured.
    pub footer: Option<TableRow>,
}

fn table_cell(states: Option<&MeasureStates>, spec: &ValueSpec, options: &FormatOptions) -> TableCell {
    let value = evaluate(states, spec);
    TableCell {
        value,
        display: format_value(value, spec, options),
    }
}

/// Builds the table view: for every row, each column bucket's values (in
/// `layout.values` order), then the row totals when columns are configured.
pub fn table_view(
    result: &PivotResult,
    layout: &Layout,
    catalog: &FieldCatalog,
    options: &FormatOptions,
) -> TableView {
    let has_columns = layout.has_columns();

    let mut columns = Vec::new();
    for col in &result.cols {
        for spec in &layout.values {
            columns.push(TableColumn {
                col_key: Some(col.key.clone()),
                value_id: spec.id.clone(),
                label: spec.label.clone(),
            });
        }
    }
    if has_columns {
        for spec in &layout.values {
            columns.push(TableColumn {
                col_key: None,
                value_id: spec.id.clone(),
                label: spec.label.clone(),
            });
        }
    }

    let rows = result
        .rows
        .iter()
        .map(|row| {
            let mut cells = Vec::with_capacity(columns.len());
            for col in &result.cols {
                let states = result.cell(&row.key, &col.key);
                cells.extend(layout.values.iter().map(|spec| table_cell(states, spec, options)));
            }
            if has_columns {
                let totals = result.row_total(&row.key);
                cells.extend(layout.values.iter().map(|spec| table_cell(totals, spec, options)));
            }
            TableRow {
                key: row.key.clone(),
                tuple: row.tuple.clone(),
                cells,
            }
        })
        .collect();

    let footer = has_columns.then(|| {
        let mut cells = Vec::with_capacity(columns.len());
        for col in &result.cols {
            let totals = result.col_total(&col.key);
            cells.extend(layout.values.iter().map(|spec| table_cell(totals, spec, options)));
        }
        let grand = Some(result.grand_total());
        cells.extend(layout.values.iter().map(|spec| table_cell(grand, spec, options)));
        TableRow {
            key: TOTALS_LABEL.to_string(),
            tuple: Tuple::from_elem(TOTALS_LABEL.to_string(), 1),
            cells,
        }
    });

    TableView {
        row_headers: layout.rows.iter().map(|key| catalog.label(key).to_string()).collect(),
        columns,
        rows,
        footer,
    }
}

// ============================================================================
// CHART SERIES VIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// Row bucket key.
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

/// One series per column bucket (or a single series named after the value
/// when no columns are configured), one point per row bucket.
pub fn chart_series(result: &PivotResult, layout: &Layout, spec: &ValueSpec) -> Vec<ChartSeries> {
    result
        .cols
        .iter()
        .map(|col| ChartSeries {
            name: if layout.has_columns() {
                col.key.clone()
            } else {
                spec.label.clone()
            },
            points: result
                .rows
                .iter()
                .map(|row| ChartPoint {
                    label: row.key.clone(),
                    value: evaluate(result.cell(&row.key, &col.key), spec),
                })
                .collect(),
        })
        .collect()
}

// ============================================================================
// CSV VIEW
// ============================================================================

fn csv_number(value: f64) -> String {
    number_key_string(value)
}

/// The CSV grid as plain string rows: header, one row per row bucket, footer.
///
/// Header width is `rows + (col buckets + totals bucket) * values`, where the
/// totals bucket exists only when columns are configured.
pub fn csv_rows(result: &PivotResult, layout: &Layout, catalog: &FieldCatalog) -> Vec<Vec<String>> {
    let has_columns = layout.has_columns();
    let row_dims = layout.rows.len();
    let mut out = Vec::with_capacity(result.rows.len() + 2);

    let mut header: Vec<String> = layout.rows.iter().map(|key| catalog.label(key).to_string()).collect();
    for col in &result.cols {
        for spec in &layout.values {
            header.push(if has_columns {
                format!("{} - {}", col.key, spec.label)
            } else {
                spec.label.clone()
            });
        }
    }
    if has_columns {
        header.extend(layout.values.iter().map(|spec| format!("{} - {}", TOTALS_LABEL, spec.label)));
    }
    out.push(header);

    for row in &result.rows {
        let mut line: Vec<String> = row.tuple.iter().take(row_dims).cloned().collect();
        for col in &result.cols {
            let states = result.cell(&row.key, &col.key);
            line.extend(layout.values.iter().map(|spec| csv_number(evaluate(states, spec))));
        }
        if has_columns {
            let totals = result.row_total(&row.key);
            line.extend(layout.values.iter().map(|spec| csv_number(evaluate(totals, spec))));
        }
        out.push(line);
    }

    let mut footer: Vec<String> = (0..row_dims)
        .map(|i| if i == 0 { TOTALS_LABEL.to_string() } else { String::new() })
        .collect();
    for col in &result.cols {
        let totals = result.col_total(&col.key);
        footer.extend(layout.values.iter().map(|spec| csv_number(evaluate(totals, spec))));
    }
    if has_columns {
        let grand = Some(result.grand_total());
        footer.extend(layout.values.iter().map(|spec| csv_number(evaluate(grand, spec))));
    }
    out.push(footer);

    out
}

/// Streams the CSV view into `writer`. Every field is quoted, embedded quotes doubled.
pub fn write_csv<W: io::Write>(
    result: &PivotResult,
    layout: &Layout,
    catalog: &FieldCatalog,
    writer: W,
) -> Result<W, PivotError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    for line in csv_rows(result, layout, catalog) {
        csv_writer.write_record(&line)?;
    }
    csv_writer.flush()?;

    csv_writer.into_inner().map_err(|e| PivotError::Io(e.into_error()))
}

/// The CSV view as a UTF-8 string.
pub fn to_csv_string(result: &PivotResult, layout: &Layout, catalog: &FieldCatalog) -> Result<String, PivotError> {
    let bytes = write_csv(result, layout, catalog, Vec::new())?;
    Ok(String::from_utf8(bytes)?)
}

/// File name for a CSV download: `<prefix>-YYYYMMDD-HHMMSS.csv`.
pub fn export_file_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}-{}.csv", prefix, at.format("%Y%m%d-%H%M%S"))
}
