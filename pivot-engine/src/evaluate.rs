//! FILENAME: pivot-engine/src/evaluate.rs
//! Value evaluation and display formatting.
//!
//! `evaluate` turns the measure states of one cell (or total) into the number
//! a ValueSpec asks for, including ratio measures. `format_value` turns that
//! number into display text according to the spec's format hint.

use serde::{Deserialize, Serialize};

use crate::accumulator::{finalize, MeasureStates};
use crate::definition::{AggregationType, ValueFormat, ValueSpec};

// ============================================================================
// EVALUATION
// ============================================================================

/// Final numeric value of `spec` for one cell/total. `None` states mean
/// "no data here" and evaluate like absent measures (0).
pub fn evaluate(states: Option<&MeasureStates>, spec: &ValueSpec) -> f64 {
    let numerator = finalize(states.and_then(|s| s.get(&spec.key)), spec.agg);

    if !spec.is_ratio() {
        return numerator;
    }

    let denominator = finalize(
        spec.denominator_key
            .as_deref()
            .and_then(|key| states.and_then(|s| s.get(key))),
        spec.agg,
    );

    if denominator == 0.0 || denominator.is_nan() {
        0.0
    } else {
        numerator / denominator
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Locale settings for display formatting. Defaults to en-US.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormatOptions {
    pub currency_symbol: String,
    pub thousands_separator: char,
    pub decimal_separator: char,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            currency_symbol: "$".to_string(),
            thousands_separator: ',',
            decimal_separator: '.',
        }
    }
}

/// Display text for an evaluated value. Non-finite values render as "-".
pub fn format_value(value: f64, spec: &ValueSpec, options: &FormatOptions) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }

    match spec.format {
        Some(ValueFormat::Percent) => {
            format!("{}%", format_grouped(value * 100.0, 1, 1, options))
        }
        Some(ValueFormat::Currency) => format_currency(value, options),
        Some(ValueFormat::Decimal) => format_grouped(value, 2, 2, options),
        Some(ValueFormat::Compact) => format_compact(value, options),
        None if spec.is_ratio() => {
            format!("{:.1}%", normalize_zero(round_to(value * 100.0, 1)))
        }
        Some(ValueFormat::Number) | None => {
            let max_fraction = if spec.agg == AggregationType::Average { 1 } else { 0 };
            format_grouped(value, 0, max_fraction, options)
        }
    }
}

/// Rounds half away from zero at `decimals` fractional digits.
fn round_to(value: f64, decimals: usize) -> f64 {
    if decimals == 0 {
        return value.round();
    }
    let factor = 10_f64.powi(decimals as i32);
    let scaled = value * factor;
    // too large to carry fractional digits anyway
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

fn normalize_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

/// Locale number with between `min_fraction` and `max_fraction` digits after
/// the separator (trailing zeros beyond the minimum are dropped).
fn format_grouped(value: f64, min_fraction: usize, max_fraction: usize, options: &FormatOptions) -> String {
    let rounded = normalize_zero(round_to(value, max_fraction));
    let fixed = format!("{:.prec$}", rounded.abs(), prec = max_fraction);

    let (integer_part, fraction_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (fixed.as_str(), ""),
    };

    let mut fraction = fraction_part.to_string();
    while fraction.len() > min_fraction && fraction.ends_with('0') {
        fraction.pop();
    }

    let mut result = String::new();
    if rounded < 0.0 {
        result.push('-');
    }
    result.push_str(&add_thousands_separator(integer_part, options.thousands_separator));
    if !fraction.is_empty() {
        result.push(options.decimal_separator);
        result.push_str(&fraction);
    }
    result
}

/// Add thousands separators to a string of digits.
fn add_thousands_separator(digits: &str, separator: char) -> String {
    let len = digits.len();
    let mut result = String::with_capacity(len + len / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(separator);
        }
        result.push(c);
    }

    result
}

/// Format a number as whole currency units, sign before the symbol.
fn format_currency(value: f64, options: &FormatOptions) -> String {
    let rounded = normalize_zero(value.round());
    let formatted = format_grouped(rounded.abs(), 0, 0, options);

    if rounded < 0.0 {
        format!("-{}{}", options.currency_symbol, formatted)
    } else {
        format!("{}{}", options.currency_symbol, formatted)
    }
}

/// Short compact notation with at most one fractional digit (`1.2K`, `3M`).
fn format_compact(value: f64, options: &FormatOptions) -> String {
    const UNITS: [(f64, &str); 5] = [(1.0, ""), (1e3, "K"), (1e6, "M"), (1e9, "B"), (1e12, "T")];

    let abs = value.abs();
    let base = round_to(abs, 1);
    let mut unit = UNITS.iter().rposition(|(size, _)| base >= *size).unwrap_or(0);

    let mut scaled = round_to(abs / UNITS[unit].0, 1);
    // 999.96K rounds up into the next unit
    if scaled >= 1000.0 && unit + 1 < UNITS.len() {
        unit += 1;
        scaled = round_to(abs / UNITS[unit].0, 1);
    }

    let body = format_grouped(scaled, 0, 1, options);
    if value < 0.0 && scaled != 0.0 {
        format!("-{}{}", body, UNITS[unit].1)
    } else {
        format!("{}{}", body, UNITS[unit].1)
    }
}
