//! Numeric helpers shared by the formula evaluator and the category tracker.
//!
//! Every division that feeds a display goes through [`safe_divide`] or
//! [`safe_percent`], so a zero or NaN operand shows up as `0` and never as
//! `NaN` or `inf`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_NUMBER: Regex =
        Regex::new(r"^\s*[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap();
}

/// `value / divisor`, or `0` when the divisor is zero or either side is NaN.
pub fn safe_divide(value: f64, divisor: f64) -> f64 {
    if divisor == 0.0 || value.is_nan() || divisor.is_nan() {
        return 0.0;
    }
    value / divisor
}

/// `value` as a percentage of `total`, with the same guards as [`safe_divide`].
pub fn safe_percent(value: f64, total: f64) -> f64 {
    if total == 0.0 || value.is_nan() || total.is_nan() {
        return 0.0;
    }
    (value / total) * 100.0
}

/// Strict coercion used for single-cell references.
///
/// The whole trimmed string must be a finite number. Empty text counts as
/// zero; anything else that fails to parse is `None`.
pub fn parse_strict(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// Lenient coercion used by range aggregation and user-entered amounts:
/// reads the longest numeric prefix, so `"12.5 EUR"` is `12.5`.
pub fn parse_leading(text: &str) -> Option<f64> {
    let m = LEADING_NUMBER.find(text)?;
    m.as_str().trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Display form of a computed number: shortest round-trip digits, no
/// trailing `.0`, and `-0` folded to `0`. Magnitudes of `1e21` and above or
/// below `1e-6` use exponent form with a signed exponent (`1e+21`, `1e-7`).
/// Non-finite values have no display form.
pub fn format_number(n: f64) -> Option<String> {
    if !n.is_finite() {
        return None;
    }
    if n == 0.0 {
        return Some("0".to_string());
    }
    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return Some(format!("{}", n));
    }
    let text = format!("{:e}", n);
    Some(match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => text,
    })
}
