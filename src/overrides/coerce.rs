//! Raw override value coercion.
//!
//! Priority: integer, float, boolean, null, string. Booleans match only the
//! exact words `true`/`false` in any case, so `"False"` never turns truthy.

use serde_json::{Number, Value};

/// Convert a raw override value into the most specific typed value.
pub fn coerce(raw: &str) -> Value {
    if let Some(i) = parse_int(raw) {
        return Value::Number(i.into());
    }
    if let Some(n) = parse_float(raw).and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "none" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

/// Base-10 integer with optional sign, surrounding whitespace and `_`
/// separators between digits.
fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix('+')
        .or_else(|| trimmed.strip_prefix('-'))
        .unwrap_or(trimmed);
    if !valid_digit_run(digits) {
        return None;
    }
    trimmed.replace('_', "").parse().ok()
}

/// Finite float. `_` is only accepted between two digits. Values that are
/// not finite (`nan`, `inf`, `1e400`) have no place in the tree and are left
/// to the string case.
fn parse_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if !underscores_between_digits(trimmed) {
        return None;
    }
    let value: f64 = trimmed.replace('_', "").parse().ok()?;
    value.is_finite().then_some(value)
}

fn underscores_between_digits(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_'
            || (i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).is_some_and(|next| next.is_ascii_digit()))
    })
}

fn valid_digit_run(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && !s.contains("__")
        && s.chars().all(|c| c.is_ascii_digit() || c == '_')
}
