//! Coercion of loosely-typed JSON values into defaulted strings
//!
//! Alert payloads arrive as free-form JSON. Every recognized field is
//! turned into text through [`coerce`], so the defaulting contract lives
//! in one place.

use serde_json::Value;

/// Coerce an optional JSON value into a string, using `fallback` when the
/// value carries nothing usable.
///
/// - missing or `null` -> fallback
/// - empty string -> fallback
/// - non-empty string -> as-is
/// - number -> shortest text of its f64 value, in exponent form below
///   `1e-4` and from `1e6` up (`5.0` becomes `"5"`, `1e6` becomes `"1e+06"`)
/// - anything else -> fallback
pub fn coerce(value: Option<&Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => number_text(n),
        _ => fallback.to_string(),
    }
}

/// JSON numbers are read as f64, so integers beyond 2^53 round
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) => shortest_general(f),
        None => n.to_string(),
    }
}

/// Shortest round-trip digits in `%g` layout: plain decimal for exponents
/// -4 through 5, otherwise `d.ddde±XX`
fn shortest_general(f: f64) -> String {
    let scientific = format!("{:e}", f);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return f.to_string();
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..6).contains(&exponent) {
        // Display never uses an exponent and drops a zero fraction
        f.to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}
