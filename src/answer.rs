//! Fills the `{answer}` placeholder of a generated answer from query rows.
//!
//! This is a best-effort heuristic. It can misreport when the first
//! numeric-looking field is not the relevant one (an `id` column, say).

use serde_json::Value;

pub const PLACEHOLDER: &str = "{answer}";

pub fn has_placeholder(template: &str) -> bool {
    template.contains(PLACEHOLDER)
}

/// Substitute the first placeholder in `template` with a value picked
/// from `rows`:
///
/// 1. no rows: `no`
/// 2. a single row with a single field: that field
/// 3. the first numeric-looking field of the first row
/// 4. the row count
///
/// Rows that are not JSON objects yield `some`.
pub fn render(rows: &[Value], template: &str) -> String {
    let value = pick_value(rows).unwrap_or_else(|| "some".to_string());
    template.replacen(PLACEHOLDER, &value, 1)
}

fn pick_value(rows: &[Value]) -> Option<String> {
    let Some(first) = rows.first() else {
        return Some("no".to_string());
    };
    let first = first.as_object()?;

    if rows.len() == 1 && first.len() == 1 {
        return first.values().next().map(display_value);
    }

    // Column order decides ties.
    if let Some(numeric) = first.values().find(|v| is_numeric_like(v)) {
        return Some(display_value(numeric));
    }

    Some(rows.len().to_string())
}

/// JSON numbers, and strings holding a finite decimal number (`"42"`,
/// `" 3.5 "`, `"1e3"`). Null, booleans and blank strings do not count.
/// Neither do `"Infinity"` or hex literals such as `"0x1F"`, which a
/// JavaScript `Number()` coercion would accept.
pub fn is_numeric_like(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty() && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
        }
        _ => false,
    }
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}
