//! Post-processing: turn raw VLM text into JSON rows.
//!
//! Models asked for "JSON only" still occasionally
//!
//! - wrap the answer in ` ```json ... ``` ` fences,
//! - prefix it with a sentence ("Here is the extracted data:"),
//! - emit a BOM or zero-width characters,
//! - return a wrapper object (`{"rows": [...]}`) instead of a bare array.
//!
//! These rules repair those quirks deterministically. Anything that is still
//! not JSON afterwards is reported as an error and the page is skipped.
//!
//! ## Rule Order
//!
//! Invisible characters go first so the fence regex sees clean input; the
//! prose trim runs last because a fenced answer has no prose to trim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Field name used when the model returns a bare scalar instead of an object.
pub const SCALAR_FIELD: &str = "value";

/// Parse a model answer into row field maps.
///
/// Returns:
/// - `Ok(None)` for an empty answer (the caller may ask again),
/// - `Ok(Some(rows))` for any JSON answer; `[]` and `null` give zero rows,
/// - `Err(detail)` when the text is not JSON.
pub fn parse_rows(raw: &str) -> Result<Option<Vec<Map<String, Value>>>, String> {
    let s = remove_invisible_chars(raw);
    let s = strip_json_fences(&s);
    let s = trim_surrounding_prose(s.trim());

    if s.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))?;
    Ok(Some(rows_from_value(value)))
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────────

const INVISIBLE: [char; 5] = ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'];

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\n?\s*```\s*$").unwrap());

fn strip_json_fences(input: &str) -> String {
    match RE_JSON_FENCES.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Trim prose around the JSON body ──────────────────────────────────

/// Keep the span from the first `[`/`{` to the last `]`/`}`.
///
/// Text that already starts with a JSON opener is returned unchanged so
/// malformed JSON is reported as such rather than silently truncated.
fn trim_surrounding_prose(input: &str) -> &str {
    if input.starts_with('[') || input.starts_with('{') {
        return input;
    }
    let start = input.find(['[', '{']);
    let end = input.rfind([']', '}']);
    match (start, end) {
        (Some(s), Some(e)) if s < e => &input[s..=e],
        _ => input,
    }
}

// ── Shape normalisation ──────────────────────────────────────────────────────

fn rows_from_value(value: Value) -> Vec<Map<String, Value>> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().filter_map(row_from_item).collect(),
        Value::Object(obj) => match single_array_entry(&obj) {
            Some(_) => {
                // `{"rows": [...]}` and friends: unwrap the records.
                let inner = obj.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
                rows_from_value(inner)
            }
            None => vec![obj],
        },
        scalar => vec![scalar_row(scalar)],
    }
}

fn row_from_item(item: Value) -> Option<Map<String, Value>> {
    match item {
        Value::Null => None,
        Value::Object(obj) => Some(obj),
        other => Some(scalar_row(other)),
    }
}

fn single_array_entry(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    if obj.len() != 1 {
        return None;
    }
    match obj.values().next() {
        Some(Value::Array(items)) if items.iter().all(|v| v.is_object()) => Some(items),
        _ => None,
    }
}

fn scalar_row(value: Value) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert(SCALAR_FIELD.to_string(), value);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(s: &str) -> Vec<Value> {
        parse_rows(s)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    #[test]
    fn plain_array() {
        let rows = parse(r#"[{"a": 1}, {"a": 2}]"#);
        assert_eq!(rows, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn fenced_json() {
        let rows = parse("```json\n[{\"item\": \"bolt\", \"qty\": 4}]\n```");
        assert_eq!(rows, vec![json!({"item": "bolt", "qty": 4})]);
    }

    #[test]
    fn fenced_without_language() {
        let rows = parse("```\n{\"x\": true}\n```\n");
        assert_eq!(rows, vec![json!({"x": true})]);
    }

    #[test]
    fn prose_prefix_is_trimmed() {
        let rows = parse("Here is the data:\n[{\"k\": \"v\"}]\nLet me know!");
        assert_eq!(rows, vec![json!({"k": "v"})]);
    }

    #[test]
    fn single_object_is_one_row() {
        let rows = parse(r#"{"invoice": "A-1", "total": 10.5}"#);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["invoice"], "A-1");
    }

    #[test]
    fn wrapper_object_is_unwrapped() {
        let rows = parse(r#"{"rows": [{"a": 1}, {"a": 2}]}"#);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn scalars_are_wrapped() {
        let rows = parse(r#"["x", 3, null]"#);
        assert_eq!(rows, vec![json!({"value": "x"}), json!({"value": 3})]);
    }

    #[test]
    fn empty_array_is_zero_rows() {
        assert_eq!(parse_rows("[]").unwrap(), Some(vec![]));
        assert_eq!(parse_rows("null").unwrap(), Some(vec![]));
    }

    #[test]
    fn blank_answer_is_none() {
        assert_eq!(parse_rows("   \n").unwrap(), None);
        assert_eq!(parse_rows("```json\n```").unwrap(), None);
        assert_eq!(parse_rows("\u{FEFF}").unwrap(), None);
    }

    #[test]
    fn invalid_json_is_error() {
        let err = parse_rows(r#"[{"a": 1"#).unwrap_err();
        assert!(err.starts_with("invalid JSON"), "got: {err}");
    }

    #[test]
    fn field_order_is_preserved() {
        let rows = parse_rows(r#"[{"zeta": 1, "alpha": 2, "mid": 3}]"#)
            .unwrap()
            .unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }
}
