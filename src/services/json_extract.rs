use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::services::json_repair::parse_with_repair;

const WRAPPER_KEYS: &[&str] = &["cards", "data", "items", "results", "questions"];
const MAX_ARRAY_STARTS: usize = 8;

static GREEDY_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*\{[\s\S]*\}\s*\]").expect("array pattern is valid"));

static FIRST_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*"[\s\S]*?"\s*\}"#).expect("object pattern is valid"));

/// Byte range of the balanced array opening at the first `[` at or after
/// `from`. Brackets inside string values do not count.
fn balanced_array_range(text: &str, from: usize) -> Option<(usize, usize)> {
    let start = from + text.get(from..)?.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

pub fn find_balanced_array(text: &str) -> Option<&str> {
    balanced_array_range(text, 0).map(|(s, e)| &text[s..e])
}

fn holds_objects(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(Value::is_object),
        Value::Object(_) => true,
        _ => false,
    }
}

/// Finds and parses the JSON payload in free-form model output.
///
/// Candidates, in order: balanced arrays by bracket scan, a greedy array
/// pattern, the first object pattern, then the whole text. A candidate that
/// parses but holds no objects is kept only as a last resort.
pub fn extract_json(text: &str) -> Result<Value> {
    let mut last_error: Option<Error> = None;
    let mut fallback: Option<Value> = None;

    let mut from = 0;
    for _ in 0..MAX_ARRAY_STARTS {
        let Some((start, end)) = balanced_array_range(text, from) else {
            break;
        };
        match parse_with_repair(&text[start..end]) {
            Ok(value) if holds_objects(&value) => {
                tracing::debug!(method = "bracket_scan", "json extracted");
                return Ok(value);
            }
            Ok(value) => {
                fallback.get_or_insert(value);
            }
            Err(e) => last_error = Some(e),
        }
        from = start + 1;
    }

    let patterned = [
        ("greedy_array", GREEDY_ARRAY.find(text).map(|m| m.as_str())),
        ("first_object", FIRST_OBJECT.find(text).map(|m| m.as_str())),
        ("whole_text", Some(text)),
    ];
    for (method, candidate) in patterned {
        let Some(candidate) = candidate else {
            continue;
        };
        match parse_with_repair(candidate) {
            Ok(value) if holds_objects(&value) => {
                tracing::debug!(method, "json extracted");
                return Ok(value);
            }
            Ok(value) => {
                fallback.get_or_insert(value);
            }
            Err(e) => last_error = Some(e),
        }
    }

    if let Some(value) = fallback {
        return Ok(value);
    }

    tracing::error!(
        length = text.len(),
        preview = %text.chars().take(200).collect::<String>(),
        "no json found in model output"
    );
    Err(last_error.unwrap_or_else(|| Error::Parse {
        message: "no JSON found in response".to_string(),
        snippet: text.chars().take(100).collect(),
    }))
}

/// The item list inside a parsed payload.
pub fn unwrap_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if matches!(map.get(*key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(*key) {
                        return items;
                    }
                }
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}
