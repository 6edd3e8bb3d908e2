//! Recovery of JSON that a language model almost got right.
//!
//! Each [`Strategy`] rewrites the text and attempts a parse. They run in
//! order and the first success wins, so text that is already valid JSON is
//! never rewritten.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::{Error, Result};

const SNIPPET_RADIUS: usize = 50;

/// Commands whose first letter would otherwise read as a JSON escape
/// (`\b`, `\f`, `\n`, `\r`, `\t`).
const LATEX_COMMANDS: &[&str] = &[
    "bar", "beta", "bf", "bigcap", "bigcup", "binom", "bmod", "boldsymbol", "bot", "boxed",
    "forall", "frac", "flat", "frown", "nabla", "ne", "neg", "neq", "ni", "nmid", "not", "notin",
    "nu", "rangle", "rceil", "rfloor", "rho", "right", "rightarrow", "rm", "tan", "tanh", "tau",
    "text", "textbf", "textit", "theta", "tilde", "times", "to", "top", "triangle",
];

pub struct Strategy {
    pub name: &'static str,
    pub run: fn(&str) -> std::result::Result<Value, serde_json::Error>,
}

pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "direct",
        run: direct,
    },
    Strategy {
        name: "preprocess",
        run: preprocessed,
    },
    Strategy {
        name: "stream_repair",
        run: stream_repaired,
    },
    Strategy {
        name: "literal_regex",
        run: literal_repaired,
    },
];

fn direct(text: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

fn preprocessed(text: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(&preprocess(text))
}

fn stream_repaired(text: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(&strip_trailing_commas(&stream_repair(&preprocess(text))))
}

fn literal_repaired(text: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(&strip_trailing_commas(&repair_literals(&preprocess(text))))
}

/// Tries every strategy in order. On total failure the error carries the
/// last parser message and the text around where the input first broke.
pub fn parse_with_repair(text: &str) -> Result<Value> {
    let mut first_error: Option<serde_json::Error> = None;
    let mut last_error: Option<serde_json::Error> = None;

    for strategy in STRATEGIES {
        match (strategy.run)(text) {
            Ok(value) => {
                if strategy.name != "direct" {
                    tracing::debug!(strategy = strategy.name, "json recovered");
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::trace!(strategy = strategy.name, error = %e, "json strategy failed");
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    last_error = Some(e);
                }
            }
        }
    }

    let snippet = first_error
        .as_ref()
        .map(|e| snippet_around(text, e.line(), e.column()))
        .unwrap_or_default();
    let message = last_error
        .or(first_error)
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no strategy applied".to_string());

    tracing::warn!(error = %message, snippet = %snippet, "json repair exhausted");
    Err(Error::Parse { message, snippet })
}

/// BOM, code fences, surrounding prose and trailing commas.
pub fn preprocess(text: &str) -> String {
    let mut s = text.trim_start_matches('\u{feff}').trim();

    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }

    if let Some(start) = s.find(|c| c == '[' || c == '{') {
        let closer = if s[start..].starts_with('[') { ']' } else { '}' };
        match s.rfind(closer) {
            Some(end) if end > start => s = &s[start..=end],
            _ => s = &s[start..],
        }
    }

    strip_trailing_commas(s)
}

/// Removes commas directly before `}` or `]`, leaving string contents alone.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Whether the backslash at `chars[at]` starts a JSON escape we should keep.
fn is_kept_escape(chars: &[char], at: usize) -> bool {
    match chars.get(at + 1) {
        Some('"') | Some('\\') | Some('/') => true,
        Some('u') => {
            chars.len() >= at + 6 && chars[at + 2..at + 6].iter().all(|c| c.is_ascii_hexdigit())
        }
        Some('b') | Some('f') | Some('n') | Some('r') | Some('t') => {
            let word: String = chars[at + 1..]
                .iter()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect();
            !LATEX_COMMANDS.contains(&word.as_str())
        }
        _ => false,
    }
}

fn push_control(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{8}' => out.push_str("\\b"),
        '\u{c}' => out.push_str("\\f"),
        other => out.push_str(&format!("\\u{:04x}", other as u32)),
    }
}

/// Character-stream repair of string contents.
///
/// Inside strings: control characters are escaped, backslashes that do not
/// form a JSON escape are doubled, and a newline followed by a key, `}` or
/// `]` closes a string the model forgot to close. A string still open at the
/// end of input is closed.
pub fn stream_repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut containers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut is_key = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if !in_string {
            match c {
                '"' => {
                    let prev = out.trim_end().chars().last();
                    is_key = match prev {
                        Some('{') => true,
                        Some(',') => containers.last() == Some(&'{'),
                        _ => false,
                    };
                    in_string = true;
                }
                '{' | '[' => containers.push(c),
                '}' | ']' => {
                    containers.pop();
                }
                _ => {}
            }
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                if is_kept_escape(&chars, i) {
                    out.push('\\');
                    out.push(chars[i + 1]);
                    i += 2;
                } else {
                    out.push_str("\\\\");
                    i += 1;
                }
                continue;
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' | '\r' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                match next {
                    Some('"') => {
                        out.push('"');
                        if !is_key {
                            out.push(',');
                        }
                        in_string = false;
                        out.push(c);
                    }
                    Some('}') | Some(']') => {
                        out.push('"');
                        in_string = false;
                        out.push(c);
                    }
                    _ => push_control(&mut out, c),
                }
            }
            c if (c as u32) < 0x20 => push_control(&mut out, c),
            _ => out.push(c),
        }
        i += 1;
    }

    if in_string {
        out.push('"');
    }
    out
}

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"(?:[^"\\]|\\.)*""#).expect("string literal pattern is valid"));

/// Rewrites each string literal found by pattern, independent of the
/// surrounding structure.
pub fn repair_literals(text: &str) -> String {
    STRING_LITERAL
        .replace_all(text, |caps: &Captures| {
            let literal = &caps[0];
            let body: Vec<char> = literal[1..literal.len() - 1].chars().collect();
            let mut out = String::with_capacity(literal.len() + 8);
            out.push('"');
            let mut i = 0;
            while i < body.len() {
                let c = body[i];
                if c == '\\' {
                    if is_kept_escape(&body, i) {
                        out.push('\\');
                        out.push(body[i + 1]);
                        i += 2;
                        continue;
                    }
                    out.push_str("\\\\");
                } else if (c as u32) < 0x20 {
                    push_control(&mut out, c);
                } else {
                    out.push(c);
                }
                i += 1;
            }
            out.push('"');
            out
        })
        .into_owned()
}

/// Up to 50 characters either side of a serde line/column position.
pub fn snippet_around(text: &str, line: usize, column: usize) -> String {
    let mut offset = 0usize;
    for (n, l) in text.split_inclusive('\n').enumerate() {
        if n + 1 == line {
            offset += column.saturating_sub(1).min(l.len());
            break;
        }
        offset += l.len();
    }
    let offset = offset.min(text.len());
    let char_pos = text
        .char_indices()
        .take_while(|(b, _)| *b < offset)
        .count();
    text.chars()
        .skip(char_pos.saturating_sub(SNIPPET_RADIUS))
        .take(SNIPPET_RADIUS * 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::strategy::Strategy;
    use serde_json::json;

    fn tricky_string() -> impl Strategy<Value = String> {
        let ch = prop_oneof![
            Just('\\'),
            Just('"'),
            Just('['),
            Just(']'),
            Just(','),
            Just('\n'),
            Just('\u{1}'),
            any::<char>(),
        ];
        proptest::collection::vec(ch, 0..12).prop_map(|chars| chars.into_iter().collect())
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            tricky_string().prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::vec((tricky_string(), inner), 0..6)
                    .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn serialized_values_come_back_unchanged(value in json_value()) {
            let compact = serde_json::to_string(&value).unwrap();
            prop_assert_eq!(parse_with_repair(&compact).unwrap(), value.clone());
            let pretty = serde_json::to_string_pretty(&value).unwrap();
            prop_assert_eq!(parse_with_repair(&pretty).unwrap(), value);
        }
    }

    #[test]
    fn valid_json_is_returned_unchanged() {
        let value = json!([
            {"question": "求 $\\frac{1}{2}$", "options": ["A. 1", "B. 2"], "n": 3.5, "ok": true},
            {"nested": {"list": [1, 2, [3]]}, "empty": ""}
        ]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(parse_with_repair(&text).unwrap(), value);
        let pretty = serde_json::to_string_pretty(&value).unwrap();
        assert_eq!(parse_with_repair(&pretty).unwrap(), value);
    }

    #[test]
    fn fences_prose_and_trailing_commas_are_stripped() {
        let text = "\u{feff}```json\n[{\"a\": 1, \"b\": [1, 2,],},]\n```";
        assert_eq!(parse_with_repair(text).unwrap(), json!([{"a": 1, "b": [1, 2]}]));

        let text = "下面是题目：\n[{\"a\": \"x\"}]\n希望有帮助";
        assert_eq!(parse_with_repair(text).unwrap(), json!([{"a": "x"}]));
    }

    #[test]
    fn trailing_comma_inside_string_is_kept() {
        assert_eq!(strip_trailing_commas(r#"{"a": "x,}"}"#), r#"{"a": "x,}"}"#);
    }

    #[test]
    fn latex_backslashes_are_escaped() {
        let text = r#"[{"question": "计算 \sum_{i=1}^n i 与 \frac{a}{b} 以及 \theta \times \nabla"}]"#;
        let value = parse_with_repair(text).unwrap();
        assert_eq!(
            value[0]["question"],
            "计算 \\sum_{i=1}^n i 与 \\frac{a}{b} 以及 \\theta \\times \\nabla"
        );
    }

    #[test]
    fn real_escapes_survive_stream_repair() {
        let repaired = stream_repair(r#"{"a": "line\nnext \"q\" é \alpha"}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "line\nnext \"q\" é \\alpha");
    }

    #[test]
    fn raw_control_characters_are_escaped() {
        let text = "[{\"a\": \"first\tline\nsecond line\"}]";
        let value = parse_with_repair(text).unwrap();
        assert_eq!(value[0]["a"], "first\tline\nsecond line");
    }

    #[test]
    fn unclosed_value_is_closed_before_next_key() {
        let text = "[{\"question\": \"什么是导数\n  \"answer\": \"A\"}]";
        let value = parse_with_repair(text).unwrap();
        assert_eq!(value[0]["question"], "什么是导数");
        assert_eq!(value[0]["answer"], "A");
    }

    #[test]
    fn unclosed_value_is_closed_before_brace() {
        let text = "[{\"a\": \"x\", \"b\": \"unfinished\n}]";
        let value = parse_with_repair(text).unwrap();
        assert_eq!(value[0]["b"], "unfinished");
    }

    #[test]
    fn literal_rewrite_escapes_bad_sequences() {
        let repaired = repair_literals("{\"a\": \"x\\qy\tz\"}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "x\\qy\tz");
    }

    #[test]
    fn hopeless_input_is_a_parse_error_with_snippet() {
        let text = format!("{}{{ this is not json at all", "x".repeat(120));
        match parse_with_repair(&text) {
            Err(Error::Parse { snippet, .. }) => {
                assert!(!snippet.is_empty());
                assert!(snippet.chars().count() <= SNIPPET_RADIUS * 2);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(parse_with_repair("   "), Err(Error::Parse { .. })));
    }
}
