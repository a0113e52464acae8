//! Model response parser: pulls a JSON object (or array) out of noisy text.
//!
//! Stages, in order: strip model artifacts, parse the whole string, strip
//! code fences and retry, then scan for balanced spans and parse each one
//! until something succeeds.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Response is empty")]
    Empty,

    #[error("No JSON object found in model response")]
    NoObject,

    #[error("No JSON array found in model response")]
    NoArray,
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static UNUSED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

/// Strip model-specific artifacts from raw output.
///
/// Handles `<think>...</think>` reasoning blocks, Gemma-style
/// `<unusedN>thought\n` prefixes and stray `<unusedN>` tokens.
pub fn sanitize_model_output(raw: &str) -> String {
    let mut text = THINK_BLOCK.replace_all(raw, "").into_owned();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + "thought\n".len()..].to_string();
        }
    }

    UNUSED_TOKEN.replace_all(&text, "").trim().to_string()
}

/// Remove markdown code fences. Takes the first fenced block when there is
/// one, dropping an optional language tag (```json).
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after
            .find('\n')
            .filter(|&nl| after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()))
            .map_or(0, |nl| nl + 1);
        let body = &after[body_start..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim().to_string();
    }
    trimmed.to_string()
}

/// Extract the first JSON object from model output.
pub fn extract_json_object(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let text = sanitize_model_output(raw);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let as_object = |v: Value| match v {
        Value::Object(map) => Some(map),
        _ => None,
    };

    parse_whole(&text, as_object)
        .or_else(|| parse_whole(&strip_code_fences(&text), as_object))
        .or_else(|| first_balanced_span(&text, b'{', b'}', as_object))
        .ok_or(ParseError::NoObject)
}

/// Extract a JSON array from model output.
///
/// Accepts a top-level array, an object wrapping exactly one array, or
/// the first balanced `[...]` span that parses.
pub fn extract_json_array(raw: &str) -> Result<Vec<Value>, ParseError> {
    let text = sanitize_model_output(raw);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    parse_whole(&text, as_array)
        .or_else(|| parse_whole(&strip_code_fences(&text), as_array))
        .or_else(|| first_balanced_span(&text, b'[', b']', as_array))
        .or_else(|| first_balanced_span(&text, b'{', b'}', as_array))
        .ok_or(ParseError::NoArray)
}

fn as_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            let first = arrays.next()?;
            arrays.next().is_none().then_some(first)
        }
        _ => None,
    }
}

fn parse_whole<T>(text: &str, accept: impl Fn(Value) -> Option<T>) -> Option<T> {
    serde_json::from_str::<Value>(text.trim()).ok().and_then(accept)
}

/// Try every balanced `open...close` span, leftmost first, ignoring
/// delimiters inside JSON strings.
fn first_balanced_span<T>(
    text: &str,
    open: u8,
    close: u8,
    accept: impl Fn(Value) -> Option<T>,
) -> Option<T> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = bytes[search_from..].iter().position(|&b| b == open) {
        let start = search_from + offset;
        if let Some(end) = balanced_end(bytes, start, open, close) {
            if let Some(found) = serde_json::from_str::<Value>(&text[start..=end])
                .ok()
                .and_then(&accept)
            {
                return Some(found);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Index of the delimiter closing the one at `start`, if balanced.
fn balanced_end(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BARE: &str = r#"{"understanding_fit": 80, "explanation": "Clear steps."}"#;

    #[test]
    fn direct_parse() {
        let obj = extract_json_object(BARE).unwrap();
        assert_eq!(obj["understanding_fit"], 80);
    }

    #[test]
    fn same_object_from_fences_prose_and_artifacts() {
        let expected = extract_json_object(BARE).unwrap();
        let variants = [
            format!("```json\n{BARE}\n```"),
            format!("```\n{BARE}\n```"),
            format!("Sure! Here is the evaluation:\n{BARE}\nHope this helps."),
            format!("<think>The student {{likes}} math</think>\n{BARE}"),
            format!("<unused94>thought\nreasoning here\n<unused95>{BARE}"),
            format!("Note {{not json}} then {BARE}"),
        ];
        for v in &variants {
            assert_eq!(extract_json_object(v).unwrap(), expected, "variant: {v}");
        }
    }

    #[test]
    fn braces_inside_strings_do_not_break_scan() {
        let raw = r#"prefix {"explanation": "uses {curly} and \"quoted } text\"", "engagement_fit": 5} suffix"#;
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj["engagement_fit"], 5);
    }

    #[test]
    fn nested_object_inside_junk_is_found() {
        let raw = r#"{ oops {"overall_alignment": 70} }"#;
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj["overall_alignment"], 70);
    }

    #[test]
    fn nothing_parsable_is_error() {
        assert_eq!(extract_json_object("no json here"), Err(ParseError::NoObject));
        assert_eq!(extract_json_object("{unterminated"), Err(ParseError::NoObject));
        assert_eq!(extract_json_object("   "), Err(ParseError::Empty));
        assert_eq!(extract_json_object("<think>only thoughts</think>"), Err(ParseError::Empty));
        assert_eq!(extract_json_object("[1, 2]"), Err(ParseError::NoObject));
    }

    #[test]
    fn array_variants() {
        let expected = vec![json!({"id": "a", "alignment_score": 50})];
        let raw = r#"[{"id": "a", "alignment_score": 50}]"#;
        let variants = [
            raw.to_string(),
            format!("```json\n{raw}\n```"),
            format!("Here you go: {raw} done"),
            format!(r#"{{"evaluations": {raw}}}"#),
            format!(r#"Result: {{"evaluations": {raw}, "note": "x"}}"#),
        ];
        for v in &variants {
            assert_eq!(extract_json_array(v).unwrap(), expected, "variant: {v}");
        }
    }

    #[test]
    fn ambiguous_wrapper_falls_back_to_first_array_span() {
        assert_eq!(
            extract_json_array(r#"{"a": [1], "b": [2]}"#).unwrap(),
            vec![json!(1)]
        );
        assert_eq!(extract_json_array(r#"{"a": 1}"#), Err(ParseError::NoArray));
        assert_eq!(extract_json_array("nothing"), Err(ParseError::NoArray));
    }

    #[test]
    fn strip_fences_keeps_unfenced_text() {
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```{\"a\":1}```"), "{\"a\":1}");
    }
}
