//! Robust JSON decoding for LLM output (`spec.md` §4.5 "JSON decoding policy").
//!
//! Three-step cascade grounded in `original_source/backend/app/core/json_utils.py`'s
//! `safe_json_loads`: (1) extract the first `{`/`[` candidate and parse as-is; (2) escape bare
//! control characters found inside string literals and re-parse; (3) a permissive repair pass
//! for truncated/unquoted/trailing-comma output. All failures carry the first 300 characters of
//! the raw text for diagnostics.

use crate::error::PipelineError;

const DIAGNOSTIC_EXCERPT_LEN: usize = 300;

pub fn decode_llm_json(raw: &str) -> Result<serde_json::Value, PipelineError> {
    let candidate = extract_first_candidate(raw).unwrap_or(raw);

    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }

    let escaped = escape_control_chars_in_strings(candidate);
    if let Ok(value) = serde_json::from_str(&escaped) {
        return Ok(value);
    }

    let repaired = repair_truncated_json(&escaped);
    match serde_json::from_str(&repaired) {
        Ok(value) => Ok(value),
        Err(err) => Err(PipelineError::JsonDecode {
            reason: err.to_string(),
            excerpt: excerpt(raw),
        }),
    }
}

fn excerpt(raw: &str) -> String {
    raw.chars().take(DIAGNOSTIC_EXCERPT_LEN).collect()
}

/// Scans for the first `{` or `[` and returns the slice up to its matching close, ignoring
/// brackets that occur inside string literals.
fn extract_first_candidate(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    let start = raw.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Escapes raw control characters (bytes < 0x20, excluding the escape sequences JSON already
/// recognises) that appear inside string literals — models frequently emit literal newlines
/// inside a `"..."` value, which `serde_json` rejects outright.
fn escape_control_chars_in_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string && !escaped {
            if ch == '\\' {
                escaped = true;
                out.push(ch);
                continue;
            }
            if ch == '"' {
                in_string = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => out.push(c),
            }
            continue;
        }

        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }

        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

/// Permissive repair for truncated/malformed JSON: strips trailing commas before a closing
/// bracket, closes an unterminated string, and appends closing brackets for anything left open.
fn repair_truncated_json(input: &str) -> String {
    let mut chars: Vec<char> = input.chars().collect();

    // Strip trailing commas immediately before a closing bracket/brace.
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                chars.remove(i);
                continue;
            }
        }
        i += 1;
    }

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for &ch in &chars {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired: String = chars.into_iter().collect();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clean_object() {
        let value = decode_llm_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn strips_surrounding_prose() {
        let raw = "Sure, here's the JSON:\n{\"a\": [1, 2, 3]}\nLet me know if you need more.";
        let value = decode_llm_json(raw).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn escapes_literal_newline_in_string() {
        let raw = "{\"text\": \"line one\nline two\"}";
        let value = decode_llm_json(raw).unwrap();
        assert_eq!(value["text"], "line one\nline two");
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = r#"{"a": 1, "b": 2,}"#;
        let value = decode_llm_json(raw).unwrap();
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn repairs_truncated_output() {
        let raw = r#"{"a": [1, 2, {"x": "y""#;
        let value = decode_llm_json(raw).unwrap();
        assert_eq!(value["a"][2]["x"], "y");
    }

    #[test]
    fn surfaces_diagnostic_excerpt_on_failure() {
        let raw = "not json at all, just prose with no brackets whatsoever";
        let err = decode_llm_json(raw).unwrap_err();
        match err {
            PipelineError::JsonDecode { excerpt, .. } => assert_eq!(excerpt, raw),
            other => panic!("expected JsonDecode, got {other:?}"),
        }
    }
}
