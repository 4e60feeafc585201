//! Parsing of raw specialist-worker text into a JSON payload.

use serde_json::Value;

/// Parse a worker's raw text response.
///
/// Returns the worker's own success flag and the payload. Objects without a
/// `success` field count as successful; text that carries no JSON object is
/// preserved as a string payload and reported as unsuccessful.
pub fn parse_worker_response(raw: &str) -> (bool, Value) {
    let Some(json_str) = extract_json(raw) else {
        return (false, Value::String(raw.trim().to_string()));
    };

    match serde_json::from_str::<Value>(&json_str) {
        Ok(value @ Value::Object(_)) => {
            let success = value
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            (success, value)
        }
        Ok(other) => (false, other),
        Err(_) => (false, Value::String(raw.trim().to_string())),
    }
}

/// Extract JSON from output that may contain markdown or other text.
pub fn extract_json(output: &str) -> Option<String> {
    // Fenced ```json block
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    // Generic fenced block with an object inside
    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find('{')
        {
            let content = after_marker[json_start..end].trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }

    // Raw object: the first brace-matched span that parses as a JSON object.
    // Prose such as `{token}` ahead of the payload is skipped.
    output
        .match_indices('{')
        .filter_map(|(start, _)| balanced_object(&output[start..]))
        .find(|candidate| matches!(serde_json::from_str::<Value>(candidate), Ok(Value::Object(_))))
        .map(str::to_string)
}

/// The span from the leading `{` to its matching `}`, skipping string contents.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
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

    #[test]
    fn test_extract_json_code_block() {
        let output = r#"
Done. Summary:
```json
{"success": true, "testsPass": true}
```
"#;
        let json = extract_json(output).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.contains("testsPass"));
    }

    #[test]
    fn test_extract_json_generic_block() {
        let output = "```\n{\"success\": false}\n```";
        assert_eq!(extract_json(output).unwrap(), "{\"success\": false}");
    }

    #[test]
    fn test_extract_json_raw_with_braces_in_strings() {
        let output = r#"Result: {"description": "handle } in message", "nested": {"a": 1}} trailing"#;
        let json = extract_json(output).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn test_extract_json_skips_braces_in_prose() {
        let output = r#"Fixed {token} handling. {"testsPass": true}"#;
        assert_eq!(extract_json(output).unwrap(), r#"{"testsPass": true}"#);

        let (success, payload) = parse_worker_response(output);
        assert!(success);
        assert_eq!(payload["testsPass"], true);
    }

    #[test]
    fn test_extract_json_prose_braces_only() {
        assert!(extract_json("Renamed {a} to {b}; nothing else").is_none());
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no structured output here").is_none());
    }

    #[test]
    fn test_parse_worker_response_defaults_success() {
        let (success, payload) = parse_worker_response(r#"{"codeChanges": []}"#);
        assert!(success);
        assert!(payload.get("codeChanges").is_some());
    }

    #[test]
    fn test_parse_worker_response_respects_flag() {
        let (success, _) = parse_worker_response(r#"{"success": false, "error": "stuck"}"#);
        assert!(!success);
    }

    #[test]
    fn test_parse_worker_response_plain_text() {
        let (success, payload) = parse_worker_response("  I could not finish the task  ");
        assert!(!success);
        assert_eq!(payload, Value::String("I could not finish the task".to_string()));
    }
}
