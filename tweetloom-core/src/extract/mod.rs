//! Recovery of a single JSON object from raw model output.
//!
//! Model completions are not reliable JSON producers. They wrap output in
//! code fences, prepend a byte-order mark, append prose, or emit the same
//! document twice. [`extract`] treats "exactly one JSON object, possibly
//! surrounded by noise" as the expected shape:
//!
//! 1. **Normalize**: drop a leading BOM, unwrap a ```` ``` ```` fence, trim.
//! 2. Try each [`Recovery`] strategy in order until one parses.
//! 3. Reject non-object documents with [`Error::UnsupportedShape`].
//! 4. Check every required [`KeyPath`], failing with [`Error::SchemaViolation`].
//!
//! Truncated or otherwise corrupted content is never guessed at: it fails with
//! [`Error::MalformedJson`] carrying the position of the original parse error.

pub mod key_path;

pub use key_path::KeyPath;

use serde_json::Value;

use crate::error::{Error, Result};

/// Characters of context kept on each side of a parse failure.
const CONTEXT_RADIUS: usize = 60;

/// Zero-width characters that survive `str::trim`.
const INVISIBLE: [char; 5] = ['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}'];

/// Ordered recovery strategies tried after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The normalized text parsed as-is.
    Direct,
    /// Trailing content after the first balanced top-level object was dropped.
    FirstObject,
    /// Invisible characters or escaped whitespace at the edges were stripped.
    EdgeArtifacts,
}

const STRATEGIES: [Recovery; 3] = [
    Recovery::Direct,
    Recovery::FirstObject,
    Recovery::EdgeArtifacts,
];

/// Outcome of a single strategy.
enum Attempt {
    Parsed {
        value: Value,
        discarded: Option<String>,
    },
    NotApplicable,
    Failed(serde_json::Error),
}

impl Recovery {
    fn attempt(self, text: &str) -> Attempt {
        match self {
            Recovery::Direct => parse(text),
            Recovery::FirstObject => {
                if !text.starts_with('{') {
                    return Attempt::NotApplicable;
                }
                match first_object_end(text) {
                    Some(end) if end < text.len() => {
                        let rest = text[end..].trim();
                        match serde_json::from_str(&text[..end]) {
                            Ok(value) => Attempt::Parsed {
                                value,
                                discarded: (!rest.is_empty()).then(|| rest.to_string()),
                            },
                            Err(e) => Attempt::Failed(e),
                        }
                    }
                    _ => Attempt::NotApplicable,
                }
            }
            Recovery::EdgeArtifacts => {
                let stripped = strip_edge_artifacts(text);
                if stripped.len() == text.len() {
                    return Attempt::NotApplicable;
                }
                match parse(stripped) {
                    Attempt::Parsed { value, discarded } => Attempt::Parsed { value, discarded },
                    _ => Recovery::FirstObject.attempt(stripped),
                }
            }
        }
    }
}

fn parse(text: &str) -> Attempt {
    match serde_json::from_str(text) {
        Ok(value) => Attempt::Parsed {
            value,
            discarded: None,
        },
        Err(e) => Attempt::Failed(e),
    }
}

/// A successfully extracted document together with how it was recovered.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The recovered JSON object
    pub document: Value,
    /// Which strategy produced it
    pub recovery: Recovery,
    /// Trailing content that was dropped, if any
    pub discarded: Option<String>,
}

/// Extract exactly one JSON object from `raw` and validate `required` paths.
pub fn extract(raw: &str, required: &[KeyPath]) -> Result<Value> {
    extract_detailed(raw, required).map(|e| e.document)
}

/// Like [`extract`], but also reports which recovery step succeeded.
pub fn extract_detailed(raw: &str, required: &[KeyPath]) -> Result<Extraction> {
    let text = normalize(raw);

    if text.starts_with('[') {
        return Err(Error::UnsupportedShape { found: "array" });
    }

    let mut first_error = None;
    for recovery in STRATEGIES {
        match recovery.attempt(&text) {
            Attempt::Parsed { value, discarded } => {
                if let Some(dropped) = &discarded {
                    tracing::warn!(
                        discarded_len = dropped.len(),
                        discarded_head = %excerpt_head(dropped, 100),
                        "Discarded trailing content after first JSON object"
                    );
                }
                if !value.is_object() {
                    return Err(Error::UnsupportedShape {
                        found: shape_name(&value),
                    });
                }
                validate(&value, required)?;
                return Ok(Extraction {
                    document: value,
                    recovery,
                    discarded,
                });
            }
            Attempt::Failed(e) => {
                first_error.get_or_insert(e);
            }
            Attempt::NotApplicable => {}
        }
    }

    match first_error {
        Some(e) => Err(malformed(&text, &e)),
        // Direct always runs, so a failure is always recorded.
        None => Err(Error::MalformedJson {
            line: 1,
            column: 0,
            offset: 0,
            message: "no recovery strategy applied".to_string(),
            context: excerpt_head(&text, CONTEXT_RADIUS * 2),
        }),
    }
}

/// Check that each path resolves in `document`, naming the first one missing.
pub fn validate(document: &Value, required: &[KeyPath]) -> Result<()> {
    match required.iter().find(|p| p.resolve(document).is_none()) {
        Some(path) => Err(Error::SchemaViolation {
            path: path.to_string(),
        }),
        None => Ok(()),
    }
}

/// Strip a leading BOM, an enclosing code fence, and surrounding whitespace.
pub fn normalize(raw: &str) -> String {
    let text = raw.trim_start_matches('\u{feff}').trim();
    strip_code_fence(text).trim().to_string()
}

fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }

    match text.split_once('\n') {
        Some((_open, rest)) => {
            let rest = rest.trim_end();
            match rest.rsplit_once('\n') {
                Some((body, last)) if last.trim() == "```" => body,
                None if rest.trim() == "```" => "",
                _ => rest.strip_suffix("```").unwrap_or(rest),
            }
        }
        None => {
            // Single line: ```json{...}```
            let inner = text.trim_start_matches('`');
            let inner = inner.strip_suffix("```").unwrap_or(inner);
            inner.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        }
    }
}

fn strip_edge_artifacts(text: &str) -> &str {
    let mut current = text;
    loop {
        let next = current
            .trim_matches(|c: char| c.is_whitespace() || INVISIBLE.contains(&c))
            .trim_start_matches("\\n")
            .trim_start_matches("\\r")
            .trim_start_matches("\\t")
            .trim_end_matches("\\n")
            .trim_end_matches("\\r")
            .trim_end_matches("\\t");
        if next.len() == current.len() {
            return next;
        }
        current = next;
    }
}

/// Iterate over the characters of `text` that lie outside string literals.
pub(crate) fn structural_chars(text: &str) -> impl Iterator<Item = (usize, char)> + '_ {
    let mut in_string = false;
    let mut escaped = false;
    text.char_indices().filter(move |&(_, c)| {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            false
        } else if c == '"' {
            in_string = true;
            false
        } else {
            true
        }
    })
}

/// Byte index just past the brace closing the first top-level object.
fn first_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in structural_chars(text) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn malformed(text: &str, e: &serde_json::Error) -> Error {
    let offset = byte_offset(text, e.line(), e.column());
    Error::MalformedJson {
        line: e.line(),
        column: e.column(),
        offset,
        message: e.to_string(),
        context: context_window(text, offset, CONTEXT_RADIUS),
    }
}

/// Convert serde_json's 1-based line/column into a byte offset in `text`.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    floor_char_boundary(text, line_start + column.saturating_sub(1))
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

pub(crate) fn context_window(text: &str, offset: usize, radius: usize) -> String {
    let start = floor_char_boundary(text, offset.saturating_sub(radius));
    let end = floor_char_boundary(text, offset.saturating_add(radius));
    text[start..end].to_string()
}

pub(crate) fn excerpt_head(text: &str, max: usize) -> String {
    text[..floor_char_boundary(text, max)].to_string()
}

pub(crate) fn excerpt_tail(text: &str, max: usize) -> String {
    let start = text.len().saturating_sub(max);
    let mut start = start.min(text.len());
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn samples() -> Vec<Value> {
        vec![
            json!({}),
            json!({"data": {"name": "Mia", "age": 24}}),
            json!({"text": "brace } inside \"quoted\" {string}", "n": [1, 2, {"x": null}]}),
            json!({"unicode": "东京 ☕", "escaped\\key": "a\\\\b"}),
        ]
    }

    fn fences(body: &str) -> Vec<String> {
        vec![
            body.to_string(),
            format!("```\n{body}\n```"),
            format!("```json\n{body}\n```"),
        ]
    }

    #[test]
    fn round_trips_through_every_fence_style() {
        for doc in samples() {
            for pretty in [false, true] {
                let body = if pretty {
                    serde_json::to_string_pretty(&doc).unwrap()
                } else {
                    serde_json::to_string(&doc).unwrap()
                };
                for wrapped in fences(&body) {
                    assert_eq!(extract(&wrapped, &[]).unwrap(), doc, "input: {wrapped}");
                }
            }
        }
    }

    #[test]
    fn duplicated_document_recovers_first_only() {
        for doc in samples() {
            let body = serde_json::to_string(&doc).unwrap();
            let extraction = extract_detailed(&format!("{body}{body}"), &[]).unwrap();
            assert_eq!(extraction.document, doc);
            assert_eq!(extraction.recovery, Recovery::FirstObject);
            assert_eq!(extraction.discarded.as_deref(), Some(body.as_str()));
        }
    }

    #[test]
    fn trailing_prose_is_discarded() {
        let doc = json!({"data": {"name": "Mia"}});
        let raw = format!(
            "{}\n\nHope this helps! Let me know {{if}} you need more.",
            serde_json::to_string_pretty(&doc).unwrap()
        );
        assert_eq!(extract(&raw, &[]).unwrap(), doc);
    }

    #[test]
    fn bom_and_whitespace_are_stripped() {
        let raw = "\u{feff}  \n {\"spec\": \"test\", \"data\": {\"name\": \"test\"}}  \n";
        let doc = extract(raw, &KeyPath::list(&["data.name"])).unwrap();
        assert_eq!(doc["data"]["name"], "test");
    }

    #[test]
    fn edge_artifacts_fallback() {
        let raw = "\u{200b}{\"a\": 1}\\n";
        let extraction = extract_detailed(raw, &[]).unwrap();
        assert_eq!(extraction.document, json!({"a": 1}));
        assert_eq!(extraction.recovery, Recovery::EdgeArtifacts);
    }

    #[test]
    fn extraction_is_idempotent() {
        let raw = "```json\n{\"data\": {\"name\": \"Mia\"}}\n```\ntrailing words";
        let keys = KeyPath::list(&["data.name"]);
        let first = extract(raw, &keys).unwrap();
        let second = extract(&serde_json::to_string(&first).unwrap(), &keys).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_required_key_names_the_path() {
        let raw = r#"{"data": {"name": "Mia", "description": "x"}}"#;
        let keys = KeyPath::list(&["data.name", "data.personality", "data.system_prompt"]);
        match extract(raw, &keys) {
            Err(Error::SchemaViolation { path }) => assert_eq!(path, "data.personality"),
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn null_values_satisfy_required_keys() {
        let raw = r#"{"data": {"name": null}}"#;
        assert!(extract(raw, &KeyPath::list(&["data.name"])).is_ok());
    }

    #[test]
    fn arrays_are_rejected() {
        for raw in ["[1, 2, 3]", "```json\n[{\"a\": 1}]\n```", "[{\"a\": 1"] {
            assert!(matches!(
                extract(raw, &[]),
                Err(Error::UnsupportedShape { found: "array" })
            ));
        }
    }

    #[test]
    fn scalars_are_rejected() {
        assert!(matches!(
            extract("\"just a string\"", &[]),
            Err(Error::UnsupportedShape { found: "string" })
        ));
        assert!(matches!(
            extract("42", &[]),
            Err(Error::UnsupportedShape { found: "number" })
        ));
    }

    #[test]
    fn truncated_object_fails_with_position() {
        let raw = "{\n  \"data\": {\n    \"name\": \"Mia\",\n    \"age\": ";
        match extract(raw, &[]) {
            Err(Error::MalformedJson {
                line,
                offset,
                context,
                ..
            }) => {
                assert_eq!(line, 4);
                assert!(offset <= raw.len());
                assert!(context.contains("\"age\""));
            }
            other => panic!("expected malformed JSON, got {other:?}"),
        }
    }

    #[test]
    fn missing_open_brace_fails() {
        let raw = r#""spec": "test", "data": {"name": "test"}}"#;
        assert!(matches!(
            extract(raw, &[]),
            Err(Error::MalformedJson { .. }) | Err(Error::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(matches!(extract("", &[]), Err(Error::MalformedJson { .. })));
        assert!(matches!(
            extract("```json\n```", &[]),
            Err(Error::MalformedJson { .. })
        ));
    }

    #[test]
    fn normalize_handles_single_line_fence() {
        assert_eq!(normalize("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(normalize("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn context_window_respects_char_boundaries() {
        let text = "日本語のテキスト";
        let window = context_window(text, 4, 2);
        assert!(text.contains(&window));
    }
}
