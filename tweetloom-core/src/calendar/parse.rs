//! Turning a calendar-generation response into a [`CalendarMonth`].
//!
//! On top of the generic extractor this call site:
//! - rewrites typographic quotes used as JSON delimiters to ASCII quotes,
//! - repairs a response cut off mid-entry by truncating to the last complete
//!   day and re-closing the outer object (logged, and flagged as `repaired`),
//! - drops entries whose key is not a date inside the requested month.

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::{date_key, parse_date, CalendarMonth, DailyPlan, MonthKey};
use crate::error::{Error, Result};
use crate::extract::{self, excerpt_head, excerpt_tail, structural_chars};

/// Characters of the response echoed in parse diagnostics, per end.
const EXCERPT_CHARS: usize = 500;

/// Result of parsing one generation response.
#[derive(Debug, Clone)]
pub struct ParsedCalendar {
    pub month: CalendarMonth,
    /// A truncated tail was cut off before parsing
    pub repaired: bool,
    /// Keys that were discarded (not a date in the month, or not an object)
    pub dropped: Vec<String>,
}

/// Parse `raw` into a month document for `persona_name`.
///
/// Accepts a bare `{date: plan}` map or one wrapped as `{"calendar": {...}}`.
/// `content_ratio` is always recomputed from the parsed days.
pub fn parse_generation_response(
    raw: &str,
    persona_name: &str,
    month: MonthKey,
) -> Result<ParsedCalendar> {
    let text = normalize_quotes(&extract::normalize(raw));

    let (document, repaired) = match extract::extract(&text, &[]) {
        Ok(doc) => (doc, false),
        Err(err @ Error::MalformedJson { .. }) => match repair_truncated(&text) {
            Some(fixed) => {
                tracing::warn!(
                    persona = persona_name,
                    month = %month,
                    original_len = text.len(),
                    repaired_len = fixed.len(),
                    "Calendar response looks truncated, dropping incomplete tail"
                );
                let doc = extract::extract(&fixed, &[]).map_err(|_| annotate(err, &text))?;
                (doc, true)
            }
            None => return Err(annotate(err, &text)),
        },
        Err(err) => return Err(err),
    };

    let entries = match document {
        Value::Object(mut map) => match map.remove("calendar") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                map.insert("calendar".to_string(), other);
                map
            }
            None => map,
        },
        // The extractor only returns objects.
        _ => serde_json::Map::new(),
    };

    let mut days = BTreeMap::new();
    let mut dropped = Vec::new();
    for (key, value) in entries {
        let Some(date) = parse_date(&key) else {
            dropped.push(key);
            continue;
        };
        if !month.contains(date) {
            tracing::warn!(
                persona = persona_name,
                month = %month,
                date = %key,
                "Dropping day outside requested month"
            );
            dropped.push(key);
            continue;
        }
        match serde_json::from_value::<DailyPlan>(value) {
            Ok(plan) => {
                days.insert(date_key(date), plan);
            }
            Err(e) => {
                tracing::warn!(
                    persona = persona_name,
                    date = %key,
                    error = %e,
                    "Dropping unreadable day entry"
                );
                dropped.push(key);
            }
        }
    }

    if days.is_empty() {
        return Err(Error::Calendar(format!(
            "response for {persona_name} {month} contained no usable days"
        )));
    }

    Ok(ParsedCalendar {
        month: CalendarMonth::new(persona_name, month, days),
        repaired,
        dropped,
    })
}

/// Replace typographic quotes that stand in for JSON string delimiters.
///
/// Curly double quotes inside an ASCII-quoted string are content and stay;
/// curly single quotes always become `'`.
pub fn normalize_quotes(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Outside,
        Ascii,
        Curly,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Outside;
    let mut escaped = false;

    for c in text.chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        };
        match state {
            State::Outside => match c {
                '"' => {
                    state = State::Ascii;
                    out.push('"');
                }
                '\u{201c}' | '\u{201d}' => {
                    state = State::Curly;
                    out.push('"');
                }
                _ => out.push(c),
            },
            State::Ascii | State::Curly if escaped => {
                escaped = false;
                out.push(c);
            }
            State::Ascii => {
                match c {
                    '\\' => escaped = true,
                    '"' => state = State::Outside,
                    _ => {}
                }
                out.push(c);
            }
            State::Curly => match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '\u{201c}' | '\u{201d}' => {
                    state = State::Outside;
                    out.push('"');
                }
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            },
        }
    }
    out
}

/// Cut an unbalanced document back to its last complete day entry and re-close it.
///
/// Day entries sit directly under the outer object, or under `"calendar"` when
/// the response is wrapped. Returns `None` when the brackets already balance
/// (the failure is not a truncation) or when no day entry closed before the cut.
pub fn repair_truncated(text: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    // (index of a closing brace, brackets still open after it)
    let mut closes: Vec<(usize, Vec<char>)> = Vec::new();
    let mut outer_start = None;

    for (i, c) in structural_chars(text) {
        match c {
            '{' | '[' => {
                if stack.is_empty() && outer_start.is_none() {
                    outer_start = Some(i);
                }
                stack.push(c);
            }
            '}' | ']' => {
                stack.pop();
                if c == '}' && !stack.is_empty() {
                    closes.push((i, stack.clone()));
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        return None;
    }

    let outer = outer_start?;
    let wrapped = text[outer + 1..].trim_start().starts_with("\"calendar\"");
    let depth = if wrapped { 2 } else { 1 };

    let (end, open) = closes
        .iter()
        .rev()
        .find(|(_, open)| open.len() == depth && open.iter().all(|c| *c == '{'))?;

    let mut repaired = text[..=*end].to_string();
    for _ in open {
        repaired.push('}');
    }
    Some(repaired)
}

fn annotate(err: Error, text: &str) -> Error {
    match err {
        Error::MalformedJson {
            line,
            column,
            offset,
            message,
            context,
        } => Error::MalformedJson {
            line,
            column,
            offset,
            message: format!(
                "{message}\n  response length: {} chars\n  response head: {:?}\n  response tail: {:?}",
                text.chars().count(),
                excerpt_head(text, EXCERPT_CHARS),
                excerpt_tail(text, EXCERPT_CHARS)
            ),
            context,
        },
        other => other,
    }
}
