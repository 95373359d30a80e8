//! Best-effort parsing of truncated JSON.
//!
//! Tool arguments arrive as fragments of a JSON document.  For display we
//! want *some* structured view after every fragment, so the accumulated text
//! is parsed strictly first, then structurally completed (open strings and
//! containers closed, dangling separators dropped) and parsed again.  When
//! both fail the caller gets `{"raw": <text>}`.
//!
//! This is a stateless text transformation: it is re-run on the whole
//! accumulated string for every delta, so the returned shape may change from
//! one call to the next.

use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseQuality {
    /// The text was valid JSON as-is.
    Complete,
    /// The text parsed after structural repair.
    Repaired,
    /// Nothing parsed; the value is the `{"raw": ...}` placeholder.
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialJson {
    pub value: Value,
    pub quality: ParseQuality,
}

impl PartialJson {
    pub fn is_complete(&self) -> bool {
        self.quality == ParseQuality::Complete
    }
}

/// Parse `text`, repairing it if needed.  Never fails.
pub fn parse_partial(text: &str) -> PartialJson {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialJson {
            value,
            quality: ParseQuality::Complete,
        };
    }

    if let Some(repaired) = repair(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return PartialJson {
                value,
                quality: ParseQuality::Repaired,
            };
        }
    }

    PartialJson {
        value: json!({ "raw": text }),
        quality: ParseQuality::Raw,
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// `awaiting_colon` is set once a key string closed and its `:` has not
    /// been seen yet.
    Object { awaiting_colon: bool },
    Array,
}

/// Structurally complete a JSON prefix.
///
/// Returns `None` when there is nothing to complete.  The result is not
/// guaranteed to parse: text that is wrong rather than merely truncated stays
/// wrong.
pub fn repair(text: &str) -> Option<String> {
    let source = text.trim();
    let mut out = String::with_capacity(source.len() + 8);
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;
    let mut expect_key = false;

    for ch in source.chars() {
        out.push(ch);
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
                if string_is_key {
                    mark_key_closed(&mut stack);
                    expect_key = false;
                }
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                string_is_key = expect_key;
            }
            '{' => {
                stack.push(Frame::Object {
                    awaiting_colon: false,
                });
                expect_key = true;
            }
            '[' => {
                stack.push(Frame::Array);
                expect_key = false;
            }
            '}' | ']' => {
                stack.pop();
                expect_key = false;
            }
            ':' => {
                if let Some(Frame::Object { awaiting_colon }) = stack.last_mut() {
                    *awaiting_colon = false;
                }
                expect_key = false;
            }
            ',' => {
                expect_key = matches!(stack.last(), Some(Frame::Object { .. }));
            }
            _ => {}
        }
    }

    if in_string {
        if escaped {
            out.pop();
        } else {
            trim_partial_unicode_escape(&mut out);
        }
        out.push('"');
        if string_is_key {
            mark_key_closed(&mut stack);
        }
    }

    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        break;
    }

    if matches!(
        stack.last(),
        Some(Frame::Object {
            awaiting_colon: true
        })
    ) {
        out.push_str(":null");
    } else if out.ends_with(':') {
        out.push_str("null");
    } else {
        complete_literal(&mut out);
    }

    for frame in stack.iter().rev() {
        out.push(match frame {
            Frame::Object { .. } => '}',
            Frame::Array => ']',
        });
    }

    if out == source { None } else { Some(out) }
}

fn mark_key_closed(stack: &mut [Frame]) {
    if let Some(Frame::Object { awaiting_colon }) = stack.last_mut() {
        *awaiting_colon = true;
    }
}

/// Drop an incomplete `\uXXXX` escape at the end of an open string.
fn trim_partial_unicode_escape(out: &mut String) {
    let Some(pos) = out.rfind("\\u") else {
        return;
    };
    let digits = &out[pos + 2..];
    if digits.len() >= 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return;
    }
    // An even run of backslashes before `u` means the backslash itself was
    // escaped and this is literal text.
    let preceding = out[..pos].chars().rev().take_while(|c| *c == '\\').count();
    if preceding % 2 == 0 {
        out.truncate(pos);
    }
}

/// Finish a truncated `true`/`false`/`null` or number at the end of `out`.
fn complete_literal(out: &mut String) {
    let word_len = out
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .count();
    if word_len > 0 {
        let word = out[out.len() - word_len..].to_string();
        for literal in ["true", "false", "null"] {
            if literal.len() > word.len() && literal.starts_with(&word) {
                out.push_str(&literal[word.len()..]);
                return;
            }
        }
    }

    let mut tail = out.chars().rev();
    match (tail.next(), tail.next()) {
        (Some('-' | '+' | '.'), _) => out.push('0'),
        (Some('e' | 'E'), Some(prev)) if prev.is_ascii_digit() || prev == '.' => out.push('0'),
        _ => {}
    }
}
