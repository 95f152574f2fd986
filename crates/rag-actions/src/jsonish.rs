// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tolerant parsing of JSON-ish text out of a model response: strip
//! Markdown code fences, then normalize the loose dialect models tend to
//! produce (unquoted keys, trailing commas, single-quoted strings,
//! `=` used where `:` belongs) into strict JSON before handing it to
//! `serde_json`.

use serde_json::{Map, Value};

/// Parse `input` as a tolerant JSON value. Returns `None` if, even after
/// normalization, it still isn't valid JSON.
#[must_use]
pub fn parse_value(input: &str) -> Option<Value> {
    let body = strip_code_fences(input);
    let normalized = quote_bare_keys(&strip_trailing_commas(&normalize_quotes_and_equals(&body)));
    serde_json::from_str(&normalized).ok()
}

/// Parse `input` as a tolerant JSON object. Returns `None` if it doesn't
/// parse, or parses to something other than an object.
#[must_use]
pub fn parse_object(input: &str) -> Option<Map<String, Value>> {
    match parse_value(input)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Strip a single surrounding ```` ```lang\n...\n``` ```` fence, if present.
/// Leaves the text untouched when it isn't fenced.
fn strip_code_fences(s: &str) -> String {
    let trimmed = s.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match without_open.find('\n') {
        Some(idx) => {
            let first_line = &without_open[..idx];
            if first_line.chars().all(|c| c.is_alphanumeric()) {
                &without_open[idx + 1..]
            } else {
                without_open
            }
        }
        None => without_open,
    };
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Converts single-quoted strings to double-quoted ones, and `=` outside
/// any string to `:`, tracking string state as it scans.
fn normalize_quotes_and_equals(s: &str) -> String {
    #[derive(PartialEq)]
    enum Mode {
        None,
        Double,
        Single,
    }

    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut mode = Mode::None;

    while i < chars.len() {
        let c = chars[i];
        match mode {
            Mode::Double => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '"' {
                    mode = Mode::None;
                }
            }
            Mode::Single => {
                if c == '\\' && i + 1 < chars.len() {
                    let next = chars[i + 1];
                    if next == '\'' {
                        out.push('\'');
                    } else {
                        out.push('\\');
                        out.push(next);
                    }
                    i += 2;
                    continue;
                }
                if c == '\'' {
                    out.push('"');
                    mode = Mode::None;
                    i += 1;
                    continue;
                }
                if c == '"' {
                    out.push('\\');
                    out.push('"');
                    i += 1;
                    continue;
                }
                out.push(c);
            }
            Mode::None => {
                if c == '"' {
                    out.push(c);
                    mode = Mode::Double;
                } else if c == '\'' {
                    out.push('"');
                    mode = Mode::Single;
                } else if c == '=' && chars.get(i + 1) != Some(&'=') {
                    out.push(':');
                } else {
                    out.push(c);
                }
            }
        }
        i += 1;
    }
    out
}

/// Drops a comma that, skipping whitespace, is immediately followed by a
/// closing `}` or `]`.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            let mut k = i + 1;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            if k < chars.len() && (chars[k] == '}' || chars[k] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Wraps a bare identifier in quotes when it is immediately followed
/// (skipping whitespace) by `:`, i.e. when it's being used as an object key.
fn quote_bare_keys(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 16);
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let ident: String = chars[start..j].iter().collect();
            let mut k = j;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            if k < chars.len() && chars[k] == ':' {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            i = j;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}
