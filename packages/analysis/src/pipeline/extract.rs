//! Structured-payload extraction from unreliable generative responses.
//!
//! Generative responses are not a fixed-grammar format: they are
//! natural-language output that usually, but not always, embeds a
//! parseable structure. The extractor therefore runs an ordered chain
//! of independent recovery strategies and stops at the first one whose
//! output satisfies the shape descriptor. Strategies are ordered by
//! increasing risk of producing a wrong-but-well-formed result; the
//! riskier ones are only reached after everything safer has failed.
//!
//! Every strategy is pure: raw text in, `Option<Value>` out.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::debug;

use crate::types::response::ShapeDescriptor;

/// A payload recovered from a raw response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// The validated structured value
    pub value: Value,

    /// 0-based index of the strategy that produced it
    pub strategy: usize,
}

/// Run the strategy chain over a raw response.
///
/// Returns `None` only when every strategy fails; the classifier then
/// decides whether the failure is malformed or truncated.
pub fn extract_payload(raw: &str, shape: &ShapeDescriptor) -> Option<Extracted> {
    for (index, strategy) in STRATEGIES.iter().enumerate() {
        if let Some(value) = strategy(raw, shape) {
            debug!(strategy = index, "extraction strategy succeeded");
            return Some(Extracted {
                value,
                strategy: index,
            });
        }
    }
    debug!(response_len = raw.len(), "all extraction strategies failed");
    None
}

type Strategy = fn(&str, &ShapeDescriptor) -> Option<Value>;

/// The ordered chain. Index order is part of the contract: provenance
/// records the winning index and the classifier reasons about it.
const STRATEGIES: [Strategy; 9] = [
    labeled_fence,
    any_fence,
    balanced_span,
    widest_span,
    repaired,
    field_by_field,
    preprocessed,
    prefix_parse,
    last_resort,
];

/// Parse text and accept only if the shape descriptor is satisfied.
fn parse_shaped(text: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    shape.matches(&value).then_some(value)
}

/// Strategy 0: content between ```json fences.
fn labeled_fence(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let start = raw.find("```json")? + "```json".len();
    let rest = &raw[start..];
    let end = rest.find("```")?;
    parse_shaped(&rest[..end], shape)
}

/// Strategy 1: content between any fences, not keyed to a label.
fn any_fence(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // Skip a language tag on the fence line, if any
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    parse_shaped(&body[..end], shape)
}

/// Strategy 2: balanced-bracket scan.
///
/// Scans forward from the first opening bracket, tracking nesting depth
/// and string-literal state so brackets inside quoted strings are
/// ignored, and takes the span up to the matching close.
fn balanced_span(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let span = find_balanced_span(raw)?;
    parse_shaped(span, shape)
}

/// Strategy 3: greedy longest-match of the widest plausible span.
fn widest_span(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let open = raw.find(['[', '{'])?;
    let close_char = match raw.as_bytes()[open] {
        b'[' => ']',
        _ => '}',
    };
    let close = raw.rfind(close_char)?;
    if close <= open {
        return None;
    }
    parse_shaped(&raw[open..=close], shape)
}

/// Strategy 4: targeted syntactic repair, then re-parse.
///
/// Fixes the most common corruption patterns: trailing commas,
/// unescaped quotes inside string fields, and an unterminated string
/// at end-of-input.
fn repaired(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let open = raw.find(['[', '{'])?;
    let span = &raw[open..];
    let fixed = repair_text(span);
    parse_shaped(&fixed, shape)
}

/// Strategy 5: manual field-by-field extraction.
///
/// When full-structure parsing fails, pulls out individually
/// recognizable key/value pairs and assembles a best-effort structure.
fn field_by_field(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    static PAIR_RE: OnceLock<Regex> = OnceLock::new();
    let re = PAIR_RE.get_or_init(|| {
        Regex::new(r#""(\w+)"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("pair regex compiles")
    });

    let mut objects: Vec<Value> = Vec::new();
    let mut current = Map::new();
    let mut first_key: Option<String> = None;

    for caps in re.captures_iter(raw) {
        let key = caps[1].to_string();
        let val = caps[2].to_string();

        // A repeated leading key starts a new object
        match &first_key {
            Some(k) if *k == key => {
                if !current.is_empty() {
                    objects.push(Value::Object(std::mem::take(&mut current)));
                }
            }
            None => first_key = Some(key.clone()),
            _ => {}
        }
        current.insert(key, Value::String(val));
    }
    if !current.is_empty() {
        objects.push(Value::Object(current));
    }
    if objects.is_empty() {
        return None;
    }

    let candidate = json!(objects);
    shape.matches(&candidate).then_some(candidate)
}

/// Strategy 6: strip known noise, then retry strategies 0-5.
///
/// Leading commentary before the structural span and trailing prose
/// after it are the most common decorations.
fn preprocessed(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let cleaned = strip_noise(raw)?;
    if cleaned == raw {
        return None;
    }
    for strategy in &STRATEGIES[..6] {
        if let Some(value) = strategy(&cleaned, shape) {
            return Some(value);
        }
    }
    None
}

/// Strategy 7: progressive truncation-tolerant parsing.
///
/// For responses cut off mid-stream: attempts successively shorter
/// prefixes of the suspected span, closing open delimiters, and
/// accepts the longest prefix that parses cleanly.
fn prefix_parse(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    let open = raw.find(['[', '{'])?;
    let span = &raw[open..];

    // Candidate cut points: after each object close, longest first
    let cuts: Vec<usize> = span
        .char_indices()
        .filter(|(_, c)| *c == '}')
        .map(|(i, _)| i)
        .rev()
        .collect();

    for cut in cuts {
        let mut candidate = span[..=cut].to_string();
        // Drop a dangling comma left by a truncated element
        while candidate.ends_with([',', ' ', '\n']) {
            candidate.pop();
        }
        for closer in open_delimiters(&candidate) {
            candidate.push(closer);
        }
        if let Some(value) = parse_shaped(&candidate, shape) {
            return Some(value);
        }
    }
    None
}

/// Strategy 8: last-resort regex reconstruction.
///
/// Produces a minimally populated structure rather than nothing, even
/// for an excerpt whose string literal was never terminated.
fn last_resort(raw: &str, shape: &ShapeDescriptor) -> Option<Value> {
    static TYPE_RE: OnceLock<Regex> = OnceLock::new();
    static TEXT_RE: OnceLock<Regex> = OnceLock::new();
    let type_re = TYPE_RE
        .get_or_init(|| Regex::new(r#""type"\s*:\s*"([^"]*)"#).expect("type regex compiles"));
    let text_re = TEXT_RE
        .get_or_init(|| Regex::new(r#""text"\s*:\s*"([^"]*)"#).expect("text regex compiles"));

    let types: Vec<&str> = type_re.captures_iter(raw).map(|c| c.get(1).map_or("", |m| m.as_str())).collect();
    let texts: Vec<&str> = text_re.captures_iter(raw).map(|c| c.get(1).map_or("", |m| m.as_str())).collect();
    if types.is_empty() && texts.is_empty() {
        return None;
    }

    let count = types.len().max(texts.len());
    let objects: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "type": types.get(i).copied().unwrap_or("unknown"),
                "text": texts.get(i).copied().unwrap_or(""),
            })
        })
        .collect();

    let candidate = json!(objects);
    shape.matches(&candidate).then_some(candidate)
}

/// Find the balanced structural span starting at the first open
/// bracket, or `None` if the input ends before it closes.
pub(crate) fn find_balanced_span(raw: &str) -> Option<&str> {
    let open = raw.find(['[', '{'])?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' | b'{' if !in_string => depth += 1,
            b']' | b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&raw[open..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scan-based structural state at end of input: the closers needed to
/// balance the text, innermost first, plus a quote if a string literal
/// is still open.
pub(crate) fn open_delimiters(text: &str) -> Vec<char> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for b in text.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => stack.push(']'),
            b'{' if !in_string => stack.push('}'),
            b']' | b'}' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut closers = Vec::new();
    if in_string {
        closers.push('"');
    }
    while let Some(c) = stack.pop() {
        closers.push(c);
    }
    closers
}

/// Apply the targeted repairs of strategy 4.
fn repair_text(span: &str) -> String {
    static TRAILING_COMMA_RE: OnceLock<Regex> = OnceLock::new();
    let trailing = TRAILING_COMMA_RE
        .get_or_init(|| Regex::new(r",\s*([\]}])").expect("trailing comma regex compiles"));

    let mut fixed = trailing.replace_all(span, "$1").into_owned();
    fixed = escape_inner_quotes(&fixed);

    // Unterminated string or structure at end-of-input
    for closer in open_delimiters(&fixed) {
        fixed.push(closer);
    }
    fixed
}

/// Escape bare quotes inside string values.
///
/// Heuristic: a quote inside a value position that is not followed by
/// a structural character (`,` `}` `]` `:`) cannot legally close the
/// string, so it gets escaped.
///
/// Walks chars, not bytes: the output is re-emitted text, and string
/// values routinely carry multi-byte characters.
fn escape_inner_quotes(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                if in_string {
                    let next = bytes[i + 1..]
                        .iter()
                        .find(|&&n| !n.is_ascii_whitespace())
                        .copied();
                    match next {
                        Some(b',') | Some(b'}') | Some(b']') | Some(b':') | None => {
                            in_string = false;
                            out.push('"');
                        }
                        _ => out.push_str("\\\""),
                    }
                } else {
                    in_string = true;
                    out.push('"');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Strip leading commentary and trailing prose around the structural
/// span. Returns `None` when there is no span to isolate.
fn strip_noise(raw: &str) -> Option<String> {
    let open = raw.find(['[', '{', '`'])?;
    let tail_close = raw.rfind([']', '}', '`'])?;
    if tail_close < open {
        return None;
    }
    Some(raw[open..=tail_close].to_string())
}
