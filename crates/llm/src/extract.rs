//! Structured-block extraction from free-text model output.
//!
//! Models sometimes wrap the requested JSON object in prose or a fenced code
//! block. The first of these that yields a JSON object wins:
//!
//! 1. the whole (trimmed) text;
//! 2. the first fenced code block whose content parses as an object;
//! 3. the first balanced `{...}` span, scanning left to right, that parses as
//!    an object. Brace matching skips braces inside string literals.

use serde_json::{Map, Value};

/// Extracts the structured payload from `text`, or `None` if it holds no
/// JSON object.
pub fn extract_structured_block(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(object) = parse_object(trimmed) {
        return Some(object);
    }
    if let Some(object) = fenced_blocks(trimmed).find_map(parse_object) {
        return Some(object);
    }
    balanced_spans(trimmed).find_map(parse_object)
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Map<String, Value>>(candidate.trim())
        .ok()
        .map(Value::Object)
}

/// Contents of each ``` fenced block, language tag removed.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find("```")?;
        let after_fence = &rest[open + 3..];
        // The language tag runs to the end of the opening line.
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        let close = body.find("```")?;
        rest = &body[close + 3..];
        Some(&body[..close])
    })
}

/// Every balanced `{...}` span in start order.
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(move |(start, _)| matching_brace(text, start).map(|end| &text[start..=end]))
}

/// Byte index of the `}` closing the `{` at `start`.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
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
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
