//! Escaping of host text for single-quoted script string literals

/// Escape `text` so it can sit between single quotes in injected script.
///
/// Backslash goes first so later replacements are not escaped twice. U+2028
/// and U+2029 are escaped because older script parsers treat them as line
/// terminators inside string literals.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

/// Escape optional text; absent text becomes the empty literal
pub fn escape_opt(text: Option<&str>) -> String {
    text.map(escape).unwrap_or_default()
}
