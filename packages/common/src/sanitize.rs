//! Normalization of free text destined for the image `description` field.
//!
//! Every writer of that field (the inference pipeline and human edits alike)
//! goes through [`sanitize`]. The output never contains control characters,
//! markup, or any of `& < > " ' backtick` in raw form, so it can be placed in
//! an HTTP header value or rendered as plain text without further escaping.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of a sanitized description, in characters, counted after escaping.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Entity forms produced by [`sanitize`]. An `&` that already starts one of
/// these is kept as is, which is what makes the function idempotent.
const ENTITIES: [&str; 6] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#39;", "&#96;"];

static TAG_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("tag pattern is a valid regex"));

/// Clean raw text for storage and display.
///
/// Steps, in order: trim, drop markup-like `<...>` spans, fold control
/// characters and whitespace runs into single spaces, escape the special
/// characters to entities, truncate to [`MAX_DESCRIPTION_CHARS`].
///
/// An empty return value means there was nothing usable in the input.
pub fn sanitize(raw: &str) -> String {
    let stripped = TAG_SPAN.replace_all(raw.trim(), " ");
    let normalized = normalize_whitespace(&stripped);
    let escaped = escape(&normalized);
    truncate(escaped)
}

fn normalize_whitespace(text: &str) -> String {
    let spaced: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, c) in text.char_indices() {
        match c {
            '&' => {
                let rest = &text[idx..];
                if ENTITIES.iter().any(|entity| rest.starts_with(entity)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#96;"),
            other => out.push(other),
        }
    }
    out
}

fn truncate(mut text: String) -> String {
    if let Some((cut, _)) = text.char_indices().nth(MAX_DESCRIPTION_CHARS) {
        text.truncate(cut);
        // Every `&` in escaped text opens an entity; never keep half of one.
        if let Some(amp) = text.rfind('&')
            && !text[amp..].contains(';')
        {
            text.truncate(amp);
        }
        let kept = text.trim_end().len();
        text.truncate(kept);
    }
    text
}
