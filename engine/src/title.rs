//! Conversation title derivation.
//!
//! A title is a pure function of the first user message: strip a configured
//! greeting prefix, fall back to the original text when too little remains,
//! and clamp the length for display.

use unicode_segmentation::UnicodeSegmentation;

/// Maximum title length before the ellipsis, in grapheme clusters.
pub const TITLE_MAX_GRAPHEMES: usize = 25;

/// Remainders shorter than this (in chars) revert to the original text -
/// a bare "Hi!" makes a better title than the punctuation it leaves behind.
const TITLE_MIN_REMAINDER: usize = 3;

#[derive(Debug, Clone)]
pub struct TitleRules {
    /// Greeting prefixes stripped case-insensitively from the start of the
    /// text. Longer prefixes should come first so "xin chào" wins over
    /// "chào".
    pub greeting_prefixes: Vec<String>,
    /// Label used when no title can be derived.
    pub default_label: String,
}

impl Default for TitleRules {
    fn default() -> Self {
        Self {
            greeting_prefixes: ["xin chào", "chào bạn", "chào", "hello", "hey", "hi"]
                .iter()
                .map(|&p| p.to_owned())
                .collect(),
            default_label: "New conversation".to_owned(),
        }
    }
}

/// Case-insensitive prefix strip that never assumes lowercasing preserves
/// byte lengths.
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = text;
    for expected in prefix.chars() {
        let mut chars = rest.chars();
        let actual = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        rest = chars.as_str();
    }
    Some(rest)
}

fn clamp_for_display(text: &str) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(TITLE_MAX_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Derive a display title from the first user message.
#[must_use]
pub fn derive_title(first_message: &str, rules: &TitleRules) -> String {
    let original = first_message.trim();
    if original.is_empty() {
        return rules.default_label.clone();
    }

    let stripped = rules
        .greeting_prefixes
        .iter()
        .find_map(|prefix| strip_prefix_ci(original, prefix))
        .map(str::trim)
        .unwrap_or(original);

    let base = if stripped.chars().count() < TITLE_MIN_REMAINDER {
        original
    } else {
        stripped
    };

    let title = clamp_for_display(base);
    if title.is_empty() {
        rules.default_label.clone()
    } else {
        title
    }
}
