use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{Placeholder, PlaceholderKind};

/// Braces admit digits, ASCII letters, `:` and `.` only; anything else stays plain text.
pub static CURLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([:\d.a-zA-Z]*)\}").expect("curly placeholder regex"));
pub static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%(\d+)").expect("percent placeholder regex"));

/// Finds every placeholder in `text`, ordered by offset.
///
/// Curly matches are taken first; a percent match overlapping an already consumed range is
/// skipped, so the result never contains overlapping spans.
pub fn extract_placeholders(text: &str) -> Vec<Placeholder> {
    let mut out: Vec<Placeholder> = Vec::new();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    for caps in CURLY_RE.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        let spec = caps
            .get(1)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        consumed.push((m.start(), m.end()));
        out.push(Placeholder {
            kind: PlaceholderKind::Curly,
            original: m.as_str().to_string(),
            format_spec: spec,
            offset: m.start(),
        });
    }

    for m in PERCENT_RE.find_iter(text) {
        let overlaps = consumed
            .iter()
            .any(|&(s, e)| m.start() < e && s < m.end());
        if overlaps {
            continue;
        }
        out.push(Placeholder {
            kind: PlaceholderKind::Percent,
            original: m.as_str().to_string(),
            format_spec: None,
            offset: m.start(),
        });
    }

    out.sort_by_key(|p| p.offset);
    out
}

pub fn curly_count(text: &str) -> usize {
    CURLY_RE.find_iter(text).count()
}
