use once_cell::sync::Lazy;
use regex::Regex;

/// `12. text` or `12、text`; the remainder after one optional space is kept verbatim.
static NUMBERED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.、] ?(.+)$").expect("numbered line regex"));
static NUMBER_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.、]").expect("number prefix regex"));

const HEADING_PREFIXES: [&str; 5] = ["#", "翻译", "要求", "词条", "相关"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedBatch {
    /// Always exactly `expected` items.
    pub translations: Vec<String>,
    /// How many lines were actually recovered before padding/truncation.
    pub recovered: usize,
}

impl ParsedBatch {
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.recovered == self.translations.len()
    }
}

fn is_heading(line: &str) -> bool {
    let t = line.trim_start();
    HEADING_PREFIXES.iter().any(|p| t.starts_with(p))
}

/// Splits a numbered batch response back into one string per entry.
///
/// Best effort: numbered lines win, unnumbered non-heading lines are accepted too, and a count
/// mismatch falls back to bare lines only before padding with "" or truncating.
pub fn parse_batch_response(text: &str, expected: usize) -> ParsedBatch {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut results: Vec<String> = Vec::new();
    for line in &lines {
        if let Some(caps) = NUMBERED_RE.captures(line) {
            results.push(caps[1].to_string());
        } else if !is_heading(line) {
            results.push((*line).to_string());
        }
    }

    if results.len() != expected {
        let bare: Vec<String> = lines
            .iter()
            .filter(|l| !is_heading(l) && !NUMBER_PREFIX_RE.is_match(l))
            .map(|l| (*l).to_string())
            .collect();
        if bare.len() >= expected && !bare.is_empty() {
            results = bare;
        }
    }

    let recovered = results.len();
    results.resize(expected, String::new());
    ParsedBatch {
        translations: results,
        recovered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_lines_keep_inner_whitespace() {
        let got = parse_batch_response("1. Open file \n2、Save  \n", 2);
        assert_eq!(got.translations, vec!["Open file ", "Save  "]);
        assert!(got.is_aligned());
    }

    #[test]
    fn headings_and_blank_lines_are_dropped() {
        let got = parse_batch_response("## Result\n\n1. A\n翻译结果：\n2. B", 2);
        assert_eq!(got.translations, vec!["A", "B"]);
    }

    #[test]
    fn under_count_is_padded() {
        let got = parse_batch_response("1. A\n2. B", 3);
        assert_eq!(got.translations, vec!["A", "B", ""]);
        assert_eq!(got.recovered, 2);
        assert!(!got.is_aligned());
    }

    #[test]
    fn over_count_prefers_bare_lines() {
        let got = parse_batch_response("Here you go\n1. A\nSecond\nThird", 2);
        assert_eq!(got.translations, vec!["Here you go", "Second"]);
        assert_eq!(got.recovered, 3);
    }

    #[test]
    fn unnumbered_response() {
        let got = parse_batch_response("Alpha\nBeta", 2);
        assert_eq!(got.translations, vec!["Alpha", "Beta"]);
    }
}
