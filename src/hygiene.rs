use once_cell::sync::Lazy;
use regex::Regex;

use crate::placeholders::extract_placeholders;

const CJK_PUNCT: [char; 7] = ['，', '。', '：', '；', '！', '？', '、'];
const ASCII_PUNCT: [char; 6] = [',', '.', ':', ';', '!', '?'];
const MIXED_WINDOW: usize = 5;

static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace run regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HygieneIssue {
    MixedPunctuation,
    EdgeWhitespace,
    WhitespaceRun,
}

impl HygieneIssue {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::MixedPunctuation => "mixed Chinese and English punctuation",
            Self::EdgeWhitespace => "leading/trailing whitespace",
            Self::WhitespaceRun => "consecutive whitespace inside text",
        }
    }
}

/// Source-side checks. Never blocks translation.
pub fn check_source(text: &str) -> Vec<HygieneIssue> {
    let mut issues: Vec<HygieneIssue> = Vec::new();
    if text.is_empty() {
        return issues;
    }

    if has_mixed_punctuation(text) {
        issues.push(HygieneIssue::MixedPunctuation);
    }

    let trimmed = text.trim();
    if trimmed != text {
        issues.push(HygieneIssue::EdgeWhitespace);
    }
    if WS_RUN_RE.is_match(trimmed) {
        issues.push(HygieneIssue::WhitespaceRun);
    }
    issues
}

/// Punctuation inside a placeholder such as `{:.3f}` is format syntax, not prose.
fn has_mixed_punctuation(text: &str) -> bool {
    let spans: Vec<(usize, usize)> = extract_placeholders(text)
        .iter()
        .map(|p| (p.offset, p.end()))
        .collect();
    let mut cjk: Vec<usize> = Vec::new();
    let mut ascii: Vec<usize> = Vec::new();
    for (i, (byte, ch)) in text.char_indices().enumerate() {
        if spans.iter().any(|(s, e)| (*s..*e).contains(&byte)) {
            continue;
        }
        if CJK_PUNCT.contains(&ch) {
            cjk.push(i);
        } else if ASCII_PUNCT.contains(&ch) {
            ascii.push(i);
        }
    }
    cjk.iter()
        .any(|c| ascii.iter().any(|a| c.abs_diff(*a) <= MIXED_WINDOW))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_each_problem() {
        assert_eq!(check_source(" leading space"), vec![HygieneIssue::EdgeWhitespace]);
        assert_eq!(check_source("a,b，c"), vec![HygieneIssue::MixedPunctuation]);
        assert_eq!(check_source("a  b"), vec![HygieneIssue::WhitespaceRun]);
        assert!(check_source("normal").is_empty());
    }

    #[test]
    fn distant_punctuation_is_fine() {
        assert!(check_source("第一句，很长很长很长的句子. end").is_empty());
        assert_eq!(check_source("好，.x"), vec![HygieneIssue::MixedPunctuation]);
    }

    #[test]
    fn format_specs_are_not_punctuation() {
        assert!(check_source("提示：共{}个文件，占用{:.3f}MB").is_empty());
        assert_eq!(
            check_source("占用{:.3f}，共. 个"),
            vec![HygieneIssue::MixedPunctuation]
        );
    }

    #[test]
    fn edge_run_counts_once() {
        assert_eq!(check_source("x   "), vec![HygieneIssue::EdgeWhitespace]);
    }
}
