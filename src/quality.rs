use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{Placeholder, ProtectedToken};
use crate::sentinels::{TokenMarkers, ANY_BARE_TOKEN_RE};

static PERCENT_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\s+\d").expect("percent gap regex"));
static BRACKET_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s+\{|\}\s+\]").expect("bracket gap regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenIssue {
    Lost { token: String, original: String },
    Duplicated { token: String, original: String },
    OrderChanged,
}

impl TokenIssue {
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Lost { token, original } => {
                format!("placeholder token {token} ({original}) lost or rewritten")
            }
            Self::Duplicated { token, original } => {
                format!("placeholder token {token} ({original}) duplicated")
            }
            Self::OrderChanged => "placeholder order changed".to_string(),
        }
    }
}

/// Checks that every token of `order` shows up exactly once and in the original order.
///
/// The wrapped form is looked up first; a provider that dropped the markers is tolerated by
/// falling back to the bare id. The order check is reported once, not per inversion.
pub fn validate_token_order(
    translated: &str,
    tokens: &[ProtectedToken],
    order: &[usize],
) -> Vec<TokenIssue> {
    let mut issues: Vec<TokenIssue> = Vec::new();
    let mut positions: Vec<usize> = Vec::with_capacity(order.len());

    for id in order {
        let Some(tok) = tokens.iter().find(|t| t.id == *id) else {
            continue;
        };
        let found = translated
            .find(&tok.wrapped)
            .map(|p| (p, tok.wrapped.as_str()))
            .or_else(|| translated.find(&tok.bare).map(|p| (p, tok.bare.as_str())));
        let Some((pos, _)) = found else {
            issues.push(TokenIssue::Lost {
                token: tok.bare.clone(),
                original: tok.original.clone(),
            });
            continue;
        };
        // The bare id is a substring of the wrapped form, so this counts both.
        if translated.matches(tok.bare.as_str()).count() > 1 {
            issues.push(TokenIssue::Duplicated {
                token: tok.bare.clone(),
                original: tok.original.clone(),
            });
            continue;
        }
        positions.push(pos);
    }

    if positions.windows(2).any(|w| w[1] < w[0]) {
        issues.push(TokenIssue::OrderChanged);
    }
    issues
}

/// Structural checks on the final, restored text against its source.
pub fn validate_final(
    source: &str,
    text: &str,
    placeholders: &[Placeholder],
    markers: &TokenMarkers,
) -> Vec<String> {
    let mut issues: Vec<String> = Vec::new();
    if text.trim().is_empty() {
        issues.push("translation is empty".to_string());
        return issues;
    }
    let mut counted: Vec<&str> = Vec::new();
    for ph in placeholders {
        if !text.contains(&ph.original) {
            issues.push(format!(
                "{} placeholder {} missing from translation",
                ph.kind.as_str(),
                ph.original
            ));
            continue;
        }
        if counted.contains(&ph.original.as_str()) {
            continue;
        }
        counted.push(&ph.original);
        let (want, got) = (
            source.matches(ph.original.as_str()).count(),
            text.matches(ph.original.as_str()).count(),
        );
        if got > want {
            issues.push(format!(
                "{} placeholder {} appears {got} times, source has {want}",
                ph.kind.as_str(),
                ph.original
            ));
        }
    }
    if PERCENT_GAP_RE.is_match(text) {
        issues.push("whitespace between % and its number".to_string());
    }
    if BRACKET_GAP_RE.is_match(text) {
        issues.push("whitespace between bracket and placeholder brace".to_string());
    }
    if ANY_BARE_TOKEN_RE.is_match(text)
        || text.contains(markers.open())
        || text.contains(markers.close())
    {
        issues.push("residual protected token in translation".to_string());
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freezer::protect_text;
    use crate::placeholders::extract_placeholders;

    fn protected(src: &str) -> crate::freezer::ProtectResult {
        protect_text(src, &TokenMarkers::default())
    }

    #[test]
    fn identity_passes() {
        let p = protected("{} and {} and {:d}");
        assert!(validate_token_order(&p.text, &p.tokens, &p.order).is_empty());
    }

    #[test]
    fn swap_reports_single_order_issue() {
        let p = protected("{} then {}");
        let swapped = format!("{} then {}", p.tokens[1].wrapped, p.tokens[0].wrapped);
        assert_eq!(
            validate_token_order(&swapped, &p.tokens, &p.order),
            vec![TokenIssue::OrderChanged]
        );
    }

    #[test]
    fn three_way_rotation_still_one_order_issue() {
        let p = protected("{}{}{}");
        let t = &p.tokens;
        let rotated = format!("{}{}{}", t[2].wrapped, t[0].wrapped, t[1].wrapped);
        let issues = validate_token_order(&rotated, t, &p.order);
        assert_eq!(issues, vec![TokenIssue::OrderChanged]);
    }

    #[test]
    fn duplicate_is_not_reported_as_lost_elsewhere() {
        let p = protected("{} / {}");
        let t = &p.tokens;
        let dup = format!("{} {} {}", t[0].wrapped, t[0].wrapped, t[1].wrapped);
        let issues = validate_token_order(&dup, t, &p.order);
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], TokenIssue::Duplicated { token, .. } if token == "__PH_CURLY_0__"));
    }

    #[test]
    fn duplicate_across_wrapped_and_bare_forms() {
        let p = protected("第{}页，共{}页");
        let t = &p.tokens;
        let reply = format!("Page {} of {} {}", t[0].wrapped, t[0].bare, t[1].wrapped);
        let issues = validate_token_order(&reply, t, &p.order);
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], TokenIssue::Duplicated { token, .. } if token == "__PH_CURLY_0__"));
    }

    #[test]
    fn extra_placeholder_copies_fail_final_check() {
        let m = TokenMarkers::default();
        let src = "第{}页，共{}页";
        let phs = extract_placeholders(src);
        assert!(validate_final(src, "Page {} of {}", &phs, &m).is_empty());
        let issues = validate_final(src, "Page {} of {} {}", &phs, &m);
        assert_eq!(issues, vec!["curly placeholder {} appears 3 times, source has 2"]);
    }

    #[test]
    fn round_trip_is_byte_exact() {
        for src in [
            "{}{}",
            "[{}-{}]",
            "第{}页，共{}页",
            "提示：共{}个文件，占用{:.3f}MB",
            "{0} -> {1:>8} ({name}) %1 %2",
            "{} {} {} {}",
        ] {
            let p = protected(src);
            assert!(p.tokens.len() >= 2, "{src}");
            assert!(validate_token_order(&p.text, &p.tokens, &p.order).is_empty(), "{src}");
            assert_eq!(crate::freezer::restore_text(&p.text, &p.tokens), src);
        }
    }

    #[test]
    fn lost_and_bare_fallback() {
        let p = protected("{} / {}");
        let issues = validate_token_order("__PH_CURLY_0__ only", &p.tokens, &p.order);
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], TokenIssue::Lost { token, .. } if token == "__PH_CURLY_1__"));
    }

    #[test]
    fn final_checks() {
        let m = TokenMarkers::default();
        let src = "%1 of {}";
        let phs = extract_placeholders(src);
        assert!(validate_final(src, "%1 of {}", &phs, &m).is_empty());
        let issues = validate_final(src, "% 1 of", &phs, &m);
        assert!(issues.iter().any(|i| i.contains("%1 missing")));
        assert!(issues.iter().any(|i| i.contains("{} missing")));
        assert!(issues.iter().any(|i| i.contains("whitespace between %")));
        assert_eq!(validate_final(src, "  ", &phs, &m), vec!["translation is empty"]);
        assert!(!validate_final("", "[ {}]", &[], &m).is_empty());
        assert!(!validate_final("", "x ⟦__PH_CURLY_0__⟧", &[], &m).is_empty());
    }
}
