use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MARKER_OPEN: &str = "⟦";
pub const DEFAULT_MARKER_CLOSE: &str = "⟧";

const BARE_PREFIX: &str = "__PH_CURLY_";
const BARE_SUFFIX: &str = "__";

/// Matches any bare protected token, wrapped or not.
pub static ANY_BARE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__PH_CURLY_\d+__").expect("bare token regex"));

pub fn bare_token(id: usize) -> String {
    format!("{BARE_PREFIX}{id}{BARE_SUFFIX}")
}

/// Boundary characters placed around each bare token.
///
/// Providers sometimes strip or rewrite unusual brackets, so the pair is configurable and every
/// consumer also accepts the bare token without its markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMarkers {
    open: String,
    close: String,
}

impl Default for TokenMarkers {
    fn default() -> Self {
        Self {
            open: DEFAULT_MARKER_OPEN.to_string(),
            close: DEFAULT_MARKER_CLOSE.to_string(),
        }
    }
}

impl TokenMarkers {
    /// Empty or whitespace-only markers fall back to the defaults.
    pub fn new(open: &str, close: &str) -> Self {
        let open = open.trim();
        let close = close.trim();
        if open.is_empty() || close.is_empty() {
            return Self::default();
        }
        Self {
            open: open.to_string(),
            close: close.to_string(),
        }
    }

    #[must_use]
    pub fn open(&self) -> &str {
        &self.open
    }

    #[must_use]
    pub fn close(&self) -> &str {
        &self.close
    }

    pub fn wrap(&self, bare: &str) -> String {
        format!("{}{}{}", self.open, bare, self.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_configured_pair() {
        let m = TokenMarkers::new("[[", "]]");
        assert_eq!(m.wrap(&bare_token(3)), "[[__PH_CURLY_3__]]");
        assert_eq!(TokenMarkers::new(" ", ""), TokenMarkers::default());
        assert!(ANY_BARE_TOKEN_RE.is_match(&TokenMarkers::default().wrap(&bare_token(0))));
    }
}
