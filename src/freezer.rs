use crate::ir::ProtectedToken;
use crate::placeholders::CURLY_RE;
use crate::sentinels::{bare_token, TokenMarkers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectResult {
    pub text: String,
    pub tokens: Vec<ProtectedToken>,
    /// Token ids in the order they were introduced, left to right.
    pub order: Vec<usize>,
}

impl ProtectResult {
    #[must_use]
    pub fn is_protected(&self) -> bool {
        !self.tokens.is_empty()
    }
}

/// Replaces each curly placeholder with a wrapped, numbered token.
///
/// Percent slots are left alone: `%1`/`%2` already say which is which.
pub fn protect_text(text: &str, markers: &TokenMarkers) -> ProtectResult {
    let mut tokens: Vec<ProtectedToken> = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0usize;

    for m in CURLY_RE.find_iter(text) {
        out.push_str(&text[pos..m.start()]);
        let id = tokens.len();
        let bare = bare_token(id);
        let wrapped = markers.wrap(&bare);
        out.push_str(&wrapped);
        tokens.push(ProtectedToken {
            id,
            bare,
            wrapped,
            original: m.as_str().to_string(),
        });
        pos = m.end();
    }
    out.push_str(&text[pos..]);

    let order = tokens.iter().map(|t| t.id).collect();
    ProtectResult {
        text: out,
        tokens,
        order,
    }
}

/// Puts the original placeholders back. Wrapped forms first, then any bare leftovers.
pub fn restore_text(text: &str, tokens: &[ProtectedToken]) -> String {
    if tokens.is_empty() || text.is_empty() {
        return text.to_string();
    }
    let mut out = text.to_string();
    for tok in tokens {
        if out.contains(&tok.wrapped) {
            out = out.replace(&tok.wrapped, &tok.original);
        }
        if out.contains(&tok.bare) {
            out = out.replace(&tok.bare, &tok.original);
        }
    }
    out
}
