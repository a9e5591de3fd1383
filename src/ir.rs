use std::collections::HashMap;
use std::fmt;

/// Which surface syntax a placeholder uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    /// `{}`, `{0}`, `{:.3f}` and friends.
    Curly,
    /// `%1`, `%2`, ...
    Percent,
}

impl PlaceholderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curly => "curly",
            Self::Percent => "percent",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    /// Exact substring found in the source.
    pub original: String,
    /// Text between the braces for curly placeholders, when there is any.
    pub format_spec: Option<String>,
    /// Byte offset into the source text.
    pub offset: usize,
}

impl Placeholder {
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.original.len()
    }

    /// Percent slots carry their own index, curly ones can only be told apart by position.
    #[must_use]
    pub fn is_distinguishable(&self) -> bool {
        matches!(self.kind, PlaceholderKind::Percent)
    }
}

/// Stand-in for one curly placeholder occurrence while the text is out with a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectedToken {
    pub id: usize,
    /// `__PH_CURLY_<id>__`
    pub bare: String,
    /// bare form inside the marker pair
    pub wrapped: String,
    pub original: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    Hygiene,
    TranslationFailure,
    Validation,
    PostProcess,
}

impl DiagnosticKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Hygiene => "hygiene",
            Self::TranslationFailure => "translation failure",
            Self::Validation => "validation",
            Self::PostProcess => "post-process",
        }
    }

    /// Kinds that also land in the run-level error log.
    #[must_use]
    pub fn is_logged(self) -> bool {
        matches!(
            self,
            Self::Hygiene | Self::TranslationFailure | Self::Validation
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    HygieneChecked,
    ForcedTranslation,
    QueuedForModel,
    BatchTranslated,
    TokenValid,
    TokenInvalid,
    Retried,
    Restored,
    PostProcessed,
    Validated,
    Finalized,
}

impl EntryState {
    /// Allowed forward moves. Finalized is reachable from anywhere so a failed entry is never dropped.
    #[must_use]
    pub fn can_advance_to(self, next: EntryState) -> bool {
        use EntryState::*;
        if next == Finalized {
            return self != Finalized;
        }
        matches!(
            (self, next),
            (Pending, HygieneChecked)
                | (HygieneChecked, ForcedTranslation)
                | (HygieneChecked, QueuedForModel)
                | (QueuedForModel, BatchTranslated)
                | (BatchTranslated, TokenValid)
                | (BatchTranslated, TokenInvalid)
                | (TokenInvalid, Retried)
                | (TokenValid, Restored)
                | (TokenInvalid, Restored)
                | (Retried, Restored)
                | (ForcedTranslation, PostProcessed)
                | (Restored, PostProcessed)
                | (PostProcessed, Validated)
        )
    }
}

/// One row of the source table moving through the pipeline.
#[derive(Clone, Debug)]
pub struct Entry {
    pub id: String,
    pub row: usize,
    pub source: String,
    pub comment: Option<String>,
    /// All source columns, passed through untouched.
    pub fields: HashMap<String, String>,
    pub translation: String,
    pub diagnostics: Vec<Diagnostic>,
    state: EntryState,
}

impl Entry {
    pub fn new(
        id: String,
        row: usize,
        source: String,
        comment: Option<String>,
        fields: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            row,
            source,
            comment,
            fields,
            translation: String::new(),
            diagnostics: Vec::new(),
            state: EntryState::Pending,
        }
    }

    #[must_use]
    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn advance(&mut self, next: EntryState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "entry {}: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        self.state = next;
    }

    pub fn push(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(kind, message));
    }

    /// Notes column value: every diagnostic with its category label.
    #[must_use]
    pub fn notes(&self) -> String {
        self.diagnostics
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    #[must_use]
    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}
