use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;

use crate::ir::{DiagnosticKind, Entry};

/// One entry's issues of a single category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub id: String,
    pub row: usize,
    pub source: String,
    pub translation: String,
    pub issues: Vec<String>,
}

/// Run-level error log, grouped by failure category.
#[derive(Clone, Debug, Default)]
pub struct ErrorLog {
    title: String,
    total_entries: usize,
    translation_failures: Vec<LogRecord>,
    hygiene: Vec<LogRecord>,
    validation: Vec<LogRecord>,
}

fn record_for(entry: &Entry, kind: DiagnosticKind) -> Option<LogRecord> {
    let issues: Vec<String> = entry
        .diagnostics_of(kind)
        .map(|d| d.message.clone())
        .collect();
    if issues.is_empty() {
        return None;
    }
    Some(LogRecord {
        id: entry.id.clone(),
        row: entry.row,
        source: entry.source.clone(),
        translation: entry.translation.clone(),
        issues,
    })
}

impl ErrorLog {
    pub fn from_entries(title: &str, entries: &[Entry]) -> Self {
        let mut log = Self {
            title: title.to_string(),
            total_entries: entries.len(),
            ..Default::default()
        };
        for e in entries {
            log.translation_failures
                .extend(record_for(e, DiagnosticKind::TranslationFailure));
            log.hygiene.extend(record_for(e, DiagnosticKind::Hygiene));
            log.validation.extend(record_for(e, DiagnosticKind::Validation));
        }
        log
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.translation_failures.is_empty() && self.hygiene.is_empty() && self.validation.is_empty()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.translation_failures.len(),
            self.hygiene.len(),
            self.validation.len(),
        )
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Translation error log: {}", self.title);
        let _ = writeln!(out, "Entries processed: {}\n", self.total_entries);
        for (heading, records) in [
            ("Translation failures", &self.translation_failures),
            ("Hygiene issues", &self.hygiene),
            ("Validation failures", &self.validation),
        ] {
            if records.is_empty() {
                continue;
            }
            let _ = writeln!(out, "== {heading} ({}) ==\n", records.len());
            for r in records {
                let _ = writeln!(out, "[row {}] id: {}", r.row + 1, r.id);
                let _ = writeln!(out, "  source: {}", r.source);
                let _ = writeln!(out, "  translation: {}", r.translation);
                for issue in &r.issues {
                    let _ = writeln!(out, "  - {issue}");
                }
                out.push('\n');
            }
        }
        let (failures, hygiene, validation) = self.counts();
        let _ = writeln!(out, "== Statistics ==");
        let _ = writeln!(out, "entries: {}", self.total_entries);
        let _ = writeln!(out, "translation failures: {failures}");
        let _ = writeln!(out, "hygiene issues: {hygiene}");
        let _ = writeln!(out, "validation failures: {validation}");
        out
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.render())
            .with_context(|| format!("write error log: {}", path.display()))
    }
}
