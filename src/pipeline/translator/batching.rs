use tracing::{debug, warn};

use crate::freezer::{protect_text, restore_text, ProtectResult};
use crate::hygiene::check_source;
use crate::ir::{DiagnosticKind, Entry, EntryState};
use crate::normalize::force_unit_translation;
use crate::quality::{validate_token_order, TokenIssue};

use super::super::prompts::{
    build_batch_prompt, build_single_prompt, BatchItem, BATCH, SINGLE,
};
use super::super::trace::PromptTrace;
use super::{has_failure, RunCounts, TranslatorPipeline};

/// Model-path state for one entry of the current batch.
struct Queued {
    index: usize,
    protected: ProtectResult,
    scenario: Option<String>,
}

impl TranslatorPipeline {
    /// Drives every entry to `Finalized`. Only prompt-template problems are errors; provider
    /// and validation failures end up as diagnostics.
    pub(super) fn translate_entries(
        &self,
        entries: &mut [Entry],
        trace: &mut PromptTrace,
    ) -> anyhow::Result<RunCounts> {
        let batch_template = self.cfg.prompts.template(BATCH)?;
        let single_template = if self.cfg.retry_invalid {
            Some(self.cfg.prompts.template(SINGLE)?)
        } else {
            None
        };

        let mut counts = RunCounts::default();
        let mut live: Vec<usize> = Vec::new();
        for (i, e) in entries.iter_mut().enumerate() {
            if e.source.trim().is_empty() {
                e.translation = e
                    .fields
                    .get(&self.cfg.columns.translation)
                    .cloned()
                    .unwrap_or_default();
                e.advance(EntryState::Finalized);
                counts.skipped += 1;
                continue;
            }
            screen_entry(e);
            if e.state() == EntryState::ForcedTranslation {
                counts.forced += 1;
            } else {
                counts.model += 1;
            }
            live.push(i);
        }

        let size = self.cfg.batch_size.max(1);
        let total = live.len().div_ceil(size);
        for (b, chunk) in live.chunks(size).enumerate() {
            let first = b * size + 1;
            let last = first + chunk.len() - 1;
            self.progress
                .progress("Batch", b + 1, total, &format!("entries {first}-{last}"));
            self.run_batch(
                entries,
                chunk,
                (first, last),
                &batch_template,
                single_template.as_deref(),
                trace,
            );
            for &i in chunk {
                self.finish_entry(&mut entries[i]);
            }
        }
        Ok(counts)
    }

    fn run_batch(
        &self,
        entries: &mut [Entry],
        chunk: &[usize],
        range: (usize, usize),
        batch_template: &str,
        single_template: Option<&str>,
        trace: &mut PromptTrace,
    ) {
        let queued: Vec<Queued> = chunk
            .iter()
            .copied()
            .filter(|&i| entries[i].state() == EntryState::QueuedForModel)
            .map(|i| Queued {
                index: i,
                protected: protect_text(&entries[i].source, &self.cfg.markers),
                scenario: self.scenario_blocks(&entries[i]),
            })
            .collect();
        let forced = chunk.len() - queued.len();
        if queued.is_empty() {
            self.progress
                .info(format!("All {forced} entries resolved by rules, no model call"));
            return;
        }

        let items: Vec<BatchItem<'_>> = queued
            .iter()
            .map(|q| BatchItem {
                text: &q.protected.text,
                scenario: q.scenario.as_deref(),
            })
            .collect();
        let prompt = build_batch_prompt(batch_template, &self.prompt_context(), &items);
        trace.record_batch(range.0, range.1, queued.len(), forced, &prompt);

        let expected = queued.len();
        match self.batch_chain.translate_batch(&prompt, expected) {
            Ok(out) => {
                let recovered = out.value.recovered;
                if !out.value.is_aligned() {
                    warn!(
                        provider = %out.provider,
                        recovered,
                        expected,
                        "batch response line count differs from entry count"
                    );
                }
                for (k, (q, text)) in queued.iter().zip(out.value.translations).enumerate() {
                    let e = &mut entries[q.index];
                    e.translation = text;
                    if k >= recovered {
                        e.push(
                            DiagnosticKind::TranslationFailure,
                            format!(
                                "batch response had {recovered} of {expected} lines; no translation for this entry"
                            ),
                        );
                    }
                    e.advance(EntryState::BatchTranslated);
                }
                self.progress.info(format!(
                    "Translated by {} ({} model, {} rule-based)",
                    out.provider, expected, forced
                ));
            }
            Err(err) => {
                self.progress.warn(format!("batch translation failed: {err}"));
                for q in &queued {
                    let e = &mut entries[q.index];
                    e.translation.clear();
                    e.push(
                        DiagnosticKind::TranslationFailure,
                        format!("batch translation failed: {err}"),
                    );
                    e.advance(EntryState::BatchTranslated);
                }
            }
        }

        for q in &queued {
            self.check_tokens(&mut entries[q.index], &q.protected, single_template, trace);
        }
    }

    /// Token validation, optional strict retry, then restoration.
    fn check_tokens(
        &self,
        e: &mut Entry,
        protected: &ProtectResult,
        single_template: Option<&str>,
        trace: &mut PromptTrace,
    ) {
        if !protected.is_protected() {
            e.advance(EntryState::TokenValid);
            e.advance(EntryState::Restored);
            return;
        }

        let issues = validate_token_order(&e.translation, &protected.tokens, &protected.order);
        if issues.is_empty() {
            e.advance(EntryState::TokenValid);
        } else {
            e.advance(EntryState::TokenInvalid);
            let remaining = match single_template {
                Some(template) if !self.retry_chain.is_empty() => {
                    e.advance(EntryState::Retried);
                    self.retry_entry(e, protected, template, trace, issues)
                }
                _ => issues,
            };
            // A failed call already explains the missing tokens.
            if !has_failure(e) {
                for issue in remaining {
                    e.push(DiagnosticKind::Validation, issue.message());
                }
            }
        }

        e.translation = restore_text(&e.translation, &protected.tokens);
        e.advance(EntryState::Restored);
    }

    /// Returns the issues that still stand. Retry errors are logged and swallowed.
    fn retry_entry(
        &self,
        e: &mut Entry,
        protected: &ProtectResult,
        template: &str,
        trace: &mut PromptTrace,
        issues: Vec<TokenIssue>,
    ) -> Vec<TokenIssue> {
        let scenario = self.scenario_section(e);
        let prompt = build_single_prompt(
            template,
            &self.prompt_context(),
            &protected.text,
            scenario.as_deref(),
            true,
        );
        trace.record_retry(&e.id, &prompt);

        match self.retry_chain.translate(&prompt) {
            Ok(out) => {
                let again = validate_token_order(&out.value, &protected.tokens, &protected.order);
                if again.is_empty() {
                    debug!(entry = %e.id, provider = %out.provider, "strict retry accepted");
                    e.translation = out.value;
                    e.diagnostics
                        .retain(|d| d.kind != DiagnosticKind::TranslationFailure);
                    return Vec::new();
                }
                debug!(entry = %e.id, issues = again.len(), "strict retry still invalid");
            }
            Err(err) => {
                debug!(entry = %e.id, error = %err, "strict retry failed");
            }
        }
        issues
    }
}

/// Hygiene notes, then the deterministic unit bypass.
fn screen_entry(e: &mut Entry) {
    for issue in check_source(&e.source) {
        e.push(DiagnosticKind::Hygiene, issue.message());
    }
    e.advance(EntryState::HygieneChecked);

    match force_unit_translation(&e.source) {
        Some(forced) => {
            e.translation = forced.text;
            for note in forced.notes {
                e.push(DiagnosticKind::Hygiene, note);
            }
            e.advance(EntryState::ForcedTranslation);
        }
        None => e.advance(EntryState::QueuedForModel),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(source: &str) -> Entry {
        Entry::new("1".into(), 0, source.into(), None, HashMap::new())
    }

    #[test]
    fn malformed_unit_is_forced_with_one_note() {
        let mut e = entry("单位兆");
        screen_entry(&mut e);
        assert_eq!(e.state(), EntryState::ForcedTranslation);
        assert_eq!(e.translation, "unit: 兆");
        assert_eq!(e.diagnostics.len(), 1);
        assert_eq!(e.diagnostics[0].kind, DiagnosticKind::Hygiene);
    }

    #[test]
    fn ordinary_text_is_queued() {
        let mut e = entry("打开文件 ");
        screen_entry(&mut e);
        assert_eq!(e.state(), EntryState::QueuedForModel);
        assert_eq!(e.diagnostics_of(DiagnosticKind::Hygiene).count(), 1);
    }
}
