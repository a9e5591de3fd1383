use std::cmp::Ordering;

use crate::ir::{DiagnosticKind, Entry, EntryState};
use crate::normalize::post_process;
use crate::placeholders::extract_placeholders;
use crate::quality::validate_final;

use super::{has_failure, TranslatorPipeline};

impl TranslatorPipeline {
    /// Post-processing and the final structural check.
    pub(super) fn finish_entry(&self, e: &mut Entry) {
        if e.state() == EntryState::Finalized {
            return;
        }
        if !e.translation.is_empty() {
            let post = post_process(&e.source, &e.translation);
            e.translation = post.text;
            for note in post.notes {
                e.push(DiagnosticKind::PostProcess, note);
            }
        }
        e.advance(EntryState::PostProcessed);

        // A failed call already explains the empty text.
        if !has_failure(e) {
            let placeholders = extract_placeholders(&e.source);
            for issue in validate_final(&e.source, &e.translation, &placeholders, &self.cfg.markers) {
                e.push(DiagnosticKind::Validation, issue);
            }
        }
        e.advance(EntryState::Validated);
        e.advance(EntryState::Finalized);
    }
}

/// Entries with notes first, then by notes, source text and comment (code-point order).
pub fn sort_entries(entries: &mut [Entry]) {
    let keys: Vec<(bool, String)> = entries
        .iter()
        .map(|e| {
            let notes = e.notes();
            (notes.trim().is_empty(), notes)
        })
        .collect();
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&entries[a], &entries[b]);
        keys[a]
            .0
            .cmp(&keys[b].0)
            .then_with(|| keys[a].1.cmp(&keys[b].1))
            .then_with(|| ea.source.cmp(&eb.source))
            .then_with(|| cmp_comment(ea, eb))
    });
    let sorted: Vec<Entry> = order.into_iter().map(|i| entries[i].clone()).collect();
    for (slot, e) in entries.iter_mut().zip(sorted) {
        *slot = e;
    }
}

fn cmp_comment(a: &Entry, b: &Entry) -> Ordering {
    a.comment
        .as_deref()
        .unwrap_or_default()
        .cmp(b.comment.as_deref().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(id: &str, source: &str, comment: Option<&str>) -> Entry {
        Entry::new(
            id.into(),
            0,
            source.into(),
            comment.map(str::to_string),
            HashMap::new(),
        )
    }

    #[test]
    fn sort_puts_noted_entries_first() {
        let mut entries = vec![
            entry("a", "b", None),
            entry("b", "a", Some("z")),
            entry("c", "a", Some("y")),
            entry("d", "z", None),
        ];
        entries[3].push(DiagnosticKind::Hygiene, "x");
        sort_entries(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);
    }
}
