use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;

use crate::ir::{DiagnosticKind, Entry};
use crate::progress::ConsoleProgress;
use crate::providers::{build_chain, ProviderChain};
use crate::report::ErrorLog;
use crate::scenario::ScenarioBook;
use crate::table::csv::{write_rows, RetryPolicy};
use crate::table::{read_table, Table};
use crate::terminology::{
    extract_rules_from_workbook, Glossary, GlossaryStore, MarkdownRuleStore,
};

use super::prompts::{build_batch_prompt, BatchItem, PromptContext, BATCH};
use super::trace::PromptTrace;
use super::PipelineConfig;

mod batching;
mod finish;

pub use finish::sort_entries;

/// What a run did, for the closing report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entries: usize,
    pub model_translated: usize,
    pub forced: usize,
    pub skipped_empty: usize,
    pub with_issues: usize,
    pub output: PathBuf,
    pub error_log: Option<PathBuf>,
    pub prompt_debug: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RunCounts {
    pub(crate) model: usize,
    pub(crate) forced: usize,
    pub(crate) skipped: usize,
}

pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    glossary: Glossary,
    scenarios: Option<ScenarioBook>,
    batch_chain: ProviderChain,
    retry_chain: ProviderChain,
}

impl TranslatorPipeline {
    pub fn new(
        cfg: PipelineConfig,
        progress: ConsoleProgress,
        glossary: Glossary,
        batch_chain: ProviderChain,
        retry_chain: ProviderChain,
    ) -> Self {
        Self {
            cfg,
            progress,
            glossary,
            scenarios: None,
            batch_chain,
            retry_chain,
        }
    }

    /// Loads the glossary and builds both provider chains from the resolved config.
    pub fn from_config(cfg: PipelineConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        let glossary = load_glossary(&cfg, &progress)?;
        let batch_chain = build_chain(cfg.batch_providers.clone()).context("build providers")?;
        let retry_chain =
            build_chain(cfg.retry_providers.clone()).context("build retry providers")?;
        if batch_chain.is_empty() {
            progress.warn("no translation provider enabled; entries will be reported as failures");
        } else {
            progress.info(format!("Providers: {}", batch_chain.names().join(" -> ")));
        }
        Ok(Self::new(cfg, progress, glossary, batch_chain, retry_chain))
    }

    pub fn translate_table(&mut self) -> anyhow::Result<RunSummary> {
        let input = self.cfg.input.clone();
        self.progress.info(format!("Read table: {}", input.display()));
        let table = read_table(&input)?;
        let entry_col = &self.cfg.columns.entry;
        if !table.has_column(entry_col) {
            bail!("input has no '{entry_col}' column: {}", input.display());
        }
        if table.is_empty() {
            bail!("input has no entries: {}", input.display());
        }
        self.ensure_scenarios(&table)?;

        let mut entries = self.entries_from_table(&table);
        self.progress
            .info(format!("Entries: {} (batch size {})", entries.len(), self.cfg.batch_size));

        let mut trace = PromptTrace::new(self.cfg.prompt_debug_path(), self.cfg.debug_prompt);
        let counts = self.translate_entries(&mut entries, &mut trace)?;
        if trace.is_enabled() {
            self.record_manual_prompt(&entries, &mut trace)?;
        }
        if self.cfg.sort {
            sort_entries(&mut entries);
        }

        let output = self.write_output(&table, &entries)?;
        let title = input
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let log = ErrorLog::from_entries(&title, &entries);
        let error_log = if log.is_empty() {
            None
        } else {
            let path = self.cfg.error_log_path();
            log.write(&path)?;
            Some(path)
        };
        let prompt_debug = trace.finish(&title)?;

        let summary = RunSummary {
            entries: entries.len(),
            model_translated: counts.model,
            forced: counts.forced,
            skipped_empty: counts.skipped,
            with_issues: entries
                .iter()
                .filter(|e| e.diagnostics.iter().any(|d| d.kind.is_logged()))
                .count(),
            output,
            error_log,
            prompt_debug,
        };
        info!(
            entries = summary.entries,
            model = summary.model_translated,
            forced = summary.forced,
            issues = summary.with_issues,
            "run finished"
        );
        Ok(summary)
    }

    fn ensure_scenarios(&mut self, table: &Table) -> anyhow::Result<()> {
        if self.scenarios.is_some() || !table.has_column(&self.cfg.columns.comment) {
            return Ok(());
        }
        let Some(path) = self.cfg.scenario_path.clone() else {
            return Ok(());
        };
        if !self.cfg.scenario_required && !path.exists() {
            return Ok(());
        }
        let book = ScenarioBook::load(&path)?;
        self.progress
            .info(format!("Scenario rules: {} ({} keys)", path.display(), book.len()));
        self.scenarios = Some(book);
        Ok(())
    }

    fn entries_from_table(&self, table: &Table) -> Vec<Entry> {
        let cols = &self.cfg.columns;
        let non_blank = |v: Option<&String>| {
            v.map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        table
            .records
            .iter()
            .enumerate()
            .map(|(row, rec)| {
                let source = rec.get(&cols.entry).cloned().unwrap_or_default();
                let id = non_blank(rec.get(&cols.id)).unwrap_or_else(|| format!("row_{}", row + 1));
                let comment = non_blank(rec.get(&cols.comment));
                Entry::new(id, row, source, comment, rec.clone())
            })
            .collect()
    }

    fn prompt_context(&self) -> PromptContext<'_> {
        PromptContext {
            glossary: &self.glossary,
            markers: &self.cfg.markers,
        }
    }

    fn scenario_blocks(&self, entry: &Entry) -> Option<String> {
        self.scenarios.as_ref()?.blocks_for(entry.comment.as_deref()?)
    }

    fn scenario_section(&self, entry: &Entry) -> Option<String> {
        self.scenarios.as_ref()?.section_for(entry.comment.as_deref()?)
    }

    /// One unprotected prompt over every non-empty source, for translating by hand.
    fn record_manual_prompt(&self, entries: &[Entry], trace: &mut PromptTrace) -> anyhow::Result<()> {
        let live: Vec<&Entry> = entries.iter().filter(|e| !e.source.trim().is_empty()).collect();
        if live.is_empty() {
            return Ok(());
        }
        let template = self.cfg.prompts.template(BATCH)?;
        let blocks: Vec<Option<String>> = live.iter().map(|e| self.scenario_blocks(e)).collect();
        let items: Vec<BatchItem<'_>> = live
            .iter()
            .zip(&blocks)
            .map(|(e, b)| BatchItem {
                text: &e.source,
                scenario: b.as_deref(),
            })
            .collect();
        trace.record_manual(&build_batch_prompt(&template, &self.prompt_context(), &items));
        Ok(())
    }

    fn write_output(&self, table: &Table, entries: &[Entry]) -> anyhow::Result<PathBuf> {
        let cols = &self.cfg.columns;
        let mut headers = table.headers.clone();
        for c in [&cols.translation, &cols.notes] {
            if !headers.contains(c) {
                headers.push(c.clone());
            }
        }
        let rows: Vec<Vec<String>> = entries
            .iter()
            .map(|e| {
                headers
                    .iter()
                    .map(|h| {
                        if h == &cols.translation {
                            e.translation.clone()
                        } else if h == &cols.notes {
                            e.notes()
                        } else {
                            e.fields.get(h).cloned().unwrap_or_default()
                        }
                    })
                    .collect()
            })
            .collect();

        std::fs::create_dir_all(&self.cfg.output_dir)
            .with_context(|| format!("create output dir: {}", self.cfg.output_dir.display()))?;
        let target = self.cfg.output_path();
        let written = write_rows(&target, &headers, &rows, RetryPolicy::default())?;
        if written != target {
            self.progress.warn(format!(
                "{} is locked; wrote {} instead",
                target.display(),
                written.display()
            ));
        }
        self.progress.info(format!("Wrote: {}", written.display()));
        Ok(written)
    }
}

/// Regenerates the rule document from the glossary workbook when one is configured, then
/// loads the rule document.
pub fn load_glossary(cfg: &PipelineConfig, progress: &ConsoleProgress) -> anyhow::Result<Glossary> {
    if let Some(workbook) = cfg.glossary_workbook.as_ref() {
        if !workbook.exists() {
            bail!("glossary workbook not found: {}", workbook.display());
        }
        progress.info(format!(
            "Extract rules: {} -> {}",
            workbook.display(),
            cfg.rules_path.display()
        ));
        extract_rules_from_workbook(workbook, &cfg.rules_path)?;
    }
    let glossary = MarkdownRuleStore::new(&cfg.rules_path).load()?;
    progress.info(format!(
        "Glossary: {} abbreviations, {} full terms, {} pseudo-code terms",
        glossary.abbreviations.len(),
        glossary.full_translations.len(),
        glossary.pseudo_code.len()
    ));
    Ok(glossary)
}

pub(crate) fn has_failure(entry: &Entry) -> bool {
    entry.has(DiagnosticKind::TranslationFailure)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::providers::fakes::ScriptedProvider;
    use crate::providers::TranslationProvider;
    use crate::table::csv::read_rows;

    fn dynamic(p: &Arc<ScriptedProvider>) -> Arc<dyn TranslationProvider> {
        p.clone()
    }

    fn chain(p: &Arc<ScriptedProvider>) -> ProviderChain {
        ProviderChain::new(vec![dynamic(p)])
    }

    fn pipeline(
        dir: &std::path::Path,
        csv: &str,
        batch: ProviderChain,
        retry: ProviderChain,
    ) -> TranslatorPipeline {
        let input = dir.join("entries.csv");
        std::fs::write(&input, csv).expect("write input");
        let out = dir.join("out");
        let cfg = PipelineConfig::with_defaults(&input, &out);
        TranslatorPipeline::new(cfg, ConsoleProgress::quiet(), Glossary::default(), batch, retry)
    }

    fn output_column(path: &std::path::Path, column: &str) -> Vec<String> {
        let (headers, rows) = read_rows(path).expect("read output");
        let idx = headers
            .iter()
            .position(|h| h == column)
            .expect("column present");
        rows.into_iter().map(|r| r[idx].clone()).collect()
    }

    #[test]
    fn end_to_end_restores_placeholders_and_bypasses_units() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new(
            "fake",
            vec![Ok(
                "1. Total ⟦__PH_CURLY_0__⟧ files, using ⟦__PH_CURLY_1__⟧MB\n2. Save",
            )],
        ));
        let csv = "id,词条,comment\n1,提示：共{}个文件，占用{:.3f}MB,\n2,单位：M,\n3,,x\n4, 保存,\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), ProviderChain::default());
        let summary = p.translate_table().expect("run");

        assert_eq!(summary.entries, 4);
        assert_eq!(summary.model_translated, 2);
        assert_eq!(summary.forced, 1);
        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.with_issues, 1);

        let prompts = batch.seen_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("1. 提示：共⟦__PH_CURLY_0__⟧个文件，占用⟦__PH_CURLY_1__⟧MB"));
        assert!(prompts[0].contains("2.  保存"));
        assert!(!prompts[0].contains("单位"));

        let translations = output_column(&summary.output, "英文翻译");
        assert_eq!(
            translations,
            vec!["Total {} files, using {:.3f}MB", "unit: M", "", "Save"]
        );
        let notes = output_column(&summary.output, "备注1");
        assert_eq!(notes[0], "");
        assert_eq!(notes[1], "");
        assert_eq!(notes[2], "");
        assert!(notes[3].starts_with("[hygiene]"));

        let log = std::fs::read_to_string(summary.error_log.expect("error log")).expect("read log");
        assert!(log.contains("== Hygiene issues (1) =="));
        assert!(summary.prompt_debug.is_none());
    }

    #[test]
    fn batch_failure_keeps_every_entry_and_forced_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new("fake", vec![Err("timeout")]));
        let csv = "词条\n打开\n单位：兆\n关闭\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), ProviderChain::default());
        let summary = p.translate_table().expect("run continues");

        let translations = output_column(&summary.output, "英文翻译");
        assert_eq!(translations, vec!["", "unit: 兆", ""]);
        let notes = output_column(&summary.output, "备注1");
        assert!(notes[0].contains("[translation failure]"));
        assert!(notes[0].contains("timeout"));
        assert!(!notes[0].contains("translation is empty"));
        assert_eq!(notes[1], "");

        let log = std::fs::read_to_string(summary.error_log.expect("error log")).expect("read log");
        assert!(log.contains("== Translation failures (2) =="));
    }

    #[test]
    fn strict_retry_rescues_reordered_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new(
            "fake",
            vec![Ok("1. ⟦__PH_CURLY_1__⟧ of ⟦__PH_CURLY_0__⟧")],
        ));
        let retry = Arc::new(ScriptedProvider::new(
            "strict",
            vec![Ok("⟦__PH_CURLY_0__⟧ of ⟦__PH_CURLY_1__⟧")],
        ));
        let csv = "词条\n第{}页，共{}页\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), chain(&retry));
        let summary = p.translate_table().expect("run");

        assert_eq!(output_column(&summary.output, "英文翻译"), vec!["{} of {}"]);
        assert_eq!(output_column(&summary.output, "备注1"), vec![""]);
        assert!(retry.seen_prompts()[0].contains("Previous attempt rejected"));
        assert!(summary.error_log.is_none());
    }

    #[test]
    fn failed_retry_keeps_batch_output_with_one_order_issue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new(
            "fake",
            vec![Ok("1. ⟦__PH_CURLY_1__⟧ of ⟦__PH_CURLY_0__⟧")],
        ));
        let retry = Arc::new(ScriptedProvider::new("strict", vec![Err("rate limited")]));
        let csv = "词条\n第{}页，共{}页\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), chain(&retry));
        let summary = p.translate_table().expect("run");

        assert_eq!(output_column(&summary.output, "英文翻译"), vec!["{} of {}"]);
        let notes = output_column(&summary.output, "备注1");
        assert_eq!(notes[0], "[validation] placeholder order changed");
    }

    #[test]
    fn failed_call_on_protected_entry_is_logged_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new("fake", vec![Err("timeout")]));
        let retry = Arc::new(ScriptedProvider::new("strict", vec![Err("rate limited")]));
        let csv = "词条\n第{}页，共{}页\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), chain(&retry));
        let summary = p.translate_table().expect("run");

        let notes = output_column(&summary.output, "备注1");
        assert!(notes[0].starts_with("[translation failure]"));
        assert!(!notes[0].contains("lost or rewritten"));
        let log = std::fs::read_to_string(summary.error_log.expect("error log")).expect("read log");
        assert!(log.contains("== Translation failures (1) =="));
        assert!(!log.contains("Validation failures ("));
    }

    #[test]
    fn short_batch_response_flags_padded_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new("fake", vec![Ok("1. Open\n2. Close")]));
        let csv = "词条\n打开\n关闭\n退出\n";
        let mut p = pipeline(dir.path(), csv, chain(&batch), ProviderChain::default());
        let summary = p.translate_table().expect("run");

        assert_eq!(
            output_column(&summary.output, "英文翻译"),
            vec!["Open", "Close", ""]
        );
        let notes = output_column(&summary.output, "备注1");
        assert_eq!(notes[0], "");
        assert!(notes[2].contains("2 of 3"));
    }

    #[test]
    fn setup_failures_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut p = pipeline(dir.path(), "name\nx\n", ProviderChain::default(), ProviderChain::default());
        assert!(p.translate_table().is_err());

        let mut p = pipeline(dir.path(), "词条\n", ProviderChain::default(), ProviderChain::default());
        assert!(p.translate_table().is_err());
    }

    #[test]
    fn debug_capture_and_batching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = Arc::new(ScriptedProvider::new(
            "fake",
            vec![Ok("1. Open\n2. Close"), Ok("1. Exit")],
        ));
        let input = dir.path().join("menu.csv");
        std::fs::write(&input, "词条\n打开\n关闭\n退出\n").expect("write");
        let mut cfg = PipelineConfig::with_defaults(&input, dir.path());
        cfg.batch_size = 2;
        cfg.debug_prompt = true;
        let mut p = TranslatorPipeline::new(
            cfg,
            ConsoleProgress::quiet(),
            Glossary::default(),
            chain(&batch),
            ProviderChain::default(),
        );
        let summary = p.translate_table().expect("run");

        assert_eq!(batch.seen_prompts().len(), 2);
        assert_eq!(summary.output, dir.path().join("menu_translated.csv"));
        let debug = std::fs::read_to_string(summary.prompt_debug.expect("debug file")).expect("read");
        assert!(debug.contains("## Batch 2 (entries 3-3)"));
        assert!(debug.contains("## Manual translation prompt"));
        assert!(debug.contains("3. 退出"));
    }
}
