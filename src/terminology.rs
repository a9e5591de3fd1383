use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::xlsx::Workbook;

pub const ABBREVIATION_SECTION: &str = "翻译简写说明";
pub const FULL_SECTION: &str = "注意要点_中英";
pub const PSEUDO_CODE_SECTION: &str = "伪代码术语详细说明";

const PSEUDO_CODE_FLAG: &str = "是";

static PSEUDO_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-\s+\*\*([^*]+)\*\*:\s+(.+?)(?:\s+-\s+(.+))?$").expect("pseudo item regex")
});
static TABLE_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|?\s*:?-{3,}").expect("table separator regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub chinese: String,
    pub english: String,
    pub note: Option<String>,
}

/// A phrase whose rendering is mandatory, not a suggestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PseudoCodeRule {
    pub chinese: String,
    pub english: String,
    pub note: Option<String>,
    /// Item line plus any continuation lines, as written in the rule document.
    pub raw_markdown: String,
}

/// Read-only term tables shared by every entry of a run.
#[derive(Clone, Debug, Default)]
pub struct Glossary {
    pub abbreviations: Vec<Term>,
    pub full_translations: Vec<Term>,
    pub pseudo_code: Vec<PseudoCodeRule>,
}

fn upsert(terms: &mut Vec<Term>, term: Term) {
    match terms.iter_mut().find(|t| t.chinese == term.chinese) {
        Some(existing) => *existing = term,
        None => terms.push(term),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl Glossary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.abbreviations.is_empty()
            && self.full_translations.is_empty()
            && self.pseudo_code.is_empty()
    }

    pub fn add_abbreviation(&mut self, chinese: &str, english: &str) {
        if let (Some(chinese), Some(english)) = (non_empty(chinese), non_empty(english)) {
            upsert(
                &mut self.abbreviations,
                Term {
                    chinese,
                    english,
                    note: None,
                },
            );
        }
    }

    pub fn add_full(&mut self, chinese: &str, english: &str, note: &str) {
        if let (Some(chinese), Some(english)) = (non_empty(chinese), non_empty(english)) {
            upsert(
                &mut self.full_translations,
                Term {
                    chinese,
                    english,
                    note: non_empty(note),
                },
            );
        }
    }

    pub fn add_pseudo_code(&mut self, chinese: &str, english: &str, note: &str) {
        let (Some(chinese), Some(english)) = (non_empty(chinese), non_empty(english)) else {
            return;
        };
        let note = non_empty(note);
        let mut raw_markdown = format!("- **{chinese}**: {english}");
        if let Some(n) = note.as_deref() {
            raw_markdown.push_str(&format!(" - {}", n.replace('\n', "<br>")));
        }
        self.pseudo_code.retain(|r| r.chinese != chinese);
        self.pseudo_code.push(PseudoCodeRule {
            chinese,
            english,
            note,
            raw_markdown,
        });
    }

    /// Terms whose Chinese phrase occurs in `text`. Abbreviation hits shadow full-tier hits
    /// for the same phrase.
    pub fn related_terms(&self, text: &str) -> Vec<&Term> {
        let mut out: Vec<&Term> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for t in &self.abbreviations {
            if text.contains(t.chinese.as_str()) && seen.insert(t.chinese.as_str()) {
                out.push(t);
            }
        }
        for t in &self.full_translations {
            if text.contains(t.chinese.as_str()) && seen.insert(t.chinese.as_str()) {
                out.push(t);
            }
        }
        out
    }

    pub fn pseudo_rules_in(&self, text: &str) -> Vec<&PseudoCodeRule> {
        self.pseudo_code
            .iter()
            .filter(|r| text.contains(r.chinese.as_str()))
            .collect()
    }

    /// Rule document in the layout [`parse_rules_markdown`] reads back.
    #[must_use]
    pub fn render_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Translation rules\n\n");
        md.push_str("Priority: abbreviation tier first, full translation tier second.\n\n");

        md.push_str(&format!("## {ABBREVIATION_SECTION}\n\n"));
        md.push_str("| 中文 | 英文缩写 |\n| --- | --- |\n");
        for t in &self.abbreviations {
            md.push_str(&format!("| {} | {} |\n", escape_cell(&t.chinese), escape_cell(&t.english)));
        }

        md.push_str(&format!("\n## {FULL_SECTION}\n\n"));
        md.push_str("| 中文 | 英文 | 备注 |\n| --- | --- | --- |\n");
        for t in &self.full_translations {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                escape_cell(&t.chinese),
                escape_cell(&t.english),
                escape_cell(t.note.as_deref().unwrap_or(""))
            ));
        }

        if !self.pseudo_code.is_empty() {
            md.push_str(&format!("\n### {PSEUDO_CODE_SECTION}\n\n"));
            for r in &self.pseudo_code {
                md.push_str(&r.raw_markdown);
                md.push('\n');
            }
        }
        md
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', "<br>")
}

fn unescape_cell(s: &str) -> String {
    s.trim().replace("\\|", "|").replace("<br>", "\n")
}

/// Splits `| a | b\|c |` into `["a", "b|c"]`.
fn split_table_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut cells: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                cur.push_str("\\|");
                chars.next();
            }
            '|' => cells.push(unescape_cell(&std::mem::take(&mut cur))),
            _ => cur.push(ch),
        }
    }
    cells.push(unescape_cell(&cur));
    cells
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Data rows of the first table under a heading that mentions `section`.
fn table_rows(markdown: &str, section: &str) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut in_section = false;
    let mut header_seen = false;
    for line in markdown.lines() {
        if is_heading(line) {
            if in_section {
                break;
            }
            in_section = line.contains(section);
            continue;
        }
        if !in_section {
            continue;
        }
        let t = line.trim();
        if !t.starts_with('|') {
            if header_seen && !t.is_empty() {
                break;
            }
            continue;
        }
        if TABLE_SEPARATOR_RE.is_match(t) {
            continue;
        }
        if !header_seen {
            header_seen = true;
            continue;
        }
        rows.push(split_table_row(t));
    }
    rows
}

fn pseudo_code_rules(markdown: &str) -> Vec<PseudoCodeRule> {
    let mut rules: Vec<PseudoCodeRule> = Vec::new();
    let mut in_section = false;
    for line in markdown.lines() {
        if is_heading(line) {
            if in_section {
                break;
            }
            in_section = line.contains(PSEUDO_CODE_SECTION);
            continue;
        }
        if !in_section || line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = PSEUDO_ITEM_RE.captures(line.trim_end()) {
            rules.push(PseudoCodeRule {
                chinese: caps[1].trim().to_string(),
                english: caps[2].trim().to_string(),
                note: caps.get(3).and_then(|m| non_empty(m.as_str())),
                raw_markdown: line.trim_end().to_string(),
            });
        } else if let Some(last) = rules.last_mut() {
            last.raw_markdown.push('\n');
            last.raw_markdown.push_str(line.trim_end());
        }
    }
    rules
}

pub fn parse_rules_markdown(markdown: &str) -> Glossary {
    let mut g = Glossary::default();
    for row in table_rows(markdown, ABBREVIATION_SECTION) {
        if row.len() >= 2 {
            g.add_abbreviation(&row[0], &row[1]);
        }
    }
    for row in table_rows(markdown, FULL_SECTION) {
        if row.len() >= 2 {
            g.add_full(&row[0], &row[1], row.get(2).map(String::as_str).unwrap_or(""));
        }
    }
    g.pseudo_code = pseudo_code_rules(markdown);
    g
}

/// Source of the run's glossary. Loaded once, read-only afterwards.
pub trait GlossaryStore {
    fn load(&self) -> anyhow::Result<Glossary>;
}

pub struct MarkdownRuleStore {
    path: PathBuf,
}

impl MarkdownRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GlossaryStore for MarkdownRuleStore {
    fn load(&self) -> anyhow::Result<Glossary> {
        if !self.path.exists() {
            return Err(anyhow!("rule document not found: {}", self.path.display()));
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read rule document: {}", self.path.display()))?;
        Ok(parse_rules_markdown(&text))
    }
}

/// Glossary workbook with a `翻译简写说明` sheet and a `注意要点_中英` sheet.
pub struct WorkbookGlossaryStore {
    path: PathBuf,
}

impl WorkbookGlossaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn column_of(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h.trim() == name)
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("")
}

impl GlossaryStore for WorkbookGlossaryStore {
    fn load(&self) -> anyhow::Result<Glossary> {
        let wb = Workbook::open(&self.path)?;
        let mut g = Glossary::default();

        let abbr_sheet = wb
            .find_sheet(ABBREVIATION_SECTION)
            .ok_or_else(|| anyhow!("glossary workbook has no {ABBREVIATION_SECTION} sheet"))?;
        let rows = wb.rows(abbr_sheet)?;
        if let Some((header, data)) = rows.split_first() {
            let zh = column_of(header, "中文").or(Some(1));
            let en = column_of(header, "英文缩写").or(Some(3));
            for row in data {
                g.add_abbreviation(cell(row, zh), cell(row, en));
            }
        }

        let full_sheet = wb
            .find_sheet(FULL_SECTION)
            .ok_or_else(|| anyhow!("glossary workbook has no {FULL_SECTION} sheet"))?;
        let rows = wb.rows(full_sheet)?;
        if let Some((header, data)) = rows.split_first() {
            let zh = column_of(header, "中文").or(Some(0));
            let en = column_of(header, "英文").or(Some(1));
            let note = column_of(header, "备注").or(Some(2));
            let pseudo = column_of(header, "伪代码术语");
            for row in data {
                let (c, e, n) = (cell(row, zh), cell(row, en), cell(row, note));
                g.add_full(c, e, n);
                if cell(row, pseudo) == PSEUDO_CODE_FLAG {
                    g.add_pseudo_code(c, e, n);
                }
            }
        }
        Ok(g)
    }
}

/// Regenerates the rule document from a glossary workbook.
pub fn extract_rules_from_workbook(workbook: &Path, rules_out: &Path) -> anyhow::Result<Glossary> {
    let glossary = WorkbookGlossaryStore::new(workbook).load()?;
    if let Some(parent) = rules_out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create rules dir: {}", parent.display()))?;
    }
    std::fs::write(rules_out, glossary.render_markdown())
        .with_context(|| format!("write rule document: {}", rules_out.display()))?;
    Ok(glossary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"# Rules

- 优先使用"翻译简写说明"中的英文缩写

## 翻译简写说明

| 中文 | 英文缩写 |
| --- | --- |
| 最大值 | Max |
| 管道\|符号 | Pipe |

### 注意要点_中英（备用）

| 中文 | 英文 | 备注 |
|------|------|------|
| 最大值 | Maximum | |
| 文件 | File | 名词 |

### 伪代码术语详细说明

- **如果**: IF - 大写
  用于条件分支
- **否则**: ELSE

## 翻译规则
- **无关**: nothing
"#;

    #[test]
    fn parses_both_tiers_and_pseudo_code() {
        let g = parse_rules_markdown(DOC);
        assert_eq!(g.abbreviations.len(), 2);
        assert_eq!(g.abbreviations[1].chinese, "管道|符号");
        assert_eq!(g.full_translations.len(), 2);
        assert_eq!(g.full_translations[1].note.as_deref(), Some("名词"));
        assert_eq!(g.pseudo_code.len(), 2);
        assert_eq!(g.pseudo_code[0].english, "IF");
        assert_eq!(g.pseudo_code[0].note.as_deref(), Some("大写"));
        assert!(g.pseudo_code[0].raw_markdown.contains("用于条件分支"));
        assert_eq!(g.pseudo_code[1].note, None);
    }

    #[test]
    fn abbreviation_shadows_full_tier() {
        let g = parse_rules_markdown(DOC);
        let hits: Vec<(&str, &str)> = g
            .related_terms("最大值文件")
            .into_iter()
            .map(|t| (t.chinese.as_str(), t.english.as_str()))
            .collect();
        assert_eq!(hits, vec![("最大值", "Max"), ("文件", "File")]);
        assert_eq!(g.pseudo_rules_in("如果成功").len(), 1);
    }

    #[test]
    fn rendered_markdown_reads_back() {
        let g = parse_rules_markdown(DOC);
        let back = parse_rules_markdown(&g.render_markdown());
        assert_eq!(back.abbreviations, g.abbreviations);
        assert_eq!(back.full_translations, g.full_translations);
        assert_eq!(back.pseudo_code.len(), 2);
    }

    #[test]
    fn workbook_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let book = dir.path().join("glossary.xlsx");
        crate::table::xlsx::fixtures::write_workbook(
            &book,
            &[
                (
                    "翻译简写说明",
                    vec![vec!["中文", "英文缩写"], vec!["最小值", "Min"]],
                ),
                (
                    "注意要点_中英",
                    vec![
                        vec!["中文", "英文", "备注", "伪代码术语"],
                        vec!["循环", "LOOP", "", "是"],
                        vec!["窗口", "Window", "", ""],
                    ],
                ),
            ],
        );
        let out = dir.path().join("glossary").join("rules.md");
        let g = extract_rules_from_workbook(&book, &out).expect("extract");
        assert_eq!(g.abbreviations[0].english, "Min");
        assert_eq!(g.full_translations.len(), 2);
        assert_eq!(g.pseudo_code.len(), 1);

        let loaded = MarkdownRuleStore::new(&out).load().expect("load");
        assert_eq!(loaded.pseudo_code[0].chinese, "循环");
        assert_eq!(loaded.abbreviations, g.abbreviations);
    }

    #[test]
    fn missing_rule_document_is_an_error() {
        assert!(MarkdownRuleStore::new("/no/such/rules.md").load().is_err());
    }
}
