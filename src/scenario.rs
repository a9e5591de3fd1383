use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::{self, xlsx::Workbook, TableFormat};

static COMMENT_KEY_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;,，\n]+").expect("comment key split regex"));

const COL_COMMENT: &str = "comment";
const COL_SOURCE: &str = "词条来源";
const COL_SCENE: &str = "场景";
const COL_TIPS: &str = "翻译补充要点";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioRule {
    pub comment: String,
    pub source: String,
    pub scene: String,
    pub tips: String,
}

impl ScenarioRule {
    fn render(&self) -> String {
        let mut parts = vec![format!("- **comment**: `{}`", self.comment)];
        if !self.source.is_empty() {
            parts.push(format!("  - **source**: {}", self.source));
        }
        if !self.scene.is_empty() {
            parts.push(format!("  - **scenario**:\n\n```\n{}\n```", self.scene));
        }
        if !self.tips.is_empty() {
            parts.push(format!("  - **translation notes**:\n{}", self.tips));
        }
        parts.join("\n")
    }
}

/// Scenario rules keyed by comment tag.
#[derive(Clone, Debug, Default)]
pub struct ScenarioBook {
    rules: HashMap<String, ScenarioRule>,
}

impl ScenarioBook {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ScenarioRule> {
        self.rules.get(key)
    }

    /// Header row must carry a `comment` column; the other columns are optional.
    pub fn from_rows(rows: &[Vec<String>]) -> anyhow::Result<Self> {
        let Some((header, data)) = rows.split_first() else {
            return Ok(Self::default());
        };
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let comment = find(COL_COMMENT)
            .ok_or_else(|| anyhow!("scenario rule table has no '{COL_COMMENT}' column"))?;
        let (source, scene, tips) = (find(COL_SOURCE), find(COL_SCENE), find(COL_TIPS));
        let get = |row: &[String], idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let mut rules: HashMap<String, ScenarioRule> = HashMap::new();
        for row in data {
            let row = row.as_slice();
            let key = get(row, Some(comment));
            if key.is_empty() {
                continue;
            }
            rules.insert(
                key.clone(),
                ScenarioRule {
                    comment: key,
                    source: get(row, source),
                    scene: get(row, scene),
                    tips: get(row, tips),
                },
            );
        }
        Ok(Self { rules })
    }

    /// Spreadsheet (sheet named like `comment`, else the first) or delimited text.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(anyhow!("scenario rule file not found: {}", path.display()));
        }
        let rows = match TableFormat::detect(path)? {
            TableFormat::Spreadsheet => {
                let wb = Workbook::open(path)?;
                let sheet = wb
                    .sheet_names()
                    .into_iter()
                    .find(|n| n.to_lowercase().contains(COL_COMMENT))
                    .map(str::to_string);
                match sheet {
                    Some(name) => wb.rows(&name)?,
                    None => wb.first_sheet_rows()?,
                }
            }
            TableFormat::Delimited => {
                let (headers, mut rows) = table::csv::read_rows(path)?;
                rows.insert(0, headers);
                rows
            }
        };
        Self::from_rows(&rows).with_context(|| format!("load scenario rules: {}", path.display()))
    }

    /// Rule blocks for every key named by a comment value, without a heading.
    pub fn blocks_for(&self, comment_value: &str) -> Option<String> {
        let keys = parse_comment_keys(comment_value);
        if keys.is_empty() {
            return None;
        }
        let blocks: Vec<String> = keys
            .iter()
            .map(|k| match self.rules.get(k) {
                Some(rule) => rule.render(),
                None => format!("- **comment**: `{k}` (not found in rule table)"),
            })
            .collect();
        Some(blocks.join("\n\n"))
    }

    /// Markdown section for one entry's comment value, or `None` when it names no key.
    pub fn section_for(&self, comment_value: &str) -> Option<String> {
        self.blocks_for(comment_value)
            .map(|blocks| format!("## Scenario rules (comment)\n\n{blocks}\n"))
    }
}

/// Splits a comment cell into distinct keys, keeping first-seen order.
pub fn parse_comment_keys(value: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    COMMENT_KEY_SPLIT_RE
        .split(value.trim())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert((*k).to_string()))
        .map(str::to_string)
        .collect()
}
