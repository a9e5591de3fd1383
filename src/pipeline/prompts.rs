use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::PromptsSection;
use crate::sentinels::TokenMarkers;
use crate::terminology::Glossary;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const SINGLE: &str = "single";
pub const BATCH: &str = "batch";

pub const DEFAULT_SINGLE_FILE: &str = "prompt-single.md";
pub const DEFAULT_BATCH_FILE: &str = "prompt-batch.md";

static TEMPLATE_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Z0-9_]+)\}\}").expect("template var regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));

/// Templates by name, read from disk on first use and cached for the rest of the run.
#[derive(Debug, Default)]
pub struct PromptCatalog {
    paths: HashMap<String, PathBuf>,
    cache: RwLock<HashMap<String, Arc<str>>>,
}

impl PromptCatalog {
    /// Built-in templates only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Paths from `[prompts]`, relative to the config file directory.
    pub fn from_section(config_path: &Path, section: &PromptsSection) -> Self {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let mut catalog = Self::builtin();
        for (name, path) in [(SINGLE, &section.single), (BATCH, &section.batch)] {
            let Some(path) = path.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
                continue;
            };
            let mut p = PathBuf::from(path);
            if p.is_relative() {
                p = config_dir.join(p);
            }
            catalog.paths.insert(name.to_string(), p);
        }
        catalog
    }

    pub fn template(&self, name: &str) -> anyhow::Result<Arc<str>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(t) = cache.get(name) {
                return Ok(t.clone());
            }
        }
        let text: Arc<str> = match self.paths.get(name) {
            Some(p) => {
                if !p.exists() {
                    return Err(anyhow!(
                        "prompt file not found for {name}: {} (run: glossary-translator --init-config)",
                        p.display()
                    ));
                }
                std::fs::read_to_string(p)
                    .with_context(|| format!("read prompt: {}", p.display()))?
                    .into()
            }
            None => builtin_template(name)
                .ok_or_else(|| anyhow!("unknown prompt template: {name}"))?
                .into(),
        };
        // Two threads racing here load the same text; last insert wins.
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), text.clone());
        }
        Ok(text)
    }
}

fn builtin_template(name: &str) -> Option<&'static str> {
    match name {
        SINGLE => Some(DEFAULT_SINGLE_TEXT),
        BATCH => Some(DEFAULT_BATCH_TEXT),
        _ => None,
    }
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_SINGLE_FILE, DEFAULT_SINGLE_TEXT),
        (DEFAULT_BATCH_FILE, DEFAULT_BATCH_TEXT),
    ]
}

/// Substitutes `{{KEY}}` in one pass and drops insertion points with no value.
///
/// Only the template is scanned; inserted values are copied verbatim.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let out = TEMPLATE_VAR_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .unwrap_or_default()
    });
    BLANK_RUN_RE.replace_all(&out, "\n\n").into_owned()
}

/// Shared, read-only inputs for every prompt of a run.
pub struct PromptContext<'a> {
    pub glossary: &'a Glossary,
    pub markers: &'a TokenMarkers,
}

/// One line of a batch prompt.
pub struct BatchItem<'a> {
    /// Possibly protected entry text.
    pub text: &'a str,
    /// Rendered scenario rule blocks, when the entry's comment names any.
    pub scenario: Option<&'a str>,
}

fn related_terms_section<'g>(terms: impl IntoIterator<Item = &'g crate::terminology::Term>) -> String {
    let lines: Vec<String> = terms
        .into_iter()
        .map(|t| format!("- {} → {}", t.chinese, t.english))
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    format!(
        "## Related glossary terms (abbreviations take priority)\n\n{}\n",
        lines.join("\n")
    )
}

fn pseudo_code_section<'g>(
    rules: impl IntoIterator<Item = &'g crate::terminology::PseudoCodeRule>,
) -> String {
    let blocks: Vec<&str> = rules.into_iter().map(|r| r.raw_markdown.as_str()).collect();
    if blocks.is_empty() {
        return String::new();
    }
    format!(
        "## Pseudo-code terms (hard constraint)\n\n\
         The phrases below MUST be rendered exactly as given: no synonyms, no case changes, \
         no added or dropped words.\n\n{}\n",
        blocks.join("\n")
    )
}

const STRICT_SECTION: &str = "## Previous attempt rejected\n\n\
The previous translation moved, merged, dropped or duplicated placeholder tokens. \
Every token must appear exactly once, unchanged, in the same order as in the entry.\n";

/// Prompt for one entry. `strict` adds the rejection notice used by the retry.
pub fn build_single_prompt(
    template: &str,
    ctx: &PromptContext<'_>,
    text: &str,
    scenario: Option<&str>,
    strict: bool,
) -> String {
    let related = related_terms_section(ctx.glossary.related_terms(text));
    let pseudo = pseudo_code_section(ctx.glossary.pseudo_rules_in(text));
    let scenario = scenario.unwrap_or_default();
    let strict = if strict { STRICT_SECTION } else { "" };
    render_template(
        template,
        &[
            ("RELATED_TERMS_SECTION", related.as_str()),
            ("PSEUDOCODE_TERMS_SECTION", pseudo.as_str()),
            ("COMMENT_RULES_SECTION", scenario),
            ("STRICT_SECTION", strict),
            ("TOKEN_OPEN", ctx.markers.open()),
            ("TOKEN_CLOSE", ctx.markers.close()),
            ("ENTRY_TEXT", text),
        ],
    )
}

/// Prompt for a numbered list of entries. Scenario blocks are keyed by entry number and kept
/// out of the list itself.
pub fn build_batch_prompt(template: &str, ctx: &PromptContext<'_>, items: &[BatchItem<'_>]) -> String {
    let mut seen_terms: HashSet<&str> = HashSet::new();
    let mut terms = Vec::new();
    let mut seen_rules: HashSet<&str> = HashSet::new();
    let mut rules = Vec::new();
    for item in items {
        for t in ctx.glossary.related_terms(item.text) {
            if seen_terms.insert(t.chinese.as_str()) {
                terms.push(t);
            }
        }
        for r in ctx.glossary.pseudo_rules_in(item.text) {
            if seen_rules.insert(r.chinese.as_str()) {
                rules.push(r);
            }
        }
    }

    let entry_list = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.text))
        .collect::<Vec<_>>()
        .join("\n");

    let scenario_blocks: Vec<String> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            item.scenario
                .map(|block| format!("### Entry {}\n\n{}", i + 1, block.trim_end()))
        })
        .collect();
    let scenario_section = if scenario_blocks.is_empty() {
        String::new()
    } else {
        format!(
            "## Scenario rules (apply only to the numbered entries named)\n\n{}\n",
            scenario_blocks.join("\n\n")
        )
    };

    let related = related_terms_section(terms);
    let pseudo = pseudo_code_section(rules);
    let count = items.len().to_string();
    render_template(
        template,
        &[
            ("RELATED_TERMS_SECTION", related.as_str()),
            ("PSEUDOCODE_TERMS_SECTION", pseudo.as_str()),
            ("COMMENT_RULES_BATCH_SECTION", scenario_section.as_str()),
            ("TOKEN_OPEN", ctx.markers.open()),
            ("TOKEN_CLOSE", ctx.markers.close()),
            ("ENTRY_COUNT", count.as_str()),
            ("ENTRY_LIST", entry_list.as_str()),
        ],
    )
}

pub const DEFAULT_SINGLE_TEXT: &str = r#"Translate the Chinese software UI entry below into English.

{{STRICT_SECTION}}

{{RELATED_TERMS_SECTION}}

{{PSEUDOCODE_TERMS_SECTION}}

{{COMMENT_RULES_SECTION}}

## Rules
- Output ONLY the English translation: no quotes, no explanations, no numbering.
- Tokens such as {{TOKEN_OPEN}}__PH_CURLY_0__{{TOKEN_CLOSE}} stand for placeholders. Copy every token exactly once, unchanged, in the same order.
- Keep %1, %2 ... unchanged and never put a space after %.
- Keep [ ] tight around placeholders, with no inner spaces.
- Keep leading and trailing spaces of the entry as they are.
- Use the glossary renderings above where they apply.

## Entry
{{ENTRY_TEXT}}
"#;

pub const DEFAULT_BATCH_TEXT: &str = r#"Translate each numbered Chinese software UI entry into English.

{{RELATED_TERMS_SECTION}}

{{PSEUDOCODE_TERMS_SECTION}}

{{COMMENT_RULES_BATCH_SECTION}}

## Rules
- Tokens such as {{TOKEN_OPEN}}__PH_CURLY_0__{{TOKEN_CLOSE}} stand for placeholders. Copy every token exactly once, unchanged, in the same order.
- Keep %1, %2 ... unchanged and never put a space after %.
- Keep [ ] tight around placeholders, with no inner spaces.
- Use the glossary renderings above where they apply.

## Output format
- Exactly {{ENTRY_COUNT}} lines, one per entry, in the same order.
- Each line is "<number>. <translation>" and nothing else: no headings, no blank lines, no commentary.

## Entries
{{ENTRY_LIST}}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> Glossary {
        let mut g = Glossary::default();
        g.add_abbreviation("设置", "Settings");
        g.add_full("设置", "Configuration", "");
        g.add_full("文件", "file", "");
        g.add_pseudo_code("返回值", "Return", "case sensitive");
        g
    }

    #[test]
    fn unresolved_vars_are_removed() {
        let out = render_template("a {{X}} b {{MISSING}} c {{lower}}", &[("X", "1")]);
        assert_eq!(out, "a 1 b  c {{lower}}");
    }

    #[test]
    fn braces_inside_inserted_values_survive() {
        let out = render_template("{{A}} / {{B}}", &[("A", "{{B}}"), ("B", "{{MAX_SIZE}}")]);
        assert_eq!(out, "{{B}} / {{MAX_SIZE}}");

        let g = Glossary::default();
        let markers = TokenMarkers::default();
        let ctx = PromptContext {
            glossary: &g,
            markers: &markers,
        };
        let items = [BatchItem {
            text: "最大{{MAX_SIZE}}个",
            scenario: None,
        }];
        let p = build_batch_prompt(DEFAULT_BATCH_TEXT, &ctx, &items);
        assert!(p.contains("1. 最大{{MAX_SIZE}}个"));
    }

    #[test]
    fn single_prompt_lists_matched_terms() {
        let g = glossary();
        let markers = TokenMarkers::default();
        let ctx = PromptContext {
            glossary: &g,
            markers: &markers,
        };
        let p = build_single_prompt(DEFAULT_SINGLE_TEXT, &ctx, "打开设置文件", None, false);
        assert!(p.contains("- 设置 → Settings"));
        assert!(!p.contains("Configuration"));
        assert!(p.contains("- 文件 → file"));
        assert!(!p.contains("Pseudo-code"));
        assert!(!p.contains("Previous attempt"));
        assert!(!p.contains("{{"));
        assert!(p.contains("⟦__PH_CURLY_0__⟧"));
        assert!(p.trim_end().ends_with("打开设置文件"));

        let strict = build_single_prompt(DEFAULT_SINGLE_TEXT, &ctx, "返回值", Some("## S\n"), true);
        assert!(strict.contains("Previous attempt rejected"));
        assert!(strict.contains("Pseudo-code terms"));
        assert!(strict.contains("## S"));
    }

    #[test]
    fn batch_prompt_numbers_entries_and_keys_scenarios() {
        let g = glossary();
        let markers = TokenMarkers::default();
        let ctx = PromptContext {
            glossary: &g,
            markers: &markers,
        };
        let items = [
            BatchItem {
                text: "设置",
                scenario: None,
            },
            BatchItem {
                text: "保存设置",
                scenario: Some("- **comment**: `menu`\n  - rule body"),
            },
        ];
        let p = build_batch_prompt(DEFAULT_BATCH_TEXT, &ctx, &items);
        assert!(p.contains("1. 设置\n2. 保存设置"));
        assert_eq!(p.matches("- 设置 → Settings").count(), 1);
        assert!(p.contains("### Entry 2"));
        assert!(p.contains("Exactly 2 lines"));
        let list_start = p.find("## Entries").expect("entries heading");
        assert!(!p[list_start..].contains("rule body"));
    }

    #[test]
    fn configured_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let section = PromptsSection {
            single: Some("prompts/nope.md".into()),
            batch: None,
        };
        let catalog = PromptCatalog::from_section(&dir.path().join("cfg.toml"), &section);
        assert!(catalog.template(SINGLE).is_err());
        assert!(catalog.template(BATCH).is_ok());
    }

    #[test]
    fn file_templates_are_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = dir.path().join("single.md");
        std::fs::write(&p, "custom {{ENTRY_TEXT}}").expect("write");
        let section = PromptsSection {
            single: Some(p.display().to_string()),
            batch: None,
        };
        let catalog = PromptCatalog::from_section(&dir.path().join("cfg.toml"), &section);
        assert_eq!(&*catalog.template(SINGLE).expect("load"), "custom {{ENTRY_TEXT}}");
        std::fs::remove_file(&p).expect("remove");
        assert_eq!(&*catalog.template(SINGLE).expect("cached"), "custom {{ENTRY_TEXT}}");
    }
}
