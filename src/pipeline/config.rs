use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, resolve_providers, AppConfig, ColumnsSection,
    CONFIG_ENV, CONFIG_FILENAME, DEFAULT_PROVIDER_ORDER, DEFAULT_RETRY_ORDER,
};
use crate::pipeline::prompts::{default_prompt_files, PromptCatalog, DEFAULT_PROMPTS_DIR};
use crate::providers::{ProviderKind, ProviderSettings};
use crate::sentinels::TokenMarkers;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_RULES_FILE: &str = "glossary/translation-rules.md";
pub const DEFAULT_SCENARIO_FILE: &str = "glossary/comment-rules.xlsx";

/// Source and output column names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnNames {
    pub entry: String,
    pub translation: String,
    pub notes: String,
    pub comment: String,
    /// Optional explicit id column; the row number is used when it is absent.
    pub id: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            entry: "词条".to_string(),
            translation: "英文翻译".to_string(),
            notes: "备注1".to_string(),
            comment: "comment".to_string(),
            id: "id".to_string(),
        }
    }
}

impl ColumnNames {
    fn from_section(section: &ColumnsSection) -> Self {
        let d = Self::default();
        let pick = |v: &Option<String>, fallback: String| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or(fallback)
        };
        Self {
            entry: pick(&section.entry, d.entry),
            translation: pick(&section.translation, d.translation),
            notes: pick(&section.notes, d.notes),
            comment: pick(&section.comment, d.comment),
            id: pick(&section.id, d.id),
        }
    }
}

/// Command-line values that win over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub glossary: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub scenario_rules: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub sort: Option<bool>,
    pub debug_prompt: Option<bool>,
    pub providers: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub input: PathBuf,
    pub output_dir: PathBuf,

    pub batch_size: usize,
    pub sort: bool,
    pub debug_prompt: bool,
    pub retry_invalid: bool,

    pub columns: ColumnNames,
    pub markers: TokenMarkers,

    pub rules_path: PathBuf,
    /// When set, the rule document is regenerated from this workbook before loading.
    pub glossary_workbook: Option<PathBuf>,
    pub scenario_path: Option<PathBuf>,
    /// Explicitly configured scenario files must exist; the default location is optional.
    pub scenario_required: bool,

    pub prompts: PromptCatalog,

    pub batch_providers: Vec<(ProviderKind, ProviderSettings)>,
    pub retry_providers: Vec<(ProviderKind, ProviderSettings)>,
}

impl PipelineConfig {
    /// Built-in defaults with no providers; the starting point for both the CLI and tests.
    pub fn with_defaults(input: &Path, output_dir: &Path) -> Self {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_path: workdir.join(CONFIG_FILENAME),
            rules_path: workdir.join(DEFAULT_RULES_FILE),
            workdir,
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            batch_size: DEFAULT_BATCH_SIZE,
            sort: false,
            debug_prompt: false,
            retry_invalid: true,
            columns: ColumnNames::default(),
            markers: TokenMarkers::default(),
            glossary_workbook: None,
            scenario_path: None,
            scenario_required: false,
            prompts: PromptCatalog::builtin(),
            batch_providers: Vec::new(),
            retry_providers: Vec::new(),
        }
    }

    pub fn from_paths_and_args(
        input: &Path,
        output_dir: &Path,
        cli: CliOverrides,
    ) -> anyhow::Result<Self> {
        let mut out = Self::with_defaults(input, output_dir);
        let workdir = out.workdir.canonicalize().unwrap_or(out.workdir.clone());

        let cfg_file = cli
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if cli.config_path.is_some() {
                anyhow::bail!("config file not found: {}", p.display());
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        let cfg_dir = cfg_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| workdir.clone());
        let from_cfg_dir = |s: &str| {
            let p = PathBuf::from(s.trim());
            if p.is_relative() {
                cfg_dir.join(p)
            } else {
                p
            }
        };

        let pipe = &file_cfg.pipeline;
        out.batch_size = cli
            .batch_size
            .or(pipe.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .max(1);
        out.sort = cli.sort.or(pipe.sort).unwrap_or(false);
        out.debug_prompt = cli.debug_prompt.or(pipe.debug_prompt).unwrap_or(false);
        out.retry_invalid = pipe.retry_invalid.unwrap_or(true);
        out.columns = ColumnNames::from_section(&file_cfg.columns);
        out.markers = TokenMarkers::new(
            pipe.marker_open.as_deref().unwrap_or_default(),
            pipe.marker_close.as_deref().unwrap_or_default(),
        );

        out.rules_path = cli
            .rules
            .clone()
            .or_else(|| pipe.rules.as_deref().map(from_cfg_dir))
            .unwrap_or_else(|| cfg_dir.join(DEFAULT_RULES_FILE));
        out.glossary_workbook = cli
            .glossary
            .clone()
            .or_else(|| pipe.glossary.as_deref().map(from_cfg_dir));

        let explicit_scenario = cli
            .scenario_rules
            .clone()
            .or_else(|| pipe.scenario_rules.as_deref().map(from_cfg_dir));
        out.scenario_required = explicit_scenario.is_some();
        out.scenario_path = match explicit_scenario {
            Some(p) => Some(p),
            None => {
                let p = cfg_dir.join(DEFAULT_SCENARIO_FILE);
                p.exists().then_some(p)
            }
        };

        out.prompts = PromptCatalog::from_section(&cfg_path, &file_cfg.prompts);

        let as_names = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let order = cli
            .providers
            .clone()
            .or_else(|| file_cfg.providers.order.clone())
            .unwrap_or_else(|| as_names(&DEFAULT_PROVIDER_ORDER));
        let retry_order = cli
            .providers
            .clone()
            .or_else(|| file_cfg.providers.retry_order.clone())
            .unwrap_or_else(|| {
                if file_cfg.providers.order.is_some() {
                    order.clone()
                } else {
                    as_names(&DEFAULT_RETRY_ORDER)
                }
            });
        let env = |k: &str| std::env::var(k).ok();
        out.batch_providers =
            resolve_providers(&file_cfg.providers, &order, &env).context("resolve providers")?;
        out.retry_providers = resolve_providers(&file_cfg.providers, &retry_order, &env)
            .context("resolve retry providers")?;

        out.workdir = workdir;
        out.config_path = cfg_path;
        Ok(out)
    }

    fn input_stem(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }

    /// `<output_dir>/<stem>.csv`, or `<stem>_translated.csv` when that would be the input itself.
    pub fn output_path(&self) -> PathBuf {
        let stem = self.input_stem();
        let plain = self.output_dir.join(format!("{stem}.csv"));
        let same = plain == self.input
            || matches!(
                (plain.canonicalize(), self.input.canonicalize()),
                (Ok(a), Ok(b)) if a == b
            );
        if same {
            self.output_dir.join(format!("{stem}_translated.csv"))
        } else {
            plain
        }
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_errors.log", self.input_stem()))
    }

    pub fn prompt_debug_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_prompt_debug.md", self.input_stem()))
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
batch_size = 1000
sort = false
debug_prompt = false
retry_invalid = true

rules = "glossary/translation-rules.md"
# Regenerate the rule document from a glossary workbook on every run:
# glossary = "glossary/glossary.xlsx"
# scenario_rules = "glossary/comment-rules.xlsx"

# Marker pair wrapped around protected placeholder tokens.
marker_open = "⟦"
marker_close = "⟧"

[columns]
entry = "词条"
translation = "英文翻译"
notes = "备注1"
comment = "comment"
id = "id"

[prompts]
single = "prompts/prompt-single.md"
batch = "prompts/prompt-batch.md"

[providers]
order = ["zhipu", "gemini", "openai"]
retry_order = ["zhipu", "claude", "gemini", "openai"]

[providers.backends.zhipu]
kind = "openai"
endpoint = "https://open.bigmodel.cn/api/paas/v4/chat/completions"
model = "glm-4-flash"
api_key_env = "ZHIPU_API_KEY"

[providers.backends.gemini]
kind = "gemini"
model = "gemini-1.5-flash"
api_key_env = "GEMINI_API_KEY"

[providers.backends.openai]
kind = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 30
batch_timeout_secs = 60

[providers.backends.claude]
kind = "anthropic"
model = "claude-3-5-sonnet-20241022"
api_key_env = "ANTHROPIC_API_KEY"
max_tokens = 1024
batch_max_tokens = 4096

# Any OpenAI-compatible gateway works the same way:
# [providers.backends.local]
# kind = "openai"
# endpoint = "http://127.0.0.1:8080/v1/chat/completions"
# model = "qwen2.5-7b-instruct"
# api_key = "none"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = init_default_config(dir.path(), false).expect("init");
        assert!(dir.path().join("prompts/prompt-batch.md").exists());
        let loaded = load_config(&cfg).expect("load");
        assert_eq!(loaded.pipeline.batch_size, Some(1000));
        assert_eq!(loaded.columns.notes.as_deref(), Some("备注1"));

        std::fs::write(&cfg, "[pipeline]\nbatch_size = 5\n").expect("write");
        init_default_config(dir.path(), false).expect("init again");
        assert_eq!(load_config(&cfg).expect("load").pipeline.batch_size, Some(5));
        init_default_config(dir.path(), true).expect("force");
        assert_eq!(load_config(&cfg).expect("load").pipeline.batch_size, Some(1000));
    }

    #[test]
    fn cli_wins_over_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &cfg,
            "[pipeline]\nbatch_size = 7\nsort = true\nrules = \"r.md\"\n\n[columns]\nentry = \"src\"\n\n[providers]\norder = []\n",
        )
        .expect("write");
        let input = dir.path().join("in.csv");
        let config = PipelineConfig::from_paths_and_args(
            &input,
            dir.path(),
            CliOverrides {
                config_path: Some(cfg.clone()),
                batch_size: Some(3),
                ..Default::default()
            },
        )
        .expect("config");
        assert_eq!(config.batch_size, 3);
        assert!(config.sort);
        assert_eq!(config.columns.entry, "src");
        assert_eq!(config.columns.notes, "备注1");
        assert_eq!(config.rules_path, dir.path().join("r.md"));
        assert!(config.batch_providers.is_empty());
        assert!(config.retry_providers.is_empty());
        assert!(!config.scenario_required);
        assert_eq!(config.output_path(), dir.path().join("in_translated.csv"));
        assert_eq!(config.error_log_path(), dir.path().join("in_errors.log"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PipelineConfig::from_paths_and_args(
            &dir.path().join("in.csv"),
            dir.path(),
            CliOverrides {
                config_path: Some(dir.path().join("nope.toml")),
                ..Default::default()
            },
        );
        assert!(err.is_err());
    }
}
