use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use glossary_translator::pipeline::{
    init_default_config, CliOverrides, PipelineConfig, RunSummary, TranslatorPipeline,
};
use glossary_translator::progress::ConsoleProgress;
use glossary_translator::terminology::extract_rules_from_workbook;

const LOG_ENV: &str = "GLOSSARY_TRANSLATOR_LOG";

#[derive(Parser, Debug)]
#[command(name = "glossary-translator")]
#[command(about = "Batch glossary translator (zh -> en) with placeholder protection", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input table (.xlsx or .csv)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output directory (default: the input's directory)
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Glossary workbook; the rule document is regenerated from it before translating
    #[arg(value_name = "GLOSSARY")]
    glossary: Option<PathBuf>,

    /// Config file path (default: search for glossary-translator.toml upwards)
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Rule document (markdown) to load terms from
    #[arg(long, value_name = "MD")]
    rules: Option<PathBuf>,

    /// Scenario rule workbook keyed by the comment column
    #[arg(long, value_name = "XLSX")]
    scenario_rules: Option<PathBuf>,

    /// Entries per model call
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Provider names in fallback order (e.g. zhipu,gemini)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    providers: Option<Vec<String>>,

    /// Write every prompt to <stem>_prompt_debug.md
    #[arg(long)]
    debug_prompt: bool,

    /// Move entries with notes to the top of the output
    #[arg(long, overrides_with = "no_sort")]
    sort: bool,

    /// Keep input order (default)
    #[arg(long, overrides_with = "sort")]
    no_sort: bool,

    /// Regenerate the rule document from a glossary workbook, then exit (no LLM)
    #[arg(long, value_name = "XLSX")]
    extract_rules: Option<PathBuf>,
}

impl Args {
    fn sort_flag(&self) -> Option<bool> {
        match (self.sort, self.no_sort) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            glossary: self.glossary.clone(),
            rules: self.rules.clone(),
            scenario_rules: self.scenario_rules.clone(),
            batch_size: self.batch_size,
            sort: self.sort_flag(),
            debug_prompt: self.debug_prompt.then_some(true),
            providers: self.providers.clone(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_summary(s: &RunSummary) {
    eprintln!(
        "Done: {} entries ({} model, {} rule-based, {} empty), {} with issues",
        s.entries, s.model_translated, s.forced, s.skipped_empty, s.with_issues
    );
    eprintln!("Output: {}", s.output.display());
    if let Some(p) = &s.error_log {
        eprintln!("Error log: {}", p.display());
    }
    if let Some(p) = &s.prompt_debug {
        eprintln!("Prompt debug: {}", p.display());
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(workbook) = args.extract_rules.clone() {
        let out_dir = workbook
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let cfg = PipelineConfig::from_paths_and_args(&workbook, &out_dir, args.overrides())
            .context("build config")?;
        let glossary = extract_rules_from_workbook(&workbook, &cfg.rules_path)?;
        eprintln!(
            "Wrote rules: {} ({} abbreviations, {} full terms, {} pseudo-code terms)",
            cfg.rules_path.display(),
            glossary.abbreviations.len(),
            glossary.full_translations.len(),
            glossary.pseudo_code.len()
        );
        return Ok(());
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  glossary-translator <input.xlsx> [output_dir] [glossary.xlsx]\n\nTIPS:\n  - Default config search: glossary-translator.toml (upwards), or set GLOSSARY_TRANSLATOR_CONFIG.\n  - Set GLOSSARY_TRANSLATOR_LOG=debug for detailed logs.\n"
            );
            return Ok(());
        }
    };
    if !input.exists() {
        anyhow::bail!("input not found: {}", input.display());
    }
    let output_dir = match args.output_dir.clone() {
        Some(p) => p,
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let cfg = PipelineConfig::from_paths_and_args(&input, &output_dir, args.overrides())
        .context("build config")?;
    let mut pipeline = TranslatorPipeline::from_config(cfg, progress)?;
    let summary = pipeline.translate_table()?;
    print_summary(&summary);
    Ok(())
}
