mod config;
mod prompts;
mod trace;
mod translator;

pub use config::{init_default_config, CliOverrides, ColumnNames, PipelineConfig};
pub use prompts::{
    build_batch_prompt, build_single_prompt, BatchItem, PromptCatalog, PromptContext,
};
pub use trace::PromptTrace;
pub use translator::{load_glossary, sort_entries, RunSummary, TranslatorPipeline};
