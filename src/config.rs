use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tracing::warn;

use crate::providers::{
    Budget, ProviderKind, ProviderSettings, DEFAULT_SYSTEM_PROMPT,
};

pub const CONFIG_FILENAME: &str = "glossary-translator.toml";
pub const CONFIG_ENV: &str = "GLOSSARY_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub columns: ColumnsSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub providers: ProvidersSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Entries per provider call.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub sort: Option<bool>,
    #[serde(default)]
    pub debug_prompt: Option<bool>,
    /// Single-entry retry when placeholder tokens come back broken.
    #[serde(default)]
    pub retry_invalid: Option<bool>,

    /// Rule document (markdown). Relative paths resolve against the config file directory.
    #[serde(default)]
    pub rules: Option<String>,
    /// Glossary workbook; when set the rule document is regenerated from it on every run.
    #[serde(default)]
    pub glossary: Option<String>,
    #[serde(default)]
    pub scenario_rules: Option<String>,

    #[serde(default)]
    pub marker_open: Option<String>,
    #[serde(default)]
    pub marker_close: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ColumnsSection {
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub single: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProvidersSection {
    /// Batch chain, highest priority first.
    #[serde(default)]
    pub order: Option<Vec<String>>,
    /// Chain used by the single-entry retry. Defaults to `order`.
    #[serde(default)]
    pub retry_order: Option<Vec<String>>,
    #[serde(default)]
    pub backends: HashMap<String, ProviderBackend>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderBackend {
    /// openai | anthropic | gemini (aliases: zhipu, opencode, claude)
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub batch_max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl ProviderBackend {
    /// Fields set here win over `base`.
    fn over(self, base: &ProviderBackend) -> ProviderBackend {
        ProviderBackend {
            kind: self.kind.or_else(|| base.kind.clone()),
            endpoint: self.endpoint.or_else(|| base.endpoint.clone()),
            model: self.model.or_else(|| base.model.clone()),
            api_key: self.api_key.or_else(|| base.api_key.clone()),
            api_key_env: self.api_key_env.or_else(|| base.api_key_env.clone()),
            enabled: self.enabled.or(base.enabled),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            batch_timeout_secs: self.batch_timeout_secs.or(base.batch_timeout_secs),
            max_tokens: self.max_tokens.or(base.max_tokens),
            batch_max_tokens: self.batch_max_tokens.or(base.batch_max_tokens),
            temperature: self.temperature.or(base.temperature),
            system_prompt: self.system_prompt.or_else(|| base.system_prompt.clone()),
        }
    }
}

pub const DEFAULT_PROVIDER_ORDER: [&str; 3] = ["zhipu", "gemini", "openai"];
pub const DEFAULT_RETRY_ORDER: [&str; 4] = ["zhipu", "claude", "gemini", "openai"];

fn builtin_backend(name: &str) -> Option<ProviderBackend> {
    let (kind, endpoint, model, env, max_tokens) = match name {
        "zhipu" => (
            "openai",
            crate::providers::ZHIPU_CHAT_URL,
            "glm-4-flash",
            "ZHIPU_API_KEY",
            1000,
        ),
        "openai" => (
            "openai",
            crate::providers::OPENAI_CHAT_URL,
            "gpt-4o-mini",
            "OPENAI_API_KEY",
            1000,
        ),
        "claude" => (
            "anthropic",
            crate::providers::ANTHROPIC_MESSAGES_URL,
            "claude-3-5-sonnet-20241022",
            "ANTHROPIC_API_KEY",
            1024,
        ),
        "gemini" => (
            "gemini",
            crate::providers::GEMINI_BASE_URL,
            "gemini-1.5-flash",
            "GEMINI_API_KEY",
            1024,
        ),
        _ => return None,
    };
    Some(ProviderBackend {
        kind: Some(kind.to_string()),
        endpoint: Some(endpoint.to_string()),
        model: Some(model.to_string()),
        api_key: None,
        api_key_env: Some(env.to_string()),
        enabled: Some(true),
        timeout_secs: Some(30),
        batch_timeout_secs: Some(60),
        max_tokens: Some(max_tokens),
        batch_max_tokens: Some(max_tokens * 4),
        temperature: Some(0.3),
        system_prompt: None,
    })
}

/// Resolves named backends into provider settings, skipping disabled or keyless ones.
///
/// `lookup_env` is injected so keys never come from process-wide state inside providers.
pub fn resolve_providers(
    section: &ProvidersSection,
    order: &[String],
    lookup_env: &dyn Fn(&str) -> Option<String>,
) -> anyhow::Result<Vec<(ProviderKind, ProviderSettings)>> {
    let mut out: Vec<(ProviderKind, ProviderSettings)> = Vec::new();
    for name in order {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let builtin = builtin_backend(name);
        let backend = match (section.backends.get(name), builtin.as_ref()) {
            (Some(file), Some(base)) => file.clone().over(base),
            (Some(file), None) => file.clone(),
            (None, Some(base)) => base.clone(),
            (None, None) => return Err(anyhow!("provider not configured: {name}")),
        };
        if backend.enabled == Some(false) {
            continue;
        }

        let kind = ProviderKind::parse(backend.kind.as_deref().unwrap_or(name))
            .with_context(|| format!("provider {name}"))?;
        let endpoint = backend
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("provider {name}: missing endpoint"))?;
        let model = backend.model.clone().unwrap_or_default();

        let api_key = backend
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                backend
                    .api_key_env
                    .as_deref()
                    .and_then(lookup_env)
                    .filter(|k| !k.trim().is_empty())
            });
        let Some(api_key) = api_key else {
            warn!(provider = name, "no API key configured, provider skipped");
            continue;
        };

        let max_tokens = backend.max_tokens.unwrap_or(1000);
        out.push((
            kind,
            ProviderSettings {
                name: name.to_string(),
                endpoint,
                model,
                api_key,
                temperature: backend.temperature.unwrap_or(0.3),
                system_prompt: backend
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                single: Budget {
                    timeout: Duration::from_secs(backend.timeout_secs.unwrap_or(30)),
                    max_tokens,
                },
                batch: Budget {
                    timeout: Duration::from_secs(backend.batch_timeout_secs.unwrap_or(60)),
                    max_tokens: backend.batch_max_tokens.unwrap_or(max_tokens * 4),
                },
            },
        ));
    }
    Ok(out)
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |k| {
            pairs
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn parses_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
[pipeline]
batch_size = 50
sort = true

[columns]
entry = "source"

[providers]
order = ["local"]

[providers.backends.local]
kind = "openai"
endpoint = "http://127.0.0.1:8080/v1/chat/completions"
model = "qwen"
api_key = "x"
"#,
        )
        .expect("toml");
        assert_eq!(cfg.pipeline.batch_size, Some(50));
        assert_eq!(cfg.columns.entry.as_deref(), Some("source"));
        let order = cfg.providers.order.clone().expect("order");
        let resolved = resolve_providers(&cfg.providers, &order, &env(&[])).expect("resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, ProviderKind::OpenAiCompat);
        assert_eq!(resolved[0].1.model, "qwen");
        assert_eq!(resolved[0].1.batch.timeout, Duration::from_secs(60));
    }

    #[test]
    fn builtins_need_keys_and_honour_enabled() {
        let mut section = ProvidersSection::default();
        section.backends.insert(
            "gemini".to_string(),
            ProviderBackend {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let order: Vec<String> = DEFAULT_PROVIDER_ORDER.iter().map(|s| s.to_string()).collect();
        let resolved = resolve_providers(
            &section,
            &order,
            &env(&[("ZHIPU_API_KEY", "zk"), ("GEMINI_API_KEY", "gk")]),
        )
        .expect("resolve");
        let names: Vec<&str> = resolved.iter().map(|(_, s)| s.name.as_str()).collect();
        assert_eq!(names, vec!["zhipu"]);
        assert_eq!(resolved[0].1.api_key, "zk");
        assert_eq!(resolved[0].1.model, "glm-4-flash");
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let order = vec!["nope".to_string()];
        assert!(resolve_providers(&ProvidersSection::default(), &order, &env(&[])).is_err());
    }
}
