use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::batch::{parse_batch_response, ParsedBatch};

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::{AnthropicProvider, ANTHROPIC_MESSAGES_URL};
pub use gemini::{GeminiProvider, GEMINI_BASE_URL};
pub use openai::{OpenAiCompatProvider, OPENAI_CHAT_URL, ZHIPU_CHAT_URL};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a professional software localisation translator. Translate Chinese UI strings into English following the given rules.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMode {
    Single,
    Batch,
}

/// Request envelope shared by the concrete providers.
pub struct ProviderRequest<'a> {
    pub prompt: &'a str,
    pub mode: RequestMode,
}

/// Upper bounds for one call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Budget {
    pub timeout: Duration,
    pub max_tokens: u32,
}

/// Everything a provider instance needs, injected at construction.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub single: Budget,
    pub batch: Budget,
}

impl ProviderSettings {
    #[must_use]
    pub fn budget(&self, mode: RequestMode) -> Budget {
        match mode {
            RequestMode::Single => self.single,
            RequestMode::Batch => self.batch,
        }
    }
}

/// One text-generation backend.
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<String>;

    fn translate(&self, prompt: &str) -> Result<String> {
        let text = self.complete(&ProviderRequest {
            prompt,
            mode: RequestMode::Single,
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("{} returned an empty translation", self.name()));
        }
        Ok(text.to_string())
    }

    /// `expected` only steers response parsing; the provider itself is not held to it.
    fn translate_batch(&self, prompt: &str, expected: usize) -> Result<ParsedBatch> {
        let text = self.complete(&ProviderRequest {
            prompt,
            mode: RequestMode::Batch,
        })?;
        if text.trim().is_empty() {
            return Err(anyhow!("{} returned an empty batch response", self.name()));
        }
        Ok(parse_batch_response(&text, expected))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
}

/// Every provider in the chain failed (or none was enabled).
#[derive(Clone, Debug)]
pub struct ChainError {
    pub failures: Vec<ProviderFailure>,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no translation provider enabled");
        }
        write!(f, "all translation providers failed: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.provider, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainError {}

#[derive(Clone, Debug)]
pub struct ChainOutput<T> {
    pub provider: String,
    pub value: T,
}

/// Priority-ordered providers; the first success wins.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn TranslationProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn TranslationProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn run<T>(
        &self,
        call: impl Fn(&dyn TranslationProvider) -> Result<T>,
    ) -> Result<ChainOutput<T>, ChainError> {
        let mut failures: Vec<ProviderFailure> = Vec::new();
        for provider in &self.providers {
            match call(provider.as_ref()) {
                Ok(value) => {
                    debug!(provider = provider.name(), "provider call succeeded");
                    return Ok(ChainOutput {
                        provider: provider.name().to_string(),
                        value,
                    });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %format!("{e:#}"), "provider call failed");
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }
        Err(ChainError { failures })
    }

    pub fn translate(&self, prompt: &str) -> Result<ChainOutput<String>, ChainError> {
        self.run(|p| p.translate(prompt))
    }

    pub fn translate_batch(
        &self,
        prompt: &str,
        expected: usize,
    ) -> Result<ChainOutput<ParsedBatch>, ChainError> {
        self.run(|p| p.translate_batch(prompt, expected))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Chat-completions shape: OpenAI, Zhipu and other compatible gateways.
    OpenAiCompat,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai_compat" | "zhipu" | "opencode" => Ok(Self::OpenAiCompat),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(anyhow!("unknown provider kind: {other}")),
        }
    }
}

pub fn build_provider(
    kind: ProviderKind,
    settings: ProviderSettings,
) -> Result<Arc<dyn TranslationProvider>> {
    Ok(match kind {
        ProviderKind::OpenAiCompat => Arc::new(OpenAiCompatProvider::new(settings)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings)?),
    })
}

pub fn build_chain(resolved: Vec<(ProviderKind, ProviderSettings)>) -> Result<ProviderChain> {
    let mut providers = Vec::with_capacity(resolved.len());
    for (kind, settings) in resolved {
        providers.push(build_provider(kind, settings)?);
    }
    Ok(ProviderChain::new(providers))
}

/// Pulls the response body into an error message when the status is not 2xx.
pub(crate) fn check_status(
    provider: &str,
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(anyhow!("{provider} returned {status}: {text}"))
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses; an `Err` entry simulates a failed call.
    pub(crate) struct ScriptedProvider {
        name: String,
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(name: &str, replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                name: name.to_string(),
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn seen_prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("lock").clone()
        }
    }

    impl TranslationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn complete(&self, request: &ProviderRequest<'_>) -> Result<String> {
            self.prompts
                .lock()
                .expect("lock")
                .push(request.prompt.to_string());
            match self.replies.lock().expect("lock").pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(anyhow!(msg)),
                None => Err(anyhow!("script exhausted")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::ScriptedProvider;
    use super::*;

    fn dynamic(p: &Arc<ScriptedProvider>) -> Arc<dyn TranslationProvider> {
        p.clone()
    }

    #[test]
    fn first_success_short_circuits() {
        let a = Arc::new(ScriptedProvider::new("a", vec![Err("boom")]));
        let b = Arc::new(ScriptedProvider::new("b", vec![Ok(" hello ")]));
        let c = Arc::new(ScriptedProvider::new("c", vec![Ok("unused")]));
        let chain = ProviderChain::new(vec![dynamic(&a), dynamic(&b), dynamic(&c)]);
        let out = chain.translate("p").expect("translated");
        assert_eq!(out.provider, "b");
        assert_eq!(out.value, "hello");
        assert_eq!(a.seen_prompts(), vec!["p"]);
        assert!(c.seen_prompts().is_empty());
    }

    #[test]
    fn all_failures_are_aggregated() {
        let a = Arc::new(ScriptedProvider::new("a", vec![Err("timeout")]));
        let b = Arc::new(ScriptedProvider::new("b", vec![Ok("   ")]));
        let chain = ProviderChain::new(vec![dynamic(&a), dynamic(&b)]);
        let err = chain.translate("p").expect_err("should fail");
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].message, "timeout");
        let msg = err.to_string();
        assert!(msg.contains("a: timeout"));
        assert!(msg.contains("b: b returned an empty translation"));
    }

    #[test]
    fn empty_chain_reports_nothing_enabled() {
        let err = ProviderChain::default()
            .translate_batch("p", 2)
            .expect_err("empty");
        assert_eq!(err.to_string(), "no translation provider enabled");
    }

    #[test]
    fn batch_goes_through_parser() {
        let a = Arc::new(ScriptedProvider::new("a", vec![Ok("1. One\n2. Two")]));
        let chain = ProviderChain::new(vec![dynamic(&a)]);
        let out = chain.translate_batch("p", 3).expect("batch");
        assert_eq!(out.value.translations, vec!["One", "Two", ""]);
        assert_eq!(out.value.recovered, 2);
    }

    #[test]
    fn kind_aliases() {
        assert_eq!(ProviderKind::parse("Zhipu").expect("kind"), ProviderKind::OpenAiCompat);
        assert_eq!(ProviderKind::parse("claude").expect("kind"), ProviderKind::Anthropic);
        assert!(ProviderKind::parse("carrier-pigeon").is_err());
    }
}
