use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{check_status, ProviderRequest, ProviderSettings, TranslationProvider};

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ZHIPU_CHAT_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Chat-completions endpoint with bearer auth.
pub struct OpenAiCompatProvider {
    settings: ProviderSettings,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .with_context(|| format!("failed to build {} HTTP client", settings.name))?;
        Ok(Self { settings, client })
    }
}

impl TranslationProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let s = &self.settings;
        let budget = s.budget(request.mode);
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", s.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).with_context(|| format!("invalid {} API key", s.name))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &s.model,
            temperature: s.temperature,
            max_tokens: budget.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &s.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&s.endpoint)
            .headers(headers)
            .timeout(budget.timeout)
            .json(&body)
            .send()
            .with_context(|| format!("failed to call {} chat completions", s.name))?;
        let resp = check_status(&s.name, resp)?;
        let parsed: ChatResponse = resp
            .json()
            .with_context(|| format!("failed to parse {} response", s.name))?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("{} response has no message content", s.name))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
