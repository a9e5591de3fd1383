use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{check_status, ProviderRequest, ProviderSettings, TranslationProvider};

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    settings: ProviderSettings,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self { settings, client })
    }
}

impl TranslationProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let s = &self.settings;
        let budget = s.budget(request.mode);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(s.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = AnthropicRequest {
            model: &s.model,
            max_tokens: budget.max_tokens,
            temperature: s.temperature,
            system: (!s.system_prompt.is_empty()).then_some(s.system_prompt.as_str()),
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(&s.endpoint)
            .headers(headers)
            .timeout(budget.timeout)
            .json(&body)
            .send()
            .context("failed to call Anthropic messages API")?;
        let resp = check_status(&s.name, resp)?;
        let parsed: AnthropicResponse = resp.json().context("failed to parse Anthropic response")?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.is_empty() {
            return Err(anyhow!("{} response has no text block", s.name));
        }
        Ok(text)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"1. A"},{"type":"tool_use","id":"x"},{"type":"text","text":"\n2. B"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).expect("parse");
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        assert_eq!(text, "1. A\n2. B");
    }
}
