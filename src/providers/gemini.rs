use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, ProviderRequest, ProviderSettings, TranslationProvider};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// `generateContent`; the key travels in the `x-goog-api-key` header, never in the URL.
pub struct GeminiProvider {
    settings: ProviderSettings,
    client: Client,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self { settings, client })
    }

    /// An endpoint ending in `:generateContent` is used as is; otherwise the model is appended.
    fn url(&self) -> String {
        let s = &self.settings;
        let base = s.endpoint.trim_end_matches('/');
        if base.ends_with(":generateContent") {
            base.to_string()
        } else {
            format!("{base}/{}:generateContent", s.model)
        }
    }
}

impl TranslationProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let s = &self.settings;
        let budget = s.budget(request.mode);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: s.temperature,
                max_output_tokens: budget.max_tokens,
            },
        };
        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", s.api_key.trim())
            .timeout(budget.timeout)
            .json(&body)
            .send()
            .map_err(reqwest::Error::without_url)
            .context("failed to call Gemini generateContent")?;
        let resp = check_status(&s.name, resp)?;
        let parsed: GenerateResponse = resp
            .json()
            .map_err(reqwest::Error::without_url)
            .context("failed to parse Gemini response")?;
        first_text(parsed).ok_or_else(|| anyhow!("{} response has unexpected shape", s.name))
    }
}

fn first_text(resp: GenerateResponse) -> Option<String> {
    resp.candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
