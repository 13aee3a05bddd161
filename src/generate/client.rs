use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ModelService;

const MAX_RATE_LIMIT_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 1500;

/// Resolved connection settings for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client used in production.
pub struct HttpModelClient {
    http: reqwest::Client,
    settings: ModelSettings,
}

impl HttpModelClient {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, settings })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl ModelService for HttpModelClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self.settings.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No API key configured. Set LESSONFORGE_API_KEY or the variable named by model.api_key_env"
            )
        })?;

        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.settings.temperature,
            stream: false,
        };
        let url = self.endpoint();
        tracing::debug!(
            model = %self.settings.model,
            system_chars = system.len(),
            user_chars = user.len(),
            "Sending chat completion request"
        );

        let mut retries = 0;
        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read model response body")?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse model response: {}", preview(&text)))?;
                return Ok(parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default());
            }

            if status.as_u16() == 429 && retries < MAX_RATE_LIMIT_RETRIES {
                retries += 1;
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(retries - 1);
                tracing::warn!(retries, backoff_ms = backoff, "Model service rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            let message = match status.as_u16() {
                401 | 403 => "API key rejected by the model service".to_string(),
                429 => format!("Rate limited after {} retries", retries),
                500..=599 => format!("Model service unavailable ({})", status),
                _ => format!("API error {}: {}", status, preview(&text)),
            };
            anyhow::bail!(message);
        }
    }
}

fn preview(text: &str) -> String {
    crate::util::truncate_chars(text, 200)
}
