use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::cache::{CacheStore, description_key};
use crate::error::{PipelineError, Result};

#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    async fn describe(&self, subject: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenRouterClient {
    pub const ENDPOINT: &'static str = "https://openrouter.ai/api/v1/chat/completions";

    pub fn new(client: reqwest::Client, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: Self::ENDPOINT.to_string(),
            api_key,
            model: model.into(),
        }
    }
}

fn prompt_for(subject: &str) -> String {
    format!(
        "Give me a brief description of the animal named {}. Use information from wikipedia and \
         other reliable sources. Include its habitat, diet, size, scientific name and any \
         interesting facts. The response should be concise and informative, suitable for a \
         general audience. The response will be read out loud by a text-to-speech system, so it \
         should be clear and easy to understand. Return the information in a single paragraph \
         without any additional text or formatting.",
        subject
    )
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::external("openrouter", e))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(PipelineError::external("openrouter", "completion had no content"));
    }
    Ok(text)
}

#[async_trait]
impl DescriptionProvider for OpenRouterClient {
    async fn describe(&self, subject: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration(
                "API key not found. Please set the OPENROUTER_API_KEY environment variable.".into(),
            )
        })?;
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt_for(subject) }],
        });

        debug!("Requesting description of {} from {}", subject, self.model);
        let res = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external("openrouter", e))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| PipelineError::external("openrouter", e))?;
        if !status.is_success() {
            return Err(PipelineError::external("openrouter", format!("{} - {}", status, text)));
        }
        parse_completion(&text)
    }
}

/// Cached lookup; only successful descriptions are stored.
pub async fn describe_cached(
    provider: &dyn DescriptionProvider,
    cache: &CacheStore,
    subject: &str,
) -> Result<String> {
    let key = description_key(subject);
    if let Some(text) = cache.get::<String>(&key).filter(|t| !t.trim().is_empty()) {
        info!("Using cached description for {}", subject);
        return Ok(text);
    }
    let text = provider.describe(subject).await?;
    cache.set(&key, &text);
    Ok(text)
}
