//! OpenAI-compatible scoring backend.
//!
//! Sends both comparisons to `POST {base_url}/chat/completions` in JSON
//! mode. Works with the OpenAI API and compatible servers (vLLM, Ollama,
//! LocalAI) as long as the vision model accepts `image_url` content parts.
//!
//! Retry strategy matches the rest of the HTTP clients in this crate:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Each attempt is bounded by `request_timeout_secs`; the matcher bounds
//! the whole call, retries included, by `timeout_secs`. A timed-out
//! attempt counts as a network error and is retried while budget remains.

use anyhow::bail;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::images::fetch_image;
use super::{parse_similarity_score, CaseText, ScoreError, ScoreProvider};
use crate::config::MatcherConfig;

const SYSTEM_PROMPT: &str = "You compare reports about missing and at-risk children to find \
duplicate submissions. Always answer with a single JSON object.";

const IMAGE_PROMPT: &str = "Compare these two photos from child case reports. Judge how likely \
they show the same child, considering facial features, distinctive marks, hair, build and \
apparent age. Respond with a JSON object: {\"similarityScore\": <number between 0 and 1>, \
\"reasoning\": <string>, \"matchedFeatures\": {\"facialFeatures\": <0-1>, \
\"distinctiveMarks\": <0-1>, \"hair\": <0-1>, \"build\": <0-1>, \"apparentAge\": <0-1>}}";

pub struct OpenAiScoreProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    vision_model: String,
    max_retries: u32,
    max_image_bytes: usize,
}

impl OpenAiScoreProvider {
    /// Create a provider, reading the API key from the environment variable
    /// named by `config.api_key_env`.
    pub fn new(config: &MatcherConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &MatcherConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("matcher.model required for OpenAI provider"))?;
        let vision_model = config.vision_model.clone().unwrap_or_else(|| model.clone());

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            vision_model,
            max_retries: config.max_retries,
            max_image_bytes: config.max_image_bytes,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Run one JSON-mode chat completion with retry and return the reply text.
    async fn complete_json(&self, model: &str, user_content: Value) -> Result<String, ScoreError> {
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying scoring request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.chat_completions_url())
                .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let chat: ChatResponse = response
                            .json()
                            .await
                            .map_err(|e| ScoreError::Parse(e.to_string()))?;
                        return chat
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.message.content)
                            .ok_or_else(|| ScoreError::Parse("no choices in response".into()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ScoreError::Http {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(ScoreError::Network(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ScoreError::Network("scoring failed after retries".into())))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

fn text_prompt(a: &CaseText, b: &CaseText) -> String {
    format!(
        "Compare these two case reports and judge how likely they describe the same child \
and incident.\n\n\
Case 1:\nName: {}\nDescription: {}\n\n\
Case 2:\nName: {}\nDescription: {}\n\n\
Respond with a JSON object: {{\"similarityScore\": <number between 0 and 1>, \
\"reasoning\": <string>, \"matchedAspects\": {{\"name\": <0-1>, \"physicalDescription\": <0-1>, \
\"distinctiveFeatures\": <0-1>, \"location\": <0-1>, \"circumstances\": <0-1>}}}}",
        a.name, a.description, b.name, b.description
    )
}

#[async_trait]
impl ScoreProvider for OpenAiScoreProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn score_text(&self, a: &CaseText, b: &CaseText) -> Result<f64, ScoreError> {
        let content = self
            .complete_json(&self.model, Value::String(text_prompt(a, b)))
            .await?;
        parse_similarity_score(&content)
    }

    async fn score_images(&self, a: &str, b: &str) -> Result<f64, ScoreError> {
        let (image_a, image_b) = tokio::try_join!(
            fetch_image(&self.client, a, self.max_image_bytes),
            fetch_image(&self.client, b, self.max_image_bytes),
        )?;

        let content = json!([
            { "type": "text", "text": IMAGE_PROMPT },
            { "type": "image_url", "image_url": { "url": image_a.data_uri() } },
            { "type": "image_url", "image_url": { "url": image_b.data_uri() } },
        ]);

        let reply = self.complete_json(&self.vision_model, content).await?;
        parse_similarity_score(&reply)
    }
}
