//! Similarity scoring providers.
//!
//! Defines the [`ScoreProvider`] trait, the seam between the duplicate
//! matcher and the service that judges how alike two case reports are,
//! and its implementations:
//! - **[`DisabledScoreProvider`]**: every call fails with [`ScoreError::Disabled`];
//!   used when no model is configured, so only the contact heuristic contributes.
//! - **[`OpenAiScoreProvider`]**: asks an OpenAI-compatible chat model
//!   (and a vision-capable model for photos) for a similarity score.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the provider named by
//! `[matcher].provider`:
//!
//! ```rust
//! # use caseguard::config::MatcherConfig;
//! # use caseguard::scoring::create_provider;
//! let config = MatcherConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.name(), "disabled");
//! ```
//!
//! # Response Contract
//!
//! Model-backed providers ask for a JSON object of the form
//!
//! ```json
//! { "similarityScore": 0.82, "reasoning": "...", "matchedAspects": { ... } }
//! ```
//!
//! Only `similarityScore` is read (see [`parse_similarity_score`]); the
//! breakdown is advisory and ignored.

mod images;
mod openai;

pub use images::{fetch_image, InlineImage};
pub use openai::OpenAiScoreProvider;

use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MatcherConfig;

/// The text a model sees for one side of a text comparison.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaseText {
    pub name: String,
    pub description: String,
}

impl CaseText {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Why a single comparison produced no score.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("scoring provider is disabled")]
    Disabled,

    #[error("network error: {0}")]
    Network(String),

    #[error("scoring service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unparseable score response: {0}")]
    Parse(String),

    #[error("image fetch failed for {url}: {reason}")]
    ImageFetch { url: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A backend that scores how alike two case reports are.
///
/// Both methods return a score in `[0, 1]` or an error; callers decide
/// what an error means for the overall decision.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    /// Short identifier used in logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Compare the name and description of two cases.
    async fn score_text(&self, a: &CaseText, b: &CaseText) -> Result<f64, ScoreError>;

    /// Compare the photos at two image URIs.
    async fn score_images(&self, a: &str, b: &str) -> Result<f64, ScoreError>;
}

pub struct DisabledScoreProvider;

#[async_trait]
impl ScoreProvider for DisabledScoreProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn score_text(&self, _a: &CaseText, _b: &CaseText) -> Result<f64, ScoreError> {
        Err(ScoreError::Disabled)
    }

    async fn score_images(&self, _a: &str, _b: &str) -> Result<f64, ScoreError> {
        Err(ScoreError::Disabled)
    }
}

/// Create the [`ScoreProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledScoreProvider`] |
/// | `"openai"` | [`OpenAiScoreProvider`] |
///
/// # Errors
///
/// Unknown provider names, or an OpenAI provider without a model or API key.
pub fn create_provider(config: &MatcherConfig) -> anyhow::Result<Arc<dyn ScoreProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledScoreProvider)),
        "openai" => Ok(Arc::new(OpenAiScoreProvider::new(config)?)),
        other => bail!("Unknown matcher provider: {}", other),
    }
}

/// Extract `similarityScore` from a model reply.
///
/// The reply must be a JSON object, optionally wrapped in a Markdown code
/// fence. The score is clamped into `[0, 1]`; a missing or non-numeric
/// score is an error.
pub fn parse_similarity_score(content: &str) -> Result<f64, ScoreError> {
    let body = strip_code_fence(content);

    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ScoreError::Parse(e.to_string()))?;

    let score = match json.get("similarityScore") {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| ScoreError::Parse(format!("missing numeric similarityScore in: {}", body)))?;

    Ok(score.clamp(0.0, 1.0))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
