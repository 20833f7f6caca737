//! TOML configuration parsing.
//!
//! ```toml
//! [db]
//! path = "./data/caseguard.sqlite"
//!
//! [matcher]
//! provider = "openai"          # or "disabled"
//! model = "gpt-4o-mini"
//! vision_model = "gpt-4o"
//! timeout_secs = 30          # whole comparison, retries included
//! request_timeout_secs = 10   # one HTTP attempt
//! candidate_limit = 50        # 0 = compare against all cases
//! duplicate_threshold = 0.85
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used for text comparison.
    #[serde(default)]
    pub model: Option<String>,
    /// Model used for image comparison. Falls back to `model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound for each external comparison, image fetches and
    /// retries included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for a single HTTP attempt, capped at `timeout_secs`.
    /// A smaller value leaves room for retries after a slow attempt.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How many of the most recent cases a draft is compared against.
    /// `0` compares against every stored case.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Candidate comparisons in flight at once during a duplicate check.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            vision_model: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            candidate_limit: default_candidate_limit(),
            duplicate_threshold: default_duplicate_threshold(),
            max_image_bytes: default_max_image_bytes(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    2
}
fn default_candidate_limit() -> usize {
    50
}
fn default_duplicate_threshold() -> f64 {
    0.85
}
fn default_max_image_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_max_concurrency() -> usize {
    4
}

impl MatcherConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Per-attempt timeout, never longer than the whole comparison.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(self.timeout_secs))
    }

    /// Candidate window for duplicate checks; `None` means every case.
    pub fn candidate_window(&self) -> Option<usize> {
        (self.candidate_limit > 0).then_some(self.candidate_limit)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let matcher = &config.matcher;

    if !(0.0..=1.0).contains(&matcher.duplicate_threshold) {
        anyhow::bail!("matcher.duplicate_threshold must be in [0.0, 1.0]");
    }
    if matcher.timeout_secs == 0 {
        anyhow::bail!("matcher.timeout_secs must be > 0");
    }
    if matcher.request_timeout_secs == 0 {
        anyhow::bail!("matcher.request_timeout_secs must be > 0");
    }
    if matcher.max_concurrency == 0 {
        anyhow::bail!("matcher.max_concurrency must be >= 1");
    }
    if matcher.max_image_bytes == 0 {
        anyhow::bail!("matcher.max_image_bytes must be > 0");
    }

    match matcher.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown matcher provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if matcher.is_enabled() && matcher.model.is_none() {
        anyhow::bail!(
            "matcher.model must be specified when provider is '{}'",
            matcher.provider
        );
    }

    Ok(())
}
