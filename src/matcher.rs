//! Duplicate case matching.
//!
//! [`DuplicateCaseMatcher::compare`] scores a draft case against one stored
//! case along three aspects and folds them into one number:
//!
//! | Aspect | Source | Weight (images) | Weight (no images) |
//! |--------|--------|-----------------|--------------------|
//! | text (`physical_match`) | [`ScoreProvider::score_text`] | 0.4 | 0.7 |
//! | image (`distinctive_features_match`) | [`ScoreProvider::score_images`] | 0.4 | 0 |
//! | contact (`contact_match`) | [`compare_contact_info`] | 0.2 | 0.3 |
//!
//! Image evidence exists only when both cases carry an image reference;
//! without it the image term is dropped and its weight redistributed, so
//! the overall score is never diluted by a forced zero.
//!
//! # Failure Isolation
//!
//! A comparison never fails. Each external call runs under its own timeout
//! and its error collapses to a `0` sub-score at the boundary (logged with
//! the aspect and case id), so one failing service leaves the other
//! aspects intact. A missed duplicate is preferred over blocking a
//! legitimate report because a model was unreachable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cases;
use crate::config::{Config, MatcherConfig};
use crate::db;
use crate::models::{CaseRecord, MatchResult, NewCase};
use crate::scoring::{create_provider, CaseText, ScoreError, ScoreProvider};

/// Weights applied to the three sub-scores. Each set sums to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub text: f64,
    pub image: f64,
    pub contact: f64,
}

pub const WEIGHTS_WITH_IMAGES: Weights = Weights {
    text: 0.4,
    image: 0.4,
    contact: 0.2,
};

pub const WEIGHTS_WITHOUT_IMAGES: Weights = Weights {
    text: 0.7,
    image: 0.0,
    contact: 0.3,
};

/// Scores drafts against stored cases. Holds no per-call state, so one
/// matcher can serve concurrent comparisons.
#[derive(Clone)]
pub struct DuplicateCaseMatcher {
    provider: Arc<dyn ScoreProvider>,
    timeout: Duration,
}

impl DuplicateCaseMatcher {
    pub fn new(provider: Arc<dyn ScoreProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn from_config(config: &MatcherConfig) -> anyhow::Result<Self> {
        Ok(Self::new(create_provider(config)?, config.timeout()))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Compare a (possibly partial) draft with a stored case.
    pub async fn compare(&self, new_case: &NewCase, existing: &CaseRecord) -> MatchResult {
        let contact_match =
            compare_contact_info(new_case.contact_info.as_deref(), &existing.contact_info);

        let (text, image) = tokio::join!(
            self.compare_text_content(new_case, existing),
            self.compare_images(new_case, existing),
        );

        let physical_match = settle("text", &existing.id, text);
        let image_match = image.map(|outcome| settle("image", &existing.id, outcome));

        let overall_similarity =
            calculate_overall_similarity(physical_match, image_match, contact_match);

        tracing::debug!(
            case_id = %existing.id,
            physical_match,
            image_match = ?image_match,
            contact_match,
            overall_similarity,
            "compared draft against case"
        );

        MatchResult {
            physical_match,
            distinctive_features_match: image_match.unwrap_or(0.0),
            contact_match,
            overall_similarity,
        }
    }

    async fn compare_text_content(
        &self,
        new_case: &NewCase,
        existing: &CaseRecord,
    ) -> Result<f64, ScoreError> {
        let draft = CaseText::new(
            new_case.child_name.clone().unwrap_or_default(),
            new_case.description.clone().unwrap_or_default(),
        );
        let stored = CaseText::new(existing.child_name.clone(), existing.description.clone());

        self.bounded(self.provider.score_text(&draft, &stored)).await
    }

    /// `None` when either side has no image: there is no evidence to score.
    async fn compare_images(
        &self,
        new_case: &NewCase,
        existing: &CaseRecord,
    ) -> Option<Result<f64, ScoreError>> {
        let draft_image = non_blank(new_case.image_url.as_deref())?;
        let stored_image = non_blank(existing.image_url.as_deref())?;

        Some(
            self.bounded(self.provider.score_images(draft_image, stored_image))
                .await,
        )
    }

    async fn bounded<F>(&self, call: F) -> Result<f64, ScoreError>
    where
        F: Future<Output = Result<f64, ScoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ScoreError::Timeout(self.timeout)),
        }
    }
}

/// Collapse a sub-comparison outcome to a score in `[0, 1]`.
fn settle(aspect: &str, case_id: &str, outcome: Result<f64, ScoreError>) -> f64 {
    match outcome {
        Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
        Ok(score) => {
            tracing::warn!(
                aspect,
                case_id,
                score,
                "provider returned a non-finite score; using 0"
            );
            0.0
        }
        Err(ScoreError::Disabled) => 0.0,
        Err(e) => {
            tracing::warn!(aspect, case_id, error = %e, "comparison failed; using 0");
            0.0
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Lowercase and drop whitespace, `-`, `+`, `(` and `)`.
pub fn normalize_contact(contact: &str) -> String {
    contact
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '+' | '(' | ')'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Heuristic similarity between two contact strings.
///
/// | Rule (after [`normalize_contact`]) | Score |
/// |------|-------|
/// | equal | 1.0 |
/// | longer ends with shorter (country code prefix) | 0.8 |
/// | one contains the other | 0.9 |
/// | last 8 characters equal | 0.7 |
/// | otherwise, or no draft contact | 0.0 |
///
/// Rules are tried top to bottom. The suffix rule comes before the
/// containment rule because every suffix is also contained.
pub fn compare_contact_info(new_contact: Option<&str>, existing_contact: &str) -> f64 {
    let Some(new_contact) = new_contact else {
        return 0.0;
    };

    let a = normalize_contact(new_contact);
    let b = normalize_contact(existing_contact);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (longer, shorter) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };

    if longer.ends_with(shorter.as_str()) {
        return 0.8;
    }
    if longer.contains(shorter.as_str()) {
        return 0.9;
    }
    if last_chars(&a, 8).zip(last_chars(&b, 8)).is_some_and(|(x, y)| x == y) {
        return 0.7;
    }

    0.0
}

/// The last `n` characters, or `None` if the string is shorter.
fn last_chars(s: &str, n: usize) -> Option<&str> {
    let count = s.chars().count();
    if count < n {
        return None;
    }
    s.char_indices().nth(count - n).map(|(i, _)| &s[i..])
}

/// Weighted combination of the sub-scores.
///
/// `image` is `None` when image evidence is unavailable, which switches to
/// [`WEIGHTS_WITHOUT_IMAGES`].
pub fn calculate_overall_similarity(text: f64, image: Option<f64>, contact: f64) -> f64 {
    let (weights, image) = match image {
        Some(score) => (WEIGHTS_WITH_IMAGES, score),
        None => (WEIGHTS_WITHOUT_IMAGES, 0.0),
    };

    let overall = text * weights.text + image * weights.image + contact * weights.contact;
    overall.clamp(0.0, 1.0)
}

/// CLI entry point: compare two stored cases, treating the first as the draft.
pub async fn run_compare(
    config: &Config,
    draft_id: &str,
    existing_id: &str,
) -> anyhow::Result<()> {
    let matcher = DuplicateCaseMatcher::from_config(&config.matcher)?;
    let pool = db::connect(config).await?;
    let draft = cases::require_case(&pool, draft_id).await;
    let existing = cases::require_case(&pool, existing_id).await;
    pool.close().await;

    let draft = NewCase::from(&draft?);
    let result = matcher.compare(&draft, &existing?).await;

    println!("provider:           {}", matcher.provider_name());
    print_match(&result);
    Ok(())
}

pub(crate) fn print_match(result: &MatchResult) {
    println!("physical_match:     {:.3}", result.physical_match);
    println!("features_match:     {:.3}", result.distinctive_features_match);
    println!("contact_match:      {:.3}", result.contact_match);
    println!("overall_similarity: {:.3}", result.overall_similarity);
}
