//! Case submission: validation, duplicate check, and commit.
//!
//! A draft is compared against the most recent stored cases before it is
//! accepted. When any candidate scores at or above the configured
//! threshold the submission is held back and the candidates are returned
//! so the submitter can review them; `force` commits anyway.
//!
//! ```text
//! draft ──▶ validate ──▶ check_duplicates ──▶ threshold? ──▶ insert_case
//!                             │                   │
//!                     recent N cases         Blocked(candidates)
//! ```

use anyhow::Context;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::cases::{self, CaseError};
use crate::config::{Config, MatcherConfig};
use crate::db;
use crate::matcher::{print_match, DuplicateCaseMatcher};
use crate::models::{
    format_ts_iso, CaseRecord, CaseStatus, CaseSubmission, MatchResult, NewCase, MAX_AGE, MIN_AGE,
};

/// Duplicate-check policy, usually taken from `[matcher]`.
#[derive(Debug, Clone)]
pub struct SubmitSettings {
    /// `None` compares against every stored case.
    pub candidate_limit: Option<usize>,
    pub duplicate_threshold: f64,
    pub max_concurrency: usize,
}

impl From<&MatcherConfig> for SubmitSettings {
    fn from(config: &MatcherConfig) -> Self {
        Self {
            candidate_limit: config.candidate_window(),
            duplicate_threshold: config.duplicate_threshold,
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

/// One stored case compared against a draft.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub case_id: String,
    pub child_name: String,
    pub status: CaseStatus,
    pub created_at: String,
    pub scores: MatchResult,
}

impl DuplicateCandidate {
    fn new(case: &CaseRecord, scores: MatchResult) -> Self {
        Self {
            case_id: case.id.clone(),
            child_name: case.child_name.clone(),
            status: case.status,
            created_at: format_ts_iso(case.created_at),
            scores,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The case was stored. `candidates` is the full comparison, best first.
    Created {
        case: CaseRecord,
        candidates: Vec<DuplicateCandidate>,
    },
    /// Likely duplicates were found; nothing was stored.
    Blocked {
        threshold: f64,
        candidates: Vec<DuplicateCandidate>,
    },
}

/// Turn a draft into a complete submission, reporting every problem at once.
pub fn validate(draft: &NewCase) -> Result<CaseSubmission, CaseError> {
    let mut problems = Vec::new();

    let child_name = required(&mut problems, "child_name", &draft.child_name);
    let location = required(&mut problems, "location", &draft.location);
    let description = required(&mut problems, "description", &draft.description);
    let contact_info = required(&mut problems, "contact_info", &draft.contact_info);

    let age = match draft.age {
        Some(age) if (MIN_AGE..=MAX_AGE).contains(&age) => age,
        Some(age) => {
            problems.push(format!(
                "age {} is outside {}..={}",
                age, MIN_AGE, MAX_AGE
            ));
            0
        }
        None => {
            problems.push("age is required".to_string());
            0
        }
    };

    let case_type = draft.case_type;
    if case_type.is_none() {
        problems.push("case_type is required".to_string());
    }

    let image_url = match draft.image_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(url) => match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(url.to_string()),
            _ => {
                problems.push(format!("image_url '{}' is not an http(s) URL", url));
                None
            }
        },
    };

    let physical_traits = match &draft.physical_traits {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(raw)) => {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(_) => Some(raw.trim().to_string()),
                Err(e) => {
                    problems.push(format!("physical_traits is not valid JSON: {}", e));
                    None
                }
            }
        }
        Some(value) => Some(value.to_string()),
    };

    let reporter = draft
        .reporter
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from);

    match case_type {
        Some(case_type) if problems.is_empty() => Ok(CaseSubmission {
            child_name,
            age,
            location,
            description,
            contact_info,
            case_type,
            image_url,
            physical_traits,
            reporter,
        }),
        _ => Err(CaseError::Invalid(problems.join("; "))),
    }
}

fn required(problems: &mut Vec<String>, field: &str, value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            problems.push(format!("{} is required", field));
            String::new()
        }
    }
}

/// Compare a draft with the most recent stored cases, best match first.
///
/// Scoring failures never surface here (they lower individual scores);
/// only database errors do.
pub async fn check_duplicates(
    pool: &SqlitePool,
    matcher: &DuplicateCaseMatcher,
    draft: &NewCase,
    settings: &SubmitSettings,
) -> Result<Vec<DuplicateCandidate>, CaseError> {
    let existing = cases::recent_cases(pool, settings.candidate_limit).await?;

    let mut candidates: Vec<DuplicateCandidate> = stream::iter(existing)
        .map(|case| async move {
            let scores = matcher.compare(draft, &case).await;
            DuplicateCandidate::new(&case, scores)
        })
        .buffer_unordered(settings.max_concurrency.max(1))
        .collect()
        .await;

    candidates.sort_by(|a, b| {
        b.scores
            .overall_similarity
            .partial_cmp(&a.scores.overall_similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(candidates)
}

/// Candidates at or above `threshold`.
pub fn likely_duplicates(
    candidates: &[DuplicateCandidate],
    threshold: f64,
) -> Vec<DuplicateCandidate> {
    candidates
        .iter()
        .filter(|c| c.scores.overall_similarity >= threshold)
        .cloned()
        .collect()
}

/// Validate, check for duplicates, and store the case unless it is held back.
///
/// The check is advisory and does not lock the table: it runs against the
/// cases stored when it starts, so two identical drafts submitted at the
/// same moment can both pass it and both be stored.
pub async fn submit_case(
    pool: &SqlitePool,
    matcher: &DuplicateCaseMatcher,
    settings: &SubmitSettings,
    draft: &NewCase,
    force: bool,
) -> Result<SubmitOutcome, CaseError> {
    let submission = validate(draft)?;
    let candidates = check_duplicates(pool, matcher, draft, settings).await?;

    let suspects = likely_duplicates(&candidates, settings.duplicate_threshold);
    if !suspects.is_empty() && !force {
        tracing::info!(
            suspects = suspects.len(),
            best = suspects[0].scores.overall_similarity,
            "submission held back as a likely duplicate"
        );
        return Ok(SubmitOutcome::Blocked {
            threshold: settings.duplicate_threshold,
            candidates: suspects,
        });
    }
    if !suspects.is_empty() {
        tracing::info!(suspects = suspects.len(), "likely duplicate submitted with force");
    }

    let case = cases::insert_case(pool, &submission).await?;
    Ok(SubmitOutcome::Created { case, candidates })
}

// ============ CLI entry points ============

fn read_draft(path: &Path) -> anyhow::Result<NewCase> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read case file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse case file: {}", path.display()))
}

pub async fn run_submit(config: &Config, path: &Path, force: bool) -> anyhow::Result<()> {
    let draft = read_draft(path)?;
    let matcher = DuplicateCaseMatcher::from_config(&config.matcher)?;
    let settings = SubmitSettings::from(&config.matcher);

    let pool = db::connect(config).await?;
    let outcome = submit_case(&pool, &matcher, &settings, &draft, force).await;
    pool.close().await;

    match outcome? {
        SubmitOutcome::Created { case, candidates } => {
            println!("Case created: {}", case.id);
            if let Some(best) = candidates.first() {
                println!(
                    "closest existing case: {} ({}) overall {:.3}",
                    best.case_id, best.child_name, best.scores.overall_similarity
                );
            }
        }
        SubmitOutcome::Blocked {
            threshold,
            candidates,
        } => {
            println!(
                "Possible duplicate: {} case(s) at or above {:.2}. Nothing was stored.",
                candidates.len(),
                threshold
            );
            print_candidates(&candidates);
            println!("Re-run with --force to submit anyway.");
        }
    }
    Ok(())
}

pub async fn run_check(config: &Config, path: &Path, limit: Option<usize>) -> anyhow::Result<()> {
    let draft = read_draft(path)?;
    let matcher = DuplicateCaseMatcher::from_config(&config.matcher)?;
    let mut settings = SubmitSettings::from(&config.matcher);
    if limit.is_some() {
        settings.candidate_limit = limit;
    }

    let pool = db::connect(config).await?;
    let candidates = check_duplicates(&pool, &matcher, &draft, &settings).await;
    pool.close().await;
    let candidates = candidates?;

    if candidates.is_empty() {
        println!("No existing cases to compare against.");
        return Ok(());
    }

    println!(
        "Compared against {} case(s) using provider '{}':",
        candidates.len(),
        matcher.provider_name()
    );
    print_candidates(&candidates);
    Ok(())
}

fn print_candidates(candidates: &[DuplicateCandidate]) {
    for candidate in candidates {
        println!();
        println!(
            "{} ({}, {}, {})",
            candidate.case_id, candidate.child_name, candidate.status, candidate.created_at
        );
        print_match(&candidate.scores);
    }
}
