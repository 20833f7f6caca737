//! Case persistence.
//!
//! Cases are created on submission and afterwards only change through
//! [`update_status`] and [`set_blockchain_id`]; nothing here deletes a case.
//! Every mutation bumps `updated_at` and never moves it backwards.
//!
//! The `run_*` functions are the CLI entry points; they load the pool from
//! the configuration and print to stdout.

use chrono::Utc;
use serde::Deserialize;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{format_ts_iso, CaseRecord, CaseStatus, CaseSubmission, CaseType};

/// Errors raised by the case store and the submission flow.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("case not found: {0}")]
    NotFound(String),

    #[error("invalid case: {0}")]
    Invalid(String),

    #[error("cannot move case from {from} to {to}")]
    InvalidTransition { from: CaseStatus, to: CaseStatus },

    #[error("case {id} is already anchored as {existing}")]
    AlreadyAnchored { id: String, existing: String },

    #[error("case {0} was modified concurrently; retry")]
    Conflict(String),

    #[error("stored case is unreadable: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const COLUMNS: &str = "id, child_name, age, location, description, contact_info, case_type, \
     image_url, physical_traits, status, reporter, blockchain_id, created_at, updated_at";

/// Optional filters for [`list_cases`]. Results are always newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseFilter {
    pub reporter: Option<String>,
    pub status: Option<CaseStatus>,
    pub case_type: Option<CaseType>,
    pub limit: Option<i64>,
}

pub async fn insert_case(
    pool: &SqlitePool,
    submission: &CaseSubmission,
) -> Result<CaseRecord, CaseError> {
    let now = Utc::now().timestamp();
    let record = CaseRecord {
        id: Uuid::new_v4().to_string(),
        child_name: submission.child_name.clone(),
        age: submission.age,
        location: submission.location.clone(),
        description: submission.description.clone(),
        contact_info: submission.contact_info.clone(),
        case_type: submission.case_type,
        image_url: submission.image_url.clone(),
        physical_traits: submission.physical_traits.clone(),
        status: CaseStatus::Open,
        reporter: submission.reporter.clone(),
        blockchain_id: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO cases ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&record.id)
    .bind(&record.child_name)
    .bind(record.age)
    .bind(&record.location)
    .bind(&record.description)
    .bind(&record.contact_info)
    .bind(record.case_type.as_str())
    .bind(&record.image_url)
    .bind(&record.physical_traits)
    .bind(record.status.as_str())
    .bind(&record.reporter)
    .bind(&record.blockchain_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    tracing::info!(case_id = %record.id, case_type = %record.case_type, "case created");
    Ok(record)
}

pub async fn get_case(pool: &SqlitePool, id: &str) -> Result<Option<CaseRecord>, CaseError> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM cases WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_case).transpose()
}

/// Like [`get_case`], but a missing case is an error.
pub async fn require_case(pool: &SqlitePool, id: &str) -> Result<CaseRecord, CaseError> {
    get_case(pool, id)
        .await?
        .ok_or_else(|| CaseError::NotFound(id.to_string()))
}

pub async fn list_cases(
    pool: &SqlitePool,
    filter: &CaseFilter,
) -> Result<Vec<CaseRecord>, CaseError> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM cases WHERE 1 = 1"));

    if let Some(reporter) = &filter.reporter {
        query.push(" AND reporter = ").push_bind(reporter.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(case_type) = filter.case_type {
        query.push(" AND case_type = ").push_bind(case_type.as_str());
    }

    query.push(" ORDER BY created_at DESC, rowid DESC");

    if let Some(limit) = filter.limit {
        query.push(" LIMIT ").push_bind(limit.max(0));
    }

    let rows = query.build().fetch_all(pool).await?;
    rows.iter().map(row_to_case).collect()
}

/// The most recent cases, newest first; `None` returns all of them.
pub async fn recent_cases(
    pool: &SqlitePool,
    limit: Option<usize>,
) -> Result<Vec<CaseRecord>, CaseError> {
    list_cases(
        pool,
        &CaseFilter {
            limit: limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX)),
            ..CaseFilter::default()
        },
    )
    .await
}

pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    next: CaseStatus,
) -> Result<CaseRecord, CaseError> {
    let current = require_case(pool, id).await?;

    if !current.status.can_transition_to(next) {
        return Err(CaseError::InvalidTransition {
            from: current.status,
            to: next,
        });
    }

    let updated_at = next_timestamp(current.updated_at);

    // Guarded on the status we validated against.
    let result =
        sqlx::query("UPDATE cases SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(next.as_str())
            .bind(updated_at)
            .bind(id)
            .bind(current.status.as_str())
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(CaseError::Conflict(id.to_string()));
    }

    tracing::info!(case_id = %id, from = %current.status, to = %next, "case status changed");

    Ok(CaseRecord {
        status: next,
        updated_at,
        ..current
    })
}

/// Record the notarization id for a case.
///
/// Setting the same id twice is a no-op; replacing an existing id is refused.
pub async fn set_blockchain_id(
    pool: &SqlitePool,
    id: &str,
    blockchain_id: &str,
) -> Result<CaseRecord, CaseError> {
    let blockchain_id = blockchain_id.trim();
    if blockchain_id.is_empty() {
        return Err(CaseError::Invalid("blockchain id must not be empty".into()));
    }

    let current = require_case(pool, id).await?;

    if let Some(existing) = current.blockchain_id.clone() {
        if existing == blockchain_id {
            return Ok(current);
        }
        return Err(CaseError::AlreadyAnchored {
            id: id.to_string(),
            existing,
        });
    }

    let updated_at = next_timestamp(current.updated_at);

    let result = sqlx::query(
        "UPDATE cases SET blockchain_id = ?, updated_at = ? WHERE id = ? AND blockchain_id IS NULL",
    )
    .bind(blockchain_id)
    .bind(updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CaseError::Conflict(id.to_string()));
    }

    tracing::info!(case_id = %id, blockchain_id = %blockchain_id, "case anchored");

    Ok(CaseRecord {
        blockchain_id: Some(blockchain_id.to_string()),
        updated_at,
        ..current
    })
}

fn next_timestamp(previous: i64) -> i64 {
    Utc::now().timestamp().max(previous)
}

fn row_to_case(row: &SqliteRow) -> Result<CaseRecord, CaseError> {
    let case_type: String = row.try_get("case_type")?;
    let status: String = row.try_get("status")?;

    Ok(CaseRecord {
        id: row.try_get("id")?,
        child_name: row.try_get("child_name")?,
        age: row.try_get("age")?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        contact_info: row.try_get("contact_info")?,
        case_type: case_type
            .parse()
            .map_err(|e: anyhow::Error| CaseError::Corrupt(e.to_string()))?,
        image_url: row.try_get("image_url")?,
        physical_traits: row.try_get("physical_traits")?,
        status: status
            .parse()
            .map_err(|e: anyhow::Error| CaseError::Corrupt(e.to_string()))?,
        reporter: row.try_get("reporter")?,
        blockchain_id: row.try_get("blockchain_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============ CLI entry points ============

pub async fn run_get(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let case = require_case(&pool, id).await;
    pool.close().await;

    print_case(&case?);
    Ok(())
}

pub async fn run_list(config: &Config, filter: &CaseFilter) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let cases = list_cases(&pool, filter).await;
    pool.close().await;
    let cases = cases?;

    if cases.is_empty() {
        println!("No cases found.");
        return Ok(());
    }

    for case in &cases {
        println!(
            "{}  {:<13} {:<10} {} ({}), {}  [{}]",
            case.id,
            case.status,
            case.case_type,
            case.child_name,
            case.age,
            case.location,
            format_ts_iso(case.created_at)
        );
    }
    println!("{} case(s).", cases.len());
    Ok(())
}

pub async fn run_status(config: &Config, id: &str, status: CaseStatus) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let updated = update_status(&pool, id, status).await;
    pool.close().await;

    let updated = updated?;
    println!("Case {} is now {}.", updated.id, updated.status);
    Ok(())
}

pub async fn run_anchor(config: &Config, id: &str, blockchain_id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let updated = set_blockchain_id(&pool, id, blockchain_id).await;
    pool.close().await;

    let updated = updated?;
    println!(
        "Case {} anchored as {}.",
        updated.id,
        updated.blockchain_id.as_deref().unwrap_or_default()
    );
    Ok(())
}

pub(crate) fn print_case(case: &CaseRecord) {
    println!("--- Case ---");
    println!("id:            {}", case.id);
    println!("child_name:    {}", case.child_name);
    println!("age:           {}", case.age);
    println!("location:      {}", case.location);
    println!("case_type:     {}", case.case_type);
    println!("status:        {}", case.status);
    println!("contact_info:  {}", case.contact_info);
    if let Some(ref url) = case.image_url {
        println!("image_url:     {}", url);
    }
    if let Some(ref traits) = case.physical_traits {
        println!("traits:        {}", traits);
    }
    if let Some(ref reporter) = case.reporter {
        println!("reporter:      {}", reporter);
    }
    if let Some(ref chain_id) = case.blockchain_id {
        println!("blockchain_id: {}", chain_id);
    }
    println!("created_at:    {}", format_ts_iso(case.created_at));
    println!("updated_at:    {}", format_ts_iso(case.updated_at));
    println!();
    println!("--- Description ---");
    println!("{}", case.description);
}
