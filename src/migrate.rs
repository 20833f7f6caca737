use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            id TEXT PRIMARY KEY,
            child_name TEXT NOT NULL,
            age INTEGER NOT NULL CHECK (age >= 0 AND age <= 18),
            location TEXT NOT NULL,
            description TEXT NOT NULL,
            contact_info TEXT NOT NULL,
            case_type TEXT NOT NULL CHECK (case_type IN ('missing', 'labour', 'harassment')),
            image_url TEXT,
            physical_traits TEXT,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'investigating', 'resolved')),
            reporter TEXT,
            blockchain_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_created_at ON cases(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_reporter ON cases(reporter)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status)")
        .execute(pool)
        .await?;

    Ok(())
}
