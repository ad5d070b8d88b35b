use chrono::{DateTime, Utc};
use eyre::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Postgres, Row, Sqlite};
use std::str::FromStr;
use tracing::{info, warn};

use crate::models::{BundleOutcome, BundleSubmission, PositionState, Pubkey};

/// Database connection enum that can hold either PostgreSQL or SQLite connections
#[derive(Clone)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
}

/// A journaled lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub asset_id: String,
    pub from_state: String,
    pub to_state: String,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Detect database type from connection string
fn detect_database_type(database_url: &str) -> Result<&'static str> {
    if database_url.starts_with("postgresql://") || database_url.starts_with("postgres://") {
        Ok("postgres")
    } else if database_url.starts_with("sqlite:") {
        Ok("sqlite")
    } else {
        Err(eyre::eyre!("Unsupported database type in URL: {}", database_url))
    }
}

/// Open the audit journal and make sure its tables exist.
pub async fn init_database(database_url: &str) -> Result<DatabasePool> {
    let db_type = detect_database_type(database_url)?;
    info!("Detected database type: {}", db_type);

    let pool = match db_type {
        "postgres" => {
            info!("🐘 Connecting to PostgreSQL database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            DatabasePool::Postgres(pool)
        }
        "sqlite" => {
            info!("🗄️ Connecting to SQLite database...");
            let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            // An in-memory database only lives as long as its single connection
            let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;
            DatabasePool::Sqlite(pool)
        }
        _ => return Err(eyre::eyre!("Unsupported database type: {}", db_type)),
    };

    create_tables(&pool).await?;
    Ok(pool)
}

/// Create journal tables for both PostgreSQL and SQLite
pub async fn create_tables(db_pool: &DatabasePool) -> Result<()> {
    match db_pool {
        DatabasePool::Postgres(pool) => {
            info!("Creating PostgreSQL tables...");

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS position_transitions (
                    id BIGSERIAL PRIMARY KEY,
                    asset_id VARCHAR NOT NULL,
                    from_state VARCHAR NOT NULL,
                    to_state VARCHAR NOT NULL,
                    reason VARCHAR,
                    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS bundle_submissions (
                    bundle_id VARCHAR PRIMARY KEY,
                    asset_id VARCHAR NOT NULL,
                    leg VARCHAR NOT NULL,
                    attempt BIGINT NOT NULL,
                    slot BIGINT NOT NULL,
                    blockhash VARCHAR NOT NULL,
                    operations BIGINT NOT NULL,
                    outcome VARCHAR NOT NULL,
                    reason VARCHAR,
                    submitted_at TIMESTAMPTZ NOT NULL,
                    resolved_at TIMESTAMPTZ
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_position_transitions_asset ON position_transitions(asset_id);")
                .execute(pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_bundle_submissions_asset ON bundle_submissions(asset_id);")
                .execute(pool)
                .await?;
        }
        DatabasePool::Sqlite(pool) => {
            info!("Creating SQLite tables...");

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS position_transitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    asset_id TEXT NOT NULL,
                    from_state TEXT NOT NULL,
                    to_state TEXT NOT NULL,
                    reason TEXT,
                    recorded_at DATETIME NOT NULL
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS bundle_submissions (
                    bundle_id TEXT PRIMARY KEY,
                    asset_id TEXT NOT NULL,
                    leg TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    slot INTEGER NOT NULL,
                    blockhash TEXT NOT NULL,
                    operations INTEGER NOT NULL,
                    outcome TEXT NOT NULL,
                    reason TEXT,
                    submitted_at DATETIME NOT NULL,
                    resolved_at DATETIME
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_position_transitions_asset ON position_transitions(asset_id);")
                .execute(pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_bundle_submissions_asset ON bundle_submissions(asset_id);")
                .execute(pool)
                .await?;
        }
    }

    info!("✅ Journal tables ready");
    Ok(())
}

/// Append a lifecycle transition to the journal.
pub async fn record_transition(
    db_pool: &DatabasePool,
    asset_id: &Pubkey,
    from: PositionState,
    to: PositionState,
    reason: Option<&str>,
) -> Result<()> {
    let asset_str = asset_id.to_string();
    let now = Utc::now();

    match db_pool {
        DatabasePool::Postgres(pool) => {
            sqlx::query(
                r#"
                INSERT INTO position_transitions (asset_id, from_state, to_state, reason, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&asset_str)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(reason)
            .bind(now)
            .execute(pool)
            .await?;
        }
        DatabasePool::Sqlite(pool) => {
            sqlx::query(
                r#"
                INSERT INTO position_transitions (asset_id, from_state, to_state, reason, recorded_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&asset_str)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(reason)
            .bind(now)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Save a bundle submission record. Resubmitting the same id overwrites it.
pub async fn record_submission(db_pool: &DatabasePool, submission: &BundleSubmission) -> Result<()> {
    let asset_str = submission.asset_id.to_string();
    let blockhash_str = submission.snapshot_used.blockhash.to_string();
    let slot = i64::try_from(submission.snapshot_used.slot)?;
    let attempt = i64::from(submission.attempt);
    let operations = i64::try_from(submission.instructions.len())?;
    let reason = match &submission.outcome {
        BundleOutcome::Rejected(reason) => Some(reason.as_str()),
        _ => None,
    };

    match db_pool {
        DatabasePool::Postgres(pool) => {
            sqlx::query(
                r#"
                INSERT INTO bundle_submissions (
                    bundle_id, asset_id, leg, attempt, slot, blockhash,
                    operations, outcome, reason, submitted_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (bundle_id)
                DO UPDATE SET
                    attempt = EXCLUDED.attempt,
                    slot = EXCLUDED.slot,
                    blockhash = EXCLUDED.blockhash,
                    outcome = EXCLUDED.outcome,
                    reason = EXCLUDED.reason,
                    submitted_at = EXCLUDED.submitted_at
                "#,
            )
            .bind(&submission.bundle_id)
            .bind(&asset_str)
            .bind(submission.leg.as_str())
            .bind(attempt)
            .bind(slot)
            .bind(&blockhash_str)
            .bind(operations)
            .bind(submission.outcome.as_str())
            .bind(reason)
            .bind(submission.submitted_at)
            .execute(pool)
            .await?;
        }
        DatabasePool::Sqlite(pool) => {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO bundle_submissions (
                    bundle_id, asset_id, leg, attempt, slot, blockhash,
                    operations, outcome, reason, submitted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&submission.bundle_id)
            .bind(&asset_str)
            .bind(submission.leg.as_str())
            .bind(attempt)
            .bind(slot)
            .bind(&blockhash_str)
            .bind(operations)
            .bind(submission.outcome.as_str())
            .bind(reason)
            .bind(submission.submitted_at)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Mark a journaled bundle as resolved. Returns false when the id is unknown.
pub async fn record_outcome(db_pool: &DatabasePool, bundle_id: &str, outcome: &BundleOutcome) -> Result<bool> {
    let reason = match outcome {
        BundleOutcome::Rejected(reason) => Some(reason.as_str()),
        _ => None,
    };
    let now = Utc::now();

    let rows = match db_pool {
        DatabasePool::Postgres(pool) => {
            sqlx::query(
                "UPDATE bundle_submissions SET outcome = $1, reason = $2, resolved_at = $3 WHERE bundle_id = $4",
            )
            .bind(outcome.as_str())
            .bind(reason)
            .bind(now)
            .bind(bundle_id)
            .execute(pool)
            .await?
            .rows_affected()
        }
        DatabasePool::Sqlite(pool) => {
            sqlx::query(
                "UPDATE bundle_submissions SET outcome = ?, reason = ?, resolved_at = ? WHERE bundle_id = ?",
            )
            .bind(outcome.as_str())
            .bind(reason)
            .bind(now)
            .bind(bundle_id)
            .execute(pool)
            .await?
            .rows_affected()
        }
    };

    Ok(rows > 0)
}

/// Transitions journaled for one asset, oldest first
pub async fn transitions_for(db_pool: &DatabasePool, asset_id: &Pubkey) -> Result<Vec<TransitionRecord>> {
    let asset_str = asset_id.to_string();

    let records = match db_pool {
        DatabasePool::Postgres(pool) => {
            sqlx::query(
                "SELECT asset_id, from_state, to_state, reason, recorded_at FROM position_transitions WHERE asset_id = $1 ORDER BY id",
            )
            .bind(&asset_str)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| TransitionRecord {
                asset_id: row.get("asset_id"),
                from_state: row.get("from_state"),
                to_state: row.get("to_state"),
                reason: row.get("reason"),
                recorded_at: row.get("recorded_at"),
            })
            .collect()
        }
        DatabasePool::Sqlite(pool) => {
            sqlx::query(
                "SELECT asset_id, from_state, to_state, reason, recorded_at FROM position_transitions WHERE asset_id = ? ORDER BY id",
            )
            .bind(&asset_str)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| TransitionRecord {
                asset_id: row.get("asset_id"),
                from_state: row.get("from_state"),
                to_state: row.get("to_state"),
                reason: row.get("reason"),
                recorded_at: row.get("recorded_at"),
            })
            .collect()
        }
    };

    Ok(records)
}

/// Count of journaled bundles with the given outcome label
pub async fn submission_count(db_pool: &DatabasePool, outcome: &str) -> Result<i64> {
    let count = match db_pool {
        DatabasePool::Postgres(pool) => {
            sqlx::query("SELECT COUNT(*) AS count FROM bundle_submissions WHERE outcome = $1")
                .bind(outcome)
                .fetch_one(pool)
                .await?
                .get::<i64, _>("count")
        }
        DatabasePool::Sqlite(pool) => {
            sqlx::query("SELECT COUNT(*) AS count FROM bundle_submissions WHERE outcome = ?")
                .bind(outcome)
                .fetch_one(pool)
                .await?
                .get::<i64, _>("count")
        }
    };
    Ok(count)
}

/// Journal writes never block the pipeline; failures are only logged.
pub async fn journal_transition(
    db_pool: Option<&DatabasePool>,
    asset_id: &Pubkey,
    from: PositionState,
    to: PositionState,
    reason: Option<&str>,
) {
    if let Some(pool) = db_pool {
        if let Err(e) = record_transition(pool, asset_id, from, to, reason).await {
            warn!("⚠️ Failed to journal transition {} -> {} for {}: {}", from, to, asset_id, e);
        }
    }
}

pub async fn journal_submission(db_pool: Option<&DatabasePool>, submission: &BundleSubmission) {
    if let Some(pool) = db_pool {
        if let Err(e) = record_submission(pool, submission).await {
            warn!("⚠️ Failed to journal bundle {}: {}", submission.bundle_id, e);
        }
    }
}

pub async fn journal_outcome(db_pool: Option<&DatabasePool>, bundle_id: &str, outcome: &BundleOutcome) {
    if let Some(pool) = db_pool {
        match record_outcome(pool, bundle_id, outcome).await {
            Ok(true) => {}
            Ok(false) => warn!("⚠️ Outcome for unjournaled bundle {}", bundle_id),
            Err(e) => warn!("⚠️ Failed to journal outcome for bundle {}: {}", bundle_id, e),
        }
    }
}
