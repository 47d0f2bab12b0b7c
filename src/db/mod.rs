//! Database module for SQLite persistence.
//!
//! SQLite backs the remote sync gateway and is the source of truth for
//! all partner-interaction data.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create tables if they don't exist
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS partner_status (
            user_id TEXT PRIMARY KEY,
            heartbeat_active INTEGER NOT NULL DEFAULT 0,
            current_bpm REAL,
            charge_level REAL NOT NULL DEFAULT 0,
            is_online INTEGER NOT NULL DEFAULT 0,
            connection_strength INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS synchro_sessions (
            id TEXT PRIMARY KEY,
            initiator_id TEXT NOT NULL,
            partner_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT,
            duration_seconds INTEGER,
            sync_quality TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS serendipity_bursts (
            id TEXT PRIMARY KEY,
            from_user TEXT NOT NULL,
            to_user TEXT NOT NULL,
            burst_type TEXT NOT NULL,
            content TEXT NOT NULL,
            emotion TEXT,
            created_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cooperative_quests (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            user_id TEXT NOT NULL,
            partner_id TEXT NOT NULL,
            reward TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deadline TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            progress REAL NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quest_steps (
            id TEXT PRIMARY KEY,
            quest_id TEXT NOT NULL REFERENCES cooperative_quests(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            assigned_to TEXT NOT NULL,
            requires_both INTEGER NOT NULL DEFAULT 0,
            is_completed INTEGER NOT NULL DEFAULT 0,
            completed_by TEXT,
            completed_at TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quest_step_completions (
            step_id TEXT NOT NULL REFERENCES quest_steps(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (step_id, user_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_synchro_pair ON synchro_sessions(initiator_id, partner_id, status);
        CREATE INDEX IF NOT EXISTS idx_bursts_pair ON serendipity_bursts(from_user, to_user, created_at);
        CREATE INDEX IF NOT EXISTS idx_quests_pair ON cooperative_quests(user_id, partner_id, is_active);
        CREATE INDEX IF NOT EXISTS idx_steps_quest ON quest_steps(quest_id, position);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
