//! Database initialization
//!
//! Both stores are SQLite files opened through sqlx. Tables are created
//! idempotently, so opening an existing database is always safe.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::Result;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT_MS: u64 = 250;

/// Open (creating if needed) a SQLite database with WAL and foreign keys
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Short busy timeout: lock contention is handled by retry_on_lock
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    Ok(pool)
}

/// Open the profile-local project store
pub async fn init_local_database(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    create_projects_table(&pool).await?;
    Ok(pool)
}

/// Open the shared store (projects, memberships, invite codes)
pub async fn init_shared_database(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    create_profiles_table(&pool).await?;
    create_shared_projects_table(&pool).await?;
    create_memberships_table(&pool).await?;
    create_invite_codes_table(&pool).await?;
    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

/// Schema version recorded in the database
pub async fn schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            master_language TEXT NOT NULL,
            target_languages TEXT NOT NULL,
            master_data TEXT NOT NULL,
            translations TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            cloud_project_id TEXT,
            shared_version INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            user_id TEXT PRIMARY KEY,
            email TEXT,
            name TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_shared_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shared_projects (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES profiles(user_id),
            name TEXT NOT NULL,
            master_language TEXT NOT NULL,
            target_languages TEXT NOT NULL,
            master_data TEXT NOT NULL,
            translations TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shared_projects_owner ON shared_projects(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_memberships_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memberships (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES shared_projects(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('editor', 'viewer')),
            created_at TEXT NOT NULL,
            UNIQUE (project_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_invite_codes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invite_codes (
            code TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES shared_projects(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('editor', 'viewer')),
            max_uses INTEGER,
            uses INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK (max_uses IS NULL OR uses <= max_uses)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
