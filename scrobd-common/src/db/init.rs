//! Database initialization
//!
//! Creates the SQLite database on first run, applies PRAGMAs, creates all
//! tables idempotently, and seeds default settings and the anonymous user.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Stable GUID of the built-in anonymous user
pub const ANONYMOUS_USER_GUID: &str = "00000000-0000-0000-0000-000000000001";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_pool(&pool).await?;
    Ok(pool)
}

/// Initialize an in-memory database (tests)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_pool(&pool).await?;
    Ok(pool)
}

/// Apply PRAGMAs, create schema, seed defaults on an already-open pool
pub async fn init_pool(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; webhook bursts and import
    // jobs hit the same file
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    // Migrations (idempotent - safe to call multiple times)
    create_users_table(pool).await?;
    create_settings_table(pool).await?;
    create_media_table(pool).await?;
    create_places_table(pool).await?;
    create_scrobbles_table(pool).await?;
    create_import_jobs_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            guid TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            completion_overrides TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create Anonymous user if it doesn't exist
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO users (guid, username, timezone)
        VALUES (?, 'Anonymous', 'UTC')
        "#,
    )
    .bind(ANONYMOUS_USER_GUID)
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the media catalog table
///
/// One row per trackable entity across all kinds; the kind tag plus GUID form
/// the tagged reference scrobbles carry.
pub async fn create_media_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media (
            guid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            external_id TEXT,
            run_time_seconds INTEGER,
            total_pages INTEGER,
            completion_percent INTEGER,
            latitude REAL,
            longitude REAL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (run_time_seconds IS NULL OR run_time_seconds > 0),
            CHECK (total_pages IS NULL OR total_pages > 0),
            CHECK (completion_percent IS NULL OR (completion_percent >= 0 AND completion_percent <= 100))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_kind_external ON media(kind, external_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_kind_title ON media(kind, title)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the known named places table
///
/// A fix near a named place does not fragment an ongoing location session.
pub async fn create_places_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS places (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            proximity_degrees REAL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scrobbles table
///
/// One row per (user, media, session). All instants are epoch seconds UTC.
pub async fn create_scrobbles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrobbles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            media_kind TEXT NOT NULL,
            media_id TEXT NOT NULL,
            user_id TEXT NOT NULL REFERENCES users(guid),
            timestamp INTEGER NOT NULL,
            stop_timestamp INTEGER,
            playback_position_seconds INTEGER,
            in_progress INTEGER NOT NULL DEFAULT 1,
            is_paused INTEGER NOT NULL DEFAULT 0,
            played_to_completion INTEGER NOT NULL DEFAULT 0,
            long_play_seconds INTEGER,
            long_play_pages INTEGER,
            long_play_complete INTEGER,
            book_pages_read INTEGER,
            source TEXT NOT NULL DEFAULT 'unknown',
            log TEXT,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            updated_at INTEGER NOT NULL,
            CHECK (playback_position_seconds IS NULL OR playback_position_seconds >= 0),
            CHECK (long_play_complete IS NULL OR long_play_complete IN (0, 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scrobbles_key ON scrobbles(media_kind, media_id, user_id, timestamp)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scrobbles_in_progress ON scrobbles(in_progress, media_kind)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scrobbles_user_time ON scrobbles(user_id, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the import_jobs table
///
/// Start/finish bracketing with a nullable finish time as the "did it
/// complete" signal, plus a JSON log of created record GUIDs for undo.
pub async fn create_import_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            guid TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            user_id TEXT NOT NULL REFERENCES users(guid),
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            created_guids TEXT NOT NULL DEFAULT '[]',
            skipped_count INTEGER NOT NULL DEFAULT 0,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_jobs_source ON import_jobs(source, user_id, started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all tunable reconciliation settings exist with default values.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "zombie_age_seconds", "259200").await?;
    ensure_setting(pool, "assume_complete_when_runtime_unknown", "true").await?;
    ensure_setting(pool, "location_movement_epsilon_degrees", "0.001").await?;
    ensure_setting(pool, "location_known_place_radius_degrees", "0.002").await?;
    ensure_setting(pool, "location_history_window", "3").await?;
    ensure_setting(pool, "long_play_session_gap_seconds", "1800").await?;
    ensure_setting(pool, "long_play_session_page_jump", "10").await?;
    ensure_setting(pool, "zombie_sweep_interval_seconds", "3600").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!(
            "Setting '{}' was NULL, reset to default: {}",
            key, default_value
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        // Running the whole init a second time must not error
        init_pool(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn anonymous_user_seeded() {
        let pool = init_memory_database().await.unwrap();
        let username: String = sqlx::query_scalar("SELECT username FROM users WHERE guid = ?")
            .bind(ANONYMOUS_USER_GUID)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(username, "Anonymous");
    }

    #[tokio::test]
    async fn default_settings_seeded() {
        let pool = init_memory_database().await.unwrap();
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'zombie_age_seconds'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert_eq!(value.as_deref(), Some("259200"));
    }
}
