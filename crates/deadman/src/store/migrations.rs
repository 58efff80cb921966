use anyhow::{Context, Result};
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Single source of truth for the schema. The CRUD layer that owns monitor
/// configuration reads and writes these tables but never migrates them.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await.context("migration v1 failed")?;
        record_migration(conn, 1, "Monitors with liveness state").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await.context("migration v2 failed")?;
        record_migration(conn, 2, "Alert records").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors table
///
/// Timestamps are Unix seconds. `version` backs optimistic concurrency.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL CHECK (interval_seconds > 0),
            grace_period_seconds INTEGER NOT NULL DEFAULT 60 CHECK (grace_period_seconds >= 0),
            email_recipient TEXT,
            webhook_url TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            last_ping_at INTEGER,
            last_alert_sent_at INTEGER,
            outage_started_at INTEGER,
            version INTEGER NOT NULL DEFAULT 1
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_status ON monitors(status)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_owner ON monitors(owner)", ()).await?;

    Ok(())
}

/// Migration v2: alert records, keyed by (monitor_id, episode_start)
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS alert_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id TEXT NOT NULL,
            episode_start INTEGER NOT NULL,
            kind TEXT NOT NULL,
            channel TEXT NOT NULL,
            target TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            delivered INTEGER NOT NULL DEFAULT 0,
            closed INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alert_records_episode ON alert_records(monitor_id, episode_start)",
        (),
    )
    .await?;

    Ok(())
}
