//! Database migrations
//!
//! This module manages SQLite schema migrations for the relationship
//! registry. Migrations are versioned and applied automatically on database
//! connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Initial schema
const MIGRATION_V1: &str = r#"
    -- Nearest-leader relationship records. Rows are never deleted; a closed
    -- relationship has active_to set and stays in place for audit.
    CREATE TABLE IF NOT EXISTS nl_relationships (
        id TEXT PRIMARY KEY NOT NULL,
        employee_id TEXT NOT NULL,
        employer_org_id TEXT NOT NULL,
        manager_id TEXT NOT NULL,
        manager_phone TEXT NOT NULL,
        manager_email TEXT NOT NULL,
        compensation INTEGER,
        active_from TIMESTAMP NOT NULL,
        active_to TIMESTAMP,
        last_modified TIMESTAMP NOT NULL,
        manager_display_name TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_nl_relationships_scope
        ON nl_relationships(employee_id, employer_org_id);
    CREATE INDEX IF NOT EXISTS idx_nl_relationships_manager
        ON nl_relationships(manager_id);

    -- Committed read positions per consumer stream
    CREATE TABLE IF NOT EXISTS consumer_offsets (
        source TEXT PRIMARY KEY NOT NULL,
        next_offset INTEGER NOT NULL DEFAULT 0,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 2: last-resort uniqueness guard
const MIGRATION_V2: &str = r#"
    -- The reconciliation engine enforces at-most-one-active per scope inside
    -- its transaction; this partial index makes the database reject a second
    -- active row if that enforcement ever regresses.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_nl_relationships_one_active
        ON nl_relationships(employee_id, employer_org_id)
        WHERE active_to IS NULL;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(row.0.unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    // Apply migrations in order
    if current_version < 1 {
        tracing::info!("Applying migration v1: Initial schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Single-active uniqueness guard");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Migration status summary
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

/// Check migration status without applying anything
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}
