//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                category INTEGER NOT NULL DEFAULT 0,
                feature_type INTEGER NOT NULL DEFAULT 0,
                intent_stage INTEGER NOT NULL DEFAULT 0,
                owner_emails TEXT NOT NULL DEFAULT '[]',
                editor_emails TEXT NOT NULL DEFAULT '[]',
                cc_emails TEXT NOT NULL DEFAULT '[]',
                motivation TEXT,
                spec_link TEXT,
                bug_url TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feature_id INTEGER NOT NULL,
                stage_type INTEGER NOT NULL,
                milestones TEXT NOT NULL DEFAULT '{}',
                intent_thread_url TEXT,
                experiment_goals TEXT,
                experiment_risks TEXT,
                experiment_extension_reason TEXT,
                announcement_url TEXT,
                ot_display_name TEXT,
                rollout_url TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_stages_feature ON stages(feature_id);

            CREATE TABLE IF NOT EXISTS gates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feature_id INTEGER NOT NULL,
                stage_id INTEGER NOT NULL,
                gate_type INTEGER NOT NULL,
                state INTEGER NOT NULL,
                requested_on TEXT,
                responded_on TEXT,
                assignee_emails TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_gates_feature ON gates(feature_id);
            CREATE INDEX IF NOT EXISTS idx_gates_stage ON gates(stage_id);

            CREATE TABLE IF NOT EXISTS votes (
                feature_id INTEGER NOT NULL,
                gate_id INTEGER NOT NULL,
                gate_type INTEGER NOT NULL,
                set_by TEXT NOT NULL,
                set_on TEXT NOT NULL,
                state INTEGER NOT NULL,
                PRIMARY KEY (gate_id, set_by)
            );
            CREATE INDEX IF NOT EXISTS idx_votes_feature ON votes(feature_id);

            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                feature_id INTEGER NOT NULL,
                gate_id INTEGER,
                author TEXT,
                content TEXT,
                amendments TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activities_feature ON activities(feature_id);

            CREATE TABLE IF NOT EXISTS user_prefs (
                email TEXT PRIMARY KEY,
                notify_as_starrer INTEGER NOT NULL DEFAULT 1,
                bounced INTEGER NOT NULL DEFAULT 0
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
