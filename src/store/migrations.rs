//! Version-tracked migrations for the item store.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones, in order.

use libsql::Connection;
use tracing::info;

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
        name: "items",
        sql: r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY COLLATE NOCASE,
                name TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pre_work_in',
                client_name TEXT NOT NULL,
                client_group TEXT,
                group_reference TEXT,
                contact_email TEXT,
                contact_phone TEXT,
                partner_name TEXT,
                manager_name TEXT,
                due_date TEXT,
                bookkeeping INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_items_state ON items(state);
            CREATE INDEX IF NOT EXISTS idx_items_due_date ON items(due_date);

            CREATE TABLE IF NOT EXISTS related_entities (
                item_id TEXT NOT NULL COLLATE NOCASE REFERENCES items(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                due_date TEXT,
                PRIMARY KEY (item_id, position)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "workflows",
        sql: r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL COLLATE NOCASE REFERENCES items(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                requester_contact TEXT,
                recipient TEXT,
                note TEXT,
                initiated_at TEXT NOT NULL,
                responded_at TEXT,
                first_reminder_at TEXT,
                second_reminder_at TEXT,
                final_notice_at TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_workflows_item ON workflows(item_id);
            CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
        "#,
    },
    Migration {
        version: 3,
        name: "workflow_stops",
        sql: r#"
            ALTER TABLE workflows ADD COLUMN stopped_by TEXT;
            ALTER TABLE workflows ADD COLUMN stop_reason TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
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
            info!(
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

    info!(
        version = get_current_version(conn).await?,
        "Item store migrations complete"
    );
    Ok(())
}

/// Highest applied migration version, or 0 if none.
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

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
