//! Versioned schema migrations, recorded in `_migrations`.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// Skipped when the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_generation_jobs_and_steps",
        sql: include_str!("sql/001_create_generation_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_queue_messages",
        sql: include_str!("sql/002_create_queue_messages.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_shops",
        sql: include_str!("sql/003_create_shops.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "add_cancelled_at_to_generation_jobs",
        sql: include_str!("sql/004_add_cancelled_at.sql"),
        kind: MigrationKind::AddColumn {
            table: "generation_jobs",
            column: "cancelled_at",
        },
    },
];

/// Applies every migration newer than the recorded version. Each migration
/// and its `_migrations` row commit in one transaction.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        apply(&tx, migration)?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    if let MigrationKind::AddColumn { table, column } = migration.kind {
        if column_exists(conn, table, column)? {
            log::debug!(
                "Migration v{}: {}.{} already present",
                migration.version,
                table,
                column
            );
            return Ok(());
        }
    }

    log::info!(
        "Applying migration v{}: {}",
        migration.version,
        migration.description
    );
    conn.execute_batch(migration.sql)
        .map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}
