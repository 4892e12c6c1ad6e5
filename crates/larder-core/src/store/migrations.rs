//! Schema migrations for the libSQL record store

use crate::error::Result;
use libsql::Connection;

/// One schema step: its version and the statements that reach it.
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "record table keyed by domain and sync UUID",
        statements: &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS records (
                domain TEXT NOT NULL,
                uuid TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (domain, uuid)
            )",
            "CREATE INDEX IF NOT EXISTS idx_records_domain_updated ON records(domain, updated_at DESC)",
        ],
    },
    Migration {
        version: 2,
        description: "older versions never overwrite newer ones",
        statements: &["CREATE TRIGGER IF NOT EXISTS records_version_guard BEFORE UPDATE ON records
             FOR EACH ROW
             WHEN NEW.version < OLD.version
             BEGIN
                 SELECT RAISE(IGNORE);
             END"],
    },
];

/// Bring the schema up to the latest version. Already applied steps are skipped.
pub async fn run(conn: &Connection) -> Result<()> {
    let current = schema_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|migration| migration.version > current) {
        apply(conn, migration).await?;
        tracing::info!(
            "Migrated record store to version {} ({})",
            migration.version,
            migration.description
        );
    }
    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            (),
        )
        .await?;
    let has_table = match rows.next().await? {
        Some(row) => row.get::<i64>(0)? > 0,
        None => false,
    };
    if !has_table {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<i64>(0)?),
        None => Ok(0),
    }
}

/// Run one migration and record it, all inside a single transaction.
async fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute("BEGIN IMMEDIATE", ()).await?;

    let outcome = async {
        for statement in migration.statements {
            conn.execute(statement, ()).await?;
        }
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            libsql::params![migration.version],
        )
        .await?;
        conn.execute("COMMIT", ()).await?;
        Ok::<_, libsql::Error>(())
    }
    .await;

    if let Err(error) = outcome {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    Ok(())
}
