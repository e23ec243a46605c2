//! SQLite schema migrations.
//!
//! `MIGRATIONS[i]` takes the schema from version `i` to `i + 1`. Pending
//! steps run in one transaction and are recorded in `schema_migrations`.

use rusqlite::{params, Connection};

use crate::error::Result;

/// Ordered migration steps.
const MIGRATIONS: &[&str] = &[
    // v1: versioned entries plus a store-wide version clock
    r#"
    CREATE TABLE kv (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        version INTEGER NOT NULL,
        expires_at INTEGER            -- unix ms, NULL = never
    );
    CREATE INDEX idx_kv_expires ON kv(expires_at);

    CREATE TABLE kv_clock (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL
    );
    INSERT INTO kv_clock (id, version) VALUES (1, 0);
    "#,
];

/// Schema version after every migration has run.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;
    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if applied >= CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![step as u32 + 1, now_ms],
        )?;
    }
    tx.commit()?;
    tracing::debug!(from = applied, to = CURRENT_VERSION, "sqlite schema migrated");
    Ok(())
}
