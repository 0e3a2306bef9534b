//! SQLite schema DDL and migration framework for the on-disk symbol store.

use rusqlite::Connection;

use crate::errors::CodemapResult;

/// Current schema version. Migrations run from whatever the database
/// currently reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

/// Base DDL, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS ingested_uploads (
        upload_id TEXT PRIMARY KEY,
        ingested_at TEXT NOT NULL,
        file_count INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS symbol_records (
        upload_id TEXT NOT NULL REFERENCES ingested_uploads(upload_id) ON DELETE CASCADE,
        ordinal INTEGER NOT NULL,
        path TEXT NOT NULL,
        status TEXT NOT NULL,
        record_json TEXT NOT NULL,
        PRIMARY KEY(upload_id, ordinal)
    );",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the stored version up to
/// [`SCHEMA_VERSION`]. Each step runs inside a SAVEPOINT so a failure rolls
/// back only that step.
pub fn migrate_schema(conn: &Connection) -> CodemapResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT codemap_migrate_step;")?;

        let step_result = (|| -> CodemapResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT codemap_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT codemap_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT codemap_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the schema version from `store_meta`; 0 when absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> CodemapResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> CodemapResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: path lookups and status filtering per upload.
fn migrate_to_v1(conn: &Connection) -> CodemapResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_symbol_records_upload_path \
         ON symbol_records(upload_id, path);",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_symbol_records_upload_status \
         ON symbol_records(upload_id, status);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn migrate_fresh_database() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn migration_creates_lookup_indexes() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'index' AND tbl_name = 'symbol_records' AND name LIKE 'idx_%' \
                 ORDER BY name;",
            )
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            names,
            vec![
                "idx_symbol_records_upload_path".to_string(),
                "idx_symbol_records_upload_status".to_string(),
            ]
        );
    }

    #[test]
    fn migrate_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }
}
