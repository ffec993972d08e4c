//! SQLite schema and migrations for the correlation store.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL lets readers proceed while the reclaimer purges
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = get_schema_version(conn).unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS phase_correlations (
            id TEXT PRIMARY KEY,
            source_phase TEXT NOT NULL,
            target_phase TEXT NOT NULL,
            correlation_type TEXT NOT NULL,
            strength REAL NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            timestamp TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS performance_improvements (
            id TEXT PRIMARY KEY,
            phase TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            baseline_value REAL NOT NULL,
            current_value REAL NOT NULL,
            improvement_percentage REAL NOT NULL,
            correlation_factors TEXT NOT NULL DEFAULT '{}',
            timestamp TEXT NOT NULL,
            validation_status TEXT NOT NULL DEFAULT 'pending'
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_correlations_source ON phase_correlations(source_phase)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_correlations_target ON phase_correlations(target_phase)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_correlations_timestamp ON phase_correlations(timestamp)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_performance_phase ON performance_improvements(phase)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_performance_timestamp ON performance_improvements(timestamp)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master
         WHERE type='table' AND name IN ('phase_correlations', 'performance_improvements')",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count == 2)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!is_initialized(&conn));

        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_wal_mode() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        // In-memory databases report "memory"; file databases report "wal"
        assert!(mode == "memory" || mode == "wal");
    }
}
