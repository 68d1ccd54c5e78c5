//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table,
//! and is applied together with its version record in one transaction.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Back up the database before applying migrations.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. Skipped for a brand-new database, which has
/// nothing worth keeping.
fn backup_before_migration(conn: &Connection, current: i32) -> Result<(), String> {
    if current == 0 {
        return Ok(());
    }

    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), String> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("Migration v{} could not start: {}", migration.version, e))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))
        .and_then(|_| {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [migration.version],
            )
            .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))
        });

    match result {
        Ok(_) => conn
            .execute_batch("COMMIT")
            .map_err(|e| format!("Migration v{} could not commit: {}", migration.version, e)),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: if the database has a higher version than the highest
/// known migration, returns an error instead of touching it.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    run_pending(conn, MIGRATIONS)
}

fn run_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = migrations.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build supports ({}). \
             Upgrade sitebudget before opening this database.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn, current)?;

    for migration in &pending {
        apply(conn, migration)?;
        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1, "should apply exactly 1 migration (baseline)");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);

        conn.execute(
            "INSERT INTO projects (id, name, budget, status, created_at, updated_at)
             VALUES ('p1', 'Riverside', '1000000', 'planning', '2026-01-01', '2026-01-01')",
            [],
        )
        .expect("projects table should exist");

        conn.execute(
            "INSERT INTO project_phases (id, project_id, phase_number, phase_name,
             budget_allocated, budget_used, status, created_at, updated_at)
             VALUES ('ph1', 'p1', 1, 'Foundations', '300000', '0', 'planning',
             '2026-01-01', '2026-01-01')",
            [],
        )
        .expect("project_phases table should exist");

        let dup = conn.execute(
            "INSERT INTO project_phases (id, project_id, phase_number, phase_name,
             created_at, updated_at)
             VALUES ('ph2', 'p1', 1, 'Duplicate', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(dup.is_err(), "phase numbers must be unique per project");
    }

    #[test]
    fn test_contract_number_unique_constraint() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES ('p1', 'P', 'x', 'x');
             INSERT INTO project_phases (id, project_id, phase_number, phase_name, created_at, updated_at)
                VALUES ('ph1', 'p1', 1, 'Shell', 'x', 'x');
             INSERT INTO subcontractors (id, name, created_at, updated_at) VALUES ('s1', 'S', 'x', 'x');
             INSERT INTO contracts (id, project_id, phase_id, subcontractor_id, contract_number,
                created_at, updated_at)
                VALUES ('c1', 'p1', 'ph1', 's1', 'CNT-2026-0001', 'x', 'x');",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO contracts (id, project_id, phase_id, subcontractor_id, contract_number,
                created_at, updated_at)
             VALUES ('c2', 'p1', 'ph1', 's1', 'CNT-2026-0001', 'x', 'x')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();

        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let result = run_migrations(&conn);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(
            err.contains("newer than this build"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();

        let first = run_migrations(&conn).expect("first run");
        assert_eq!(first, 1);

        let second = run_migrations(&conn).expect("second run");
        assert_eq!(second, 0, "second run should apply no migrations");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);
    }

    #[test]
    fn test_fresh_file_db_skips_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("fresh.db");

        let conn = Connection::open(&db_path).expect("open db");
        conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();

        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1);

        let backup_path = dir.path().join("fresh.db.pre-migration.bak");
        assert!(
            !backup_path.exists(),
            "a brand-new database has nothing to back up"
        );
    }
    #[test]
    fn test_pending_migration_backs_up_existing_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("site.db");

        let conn = Connection::open(&db_path).expect("open db");
        run_migrations(&conn).expect("baseline");
        conn.execute(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES ('p1', 'P', 'x', 'x')",
            [],
        )
        .unwrap();

        let with_followup = [
            Migration {
                version: 1,
                sql: MIGRATIONS[0].sql,
            },
            Migration {
                version: 2,
                sql: "ALTER TABLE projects ADD COLUMN site_address TEXT;",
            },
        ];
        let applied = run_pending(&conn, &with_followup).expect("second migration");
        assert_eq!(applied, 1);
        assert_eq!(current_version(&conn).unwrap(), 2);

        let backup_path = dir.path().join("site.db.pre-migration.bak");
        assert!(backup_path.exists(), "backup should be written before v2");

        // The copy is the v1 database, data included
        let backup = Connection::open(&backup_path).expect("open backup");
        assert_eq!(current_version(&backup).unwrap(), 1);
        let projects: i64 = backup
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(projects, 1);
        let has_column = backup.prepare("SELECT site_address FROM projects").is_ok();
        assert!(!has_column, "backup must predate the new column");
    }
}
