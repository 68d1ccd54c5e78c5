//! SQLite-backed working store for projects, phases, contracts and milestones.
//!
//! The database lives at `~/.sitebudget/sitebudget.db` unless the config names
//! another file. Derived figures (`project_phases.budget_used`) are stored as a
//! cache over the contract rows; the services layer rewrites them inside the
//! same transaction as the mutation that changes them, and
//! `services::budget::recalculate_all` repairs any drift on start-up.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;

pub mod types;
pub use types::*;

/// How long a writer waits for another connection's transaction to finish.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BudgetDb {
    conn: Connection,
}

/// Rolls back the open transaction unless it was committed first.
/// Covers early returns and unwinding out of a transaction closure.
struct RollbackOnDrop<'a>(&'a Connection);

impl Drop for RollbackOnDrop<'_> {
    fn drop(&mut self) {
        if !self.0.is_autocommit() {
            if let Err(e) = self.0.execute_batch("ROLLBACK") {
                log::error!("Failed to roll back transaction: {}", e);
            }
        }
    }
}

impl BudgetDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err or if the closure panics.
    ///
    /// Calls made while a transaction is already open run inside it, so a
    /// service can compose other transactional services.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| DbError::Transaction(format!("Failed to begin transaction: {e}")))?;
        let _guard = RollbackOnDrop(&self.conn);

        let val = f(self)?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| DbError::Transaction(format!("Failed to commit transaction: {e}")))?;
        Ok(val)
    }

    /// Open (or create) the default database and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path, creating parent directories.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets readers proceed while one writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Cascades from phases to contracts to milestones rely on this
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.sitebudget/sitebudget.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".sitebudget").join("sitebudget.db"))
    }
}

pub mod contracts;
pub mod milestones;
pub mod phases;
pub mod projects;
pub mod subcontractors;

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::types::{ContractStatus, PhaseStatus, ProjectStatus};

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// Test temp dirs are cleaned up by the OS.
    pub fn test_db() -> BudgetDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        BudgetDb::open_at(path).expect("Failed to open test database")
    }

    pub fn sample_project(id: &str, budget: i64) -> DbProject {
        let now = Utc::now().to_rfc3339();
        DbProject {
            id: id.to_string(),
            name: format!("Project {}", id),
            budget: Decimal::from(budget),
            status: ProjectStatus::Planning,
            start_date: None,
            end_date: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn sample_phase(id: &str, project_id: &str, number: i64, allocated: i64) -> DbPhase {
        let now = Utc::now().to_rfc3339();
        DbPhase {
            id: id.to_string(),
            project_id: project_id.to_string(),
            phase_number: number,
            phase_name: format!("Phase {}", number),
            budget_allocated: Decimal::from(allocated),
            budget_used: Decimal::ZERO,
            status: PhaseStatus::Planning,
            start_date: None,
            end_date: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn sample_subcontractor(id: &str) -> DbSubcontractor {
        let now = Utc::now().to_rfc3339();
        DbSubcontractor {
            id: id.to_string(),
            name: format!("Subcontractor {}", id),
            contact_person: None,
            email: None,
            phone: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn sample_contract(id: &str, phase: &DbPhase, sub_id: &str, base: i64) -> DbContract {
        let now = Utc::now().to_rfc3339();
        DbContract {
            id: id.to_string(),
            project_id: phase.project_id.clone(),
            phase_id: phase.id.clone(),
            subcontractor_id: sub_id.to_string(),
            contract_number: format!("CNT-TEST-{}", id),
            job_description: "Concrete works".to_string(),
            base_amount: Decimal::from(base),
            vat_rate: Decimal::ZERO,
            vat_amount: Decimal::ZERO,
            total_amount: Decimal::from(base),
            has_contract: true,
            financed_by: None,
            status: ContractStatus::Active,
            start_date: None,
            end_date: None,
            last_milestone_number: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Project with one phase and one subcontractor, ready for contracts.
    pub fn seeded_phase(db: &BudgetDb, allocated: i64) -> DbPhase {
        db.insert_project(&sample_project("proj-1", allocated))
            .expect("insert project");
        let phase = sample_phase("phase-1", "proj-1", 1, allocated);
        db.insert_phase(&phase).expect("insert phase");
        db.insert_subcontractor(&sample_subcontractor("sub-1"))
            .expect("insert subcontractor");
        phase
    }
}

// =============================================================================
// Tests
// =============================================================================
