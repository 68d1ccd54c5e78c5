use chrono::Utc;
use rusqlite::params;
use rust_decimal::Decimal;

use super::*;
use crate::types::PhaseStatus;

const PHASE_COLUMNS: &str = "id, project_id, phase_number, phase_name, budget_allocated,
     budget_used, status, start_date, end_date, created_at, updated_at";

impl BudgetDb {
    // =========================================================================
    // Phases
    // =========================================================================

    /// Helper: map a row to `DbPhase`.
    pub(crate) fn map_phase_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbPhase> {
        Ok(DbPhase {
            id: row.get(0)?,
            project_id: row.get(1)?,
            phase_number: row.get(2)?,
            phase_name: row.get(3)?,
            budget_allocated: decimal_col(row, 4)?,
            budget_used: decimal_col(row, 5)?,
            status: enum_col(row, 6, PhaseStatus::from_db)?,
            start_date: row.get(7)?,
            end_date: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    pub fn insert_phase(&self, phase: &DbPhase) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO project_phases ({PHASE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                phase.id,
                phase.project_id,
                phase.phase_number,
                phase.phase_name,
                decimal_sql(phase.budget_allocated),
                decimal_sql(phase.budget_used),
                phase.status.as_str(),
                phase.start_date,
                phase.end_date,
                phase.created_at,
                phase.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_phase(&self, id: &str) -> Result<Option<DbPhase>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PHASE_COLUMNS} FROM project_phases WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], Self::map_phase_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Phases of a project in `phase_number` order.
    pub fn get_phases_for_project(&self, project_id: &str) -> Result<Vec<DbPhase>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHASE_COLUMNS} FROM project_phases
             WHERE project_id = ?1 ORDER BY phase_number"
        ))?;
        let rows = stmt.query_map(params![project_id], Self::map_phase_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every phase ID in the store, for the repair pass.
    pub fn get_all_phase_ids(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM project_phases ORDER BY project_id, phase_number")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Highest phase number in a project, 0 when it has none.
    pub fn max_phase_number(&self, project_id: &str) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(phase_number), 0) FROM project_phases WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?)
    }

    /// Write the operator-editable fields of a phase. `budget_used` and
    /// `phase_number` are left alone.
    pub fn update_phase_details(&self, phase: &DbPhase) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        Ok(self.conn.execute(
            "UPDATE project_phases SET
                phase_name = ?1,
                budget_allocated = ?2,
                status = ?3,
                start_date = ?4,
                end_date = ?5,
                updated_at = ?6
             WHERE id = ?7",
            params![
                phase.phase_name,
                decimal_sql(phase.budget_allocated),
                phase.status.as_str(),
                phase.start_date,
                phase.end_date,
                now,
                phase.id,
            ],
        )?)
    }

    /// Overwrite the cached committed budget of a phase.
    pub fn set_phase_budget_used(&self, id: &str, budget_used: Decimal) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE project_phases SET budget_used = ?1 WHERE id = ?2",
            params![decimal_sql(budget_used), id],
        )?)
    }

    pub fn delete_phase_row(&self, id: &str) -> Result<usize, DbError> {
        Ok(self
            .conn
            .execute("DELETE FROM project_phases WHERE id = ?1", params![id])?)
    }

    pub fn delete_phases_for_project(&self, project_id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM project_phases WHERE project_id = ?1",
            params![project_id],
        )?)
    }

    /// Renumber a project's phases 1..N keeping their current relative order.
    ///
    /// Numbers are first moved to negatives so the `(project_id, phase_number)`
    /// uniqueness constraint holds at every intermediate step. Returns the
    /// number of phases whose number changed.
    pub fn resequence_phases(&self, project_id: &str) -> Result<usize, DbError> {
        let ordered: Vec<(String, i64)> = {
            let mut stmt = self.conn.prepare(
                "SELECT id, phase_number FROM project_phases
                 WHERE project_id = ?1 ORDER BY phase_number, created_at",
            )?;
            let rows = stmt.query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        self.conn.execute(
            "UPDATE project_phases SET phase_number = -phase_number WHERE project_id = ?1",
            params![project_id],
        )?;

        let mut changed = 0;
        for (idx, (id, old_number)) in ordered.iter().enumerate() {
            let new_number = idx as i64 + 1;
            self.conn.execute(
                "UPDATE project_phases SET phase_number = ?1 WHERE id = ?2",
                params![new_number, id],
            )?;
            if new_number != *old_number {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
