use chrono::Utc;
use rusqlite::params;
use rust_decimal::Decimal;

use super::*;
use crate::types::ProjectStatus;

impl BudgetDb {
    // =========================================================================
    // Projects
    // =========================================================================

    /// Helper: map a row to `DbProject`.
    pub(crate) fn map_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbProject> {
        Ok(DbProject {
            id: row.get(0)?,
            name: row.get(1)?,
            budget: decimal_col(row, 2)?,
            status: enum_col(row, 3, ProjectStatus::from_db)?,
            start_date: row.get(4)?,
            end_date: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub fn insert_project(&self, project: &DbProject) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO projects (
                id, name, budget, status, start_date, end_date, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project.id,
                project.name,
                decimal_sql(project.budget),
                project.status.as_str(),
                project.start_date,
                project.end_date,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a project by ID.
    pub fn get_project(&self, id: &str) -> Result<Option<DbProject>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, budget, status, start_date, end_date, created_at, updated_at
             FROM projects WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_project_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get all projects, ordered by name.
    pub fn get_all_projects(&self) -> Result<Vec<DbProject>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, budget, status, start_date, end_date, created_at, updated_at
             FROM projects ORDER BY name, id",
        )?;
        let rows = stmt.query_map([], Self::map_project_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_project_status(&self, id: &str, status: ProjectStatus) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        Ok(self.conn.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id],
        )?)
    }

    pub fn update_project_budget(&self, id: &str, budget: Decimal) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        Ok(self.conn.execute(
            "UPDATE projects SET budget = ?1, updated_at = ?2 WHERE id = ?3",
            params![decimal_sql(budget), now, id],
        )?)
    }
}
