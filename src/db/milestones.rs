use chrono::Utc;
use rusqlite::params;

use super::*;
use crate::types::MilestoneStatus;

const MILESTONE_COLUMNS: &str = "id, contract_id, milestone_number, milestone_name, description,
     percentage, due_date, status, created_at, updated_at";

impl BudgetDb {
    // =========================================================================
    // Milestones
    // =========================================================================

    pub(crate) fn map_milestone_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbMilestone> {
        Ok(DbMilestone {
            id: row.get(0)?,
            contract_id: row.get(1)?,
            milestone_number: row.get(2)?,
            milestone_name: row.get(3)?,
            description: row.get(4)?,
            percentage: decimal_col(row, 5)?,
            due_date: row.get(6)?,
            status: enum_col(row, 7, MilestoneStatus::from_db)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub fn insert_milestone(&self, milestone: &DbMilestone) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO subcontractor_milestones ({MILESTONE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                milestone.id,
                milestone.contract_id,
                milestone.milestone_number,
                milestone.milestone_name,
                milestone.description,
                decimal_sql(milestone.percentage),
                milestone.due_date,
                milestone.status.as_str(),
                milestone.created_at,
                milestone.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_milestone(&self, id: &str) -> Result<Option<DbMilestone>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MILESTONE_COLUMNS} FROM subcontractor_milestones WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], Self::map_milestone_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Milestones of a contract in `milestone_number` order.
    pub fn get_milestones_for_contract(
        &self,
        contract_id: &str,
    ) -> Result<Vec<DbMilestone>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MILESTONE_COLUMNS} FROM subcontractor_milestones
             WHERE contract_id = ?1 ORDER BY milestone_number"
        ))?;
        let rows = stmt.query_map(params![contract_id], Self::map_milestone_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn max_milestone_number(&self, contract_id: &str) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(milestone_number), 0) FROM subcontractor_milestones
             WHERE contract_id = ?1",
            params![contract_id],
            |row| row.get(0),
        )?)
    }

    pub fn update_milestone(&self, milestone: &DbMilestone) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        Ok(self.conn.execute(
            "UPDATE subcontractor_milestones SET
                milestone_name = ?1,
                description = ?2,
                percentage = ?3,
                due_date = ?4,
                status = ?5,
                updated_at = ?6
             WHERE id = ?7",
            params![
                milestone.milestone_name,
                milestone.description,
                decimal_sql(milestone.percentage),
                milestone.due_date,
                milestone.status.as_str(),
                now,
                milestone.id,
            ],
        )?)
    }

    pub fn delete_milestone_row(&self, id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM subcontractor_milestones WHERE id = ?1",
            params![id],
        )?)
    }
}
