use rusqlite::params;

use super::*;

impl BudgetDb {
    // =========================================================================
    // Subcontractors
    // =========================================================================

    pub(crate) fn map_subcontractor_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<DbSubcontractor> {
        Ok(DbSubcontractor {
            id: row.get(0)?,
            name: row.get(1)?,
            contact_person: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn insert_subcontractor(&self, sub: &DbSubcontractor) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO subcontractors (
                id, name, contact_person, email, phone, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sub.id,
                sub.name,
                sub.contact_person,
                sub.email,
                sub.phone,
                sub.created_at,
                sub.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_subcontractor(&self, id: &str) -> Result<Option<DbSubcontractor>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, contact_person, email, phone, created_at, updated_at
             FROM subcontractors WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_subcontractor_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get all subcontractors, ordered by name.
    pub fn get_all_subcontractors(&self) -> Result<Vec<DbSubcontractor>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, contact_person, email, phone, created_at, updated_at
             FROM subcontractors ORDER BY name COLLATE NOCASE, id",
        )?;
        let rows = stmt.query_map([], Self::map_subcontractor_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
