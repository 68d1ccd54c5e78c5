use chrono::Utc;
use rusqlite::params;

use super::*;
use crate::types::ContractStatus;

const CONTRACT_COLUMNS: &str = "id, project_id, phase_id, subcontractor_id, contract_number,
     job_description, base_amount, vat_rate, vat_amount, total_amount, has_contract,
     financed_by_type, financed_by_id, status, start_date, end_date, last_milestone_number,
     created_at, updated_at";

impl BudgetDb {
    // =========================================================================
    // Contracts
    // =========================================================================

    /// Helper: map a row to `DbContract`.
    pub(crate) fn map_contract_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbContract> {
        Ok(DbContract {
            id: row.get(0)?,
            project_id: row.get(1)?,
            phase_id: row.get(2)?,
            subcontractor_id: row.get(3)?,
            contract_number: row.get(4)?,
            job_description: row.get(5)?,
            base_amount: decimal_col(row, 6)?,
            vat_rate: decimal_col(row, 7)?,
            vat_amount: decimal_col(row, 8)?,
            total_amount: decimal_col(row, 9)?,
            has_contract: row.get::<_, i32>(10)? != 0,
            financed_by: DbContract::financing_from_columns(row.get(11)?, row.get(12)?),
            status: enum_col(row, 13, ContractStatus::from_db)?,
            start_date: row.get(14)?,
            end_date: row.get(15)?,
            last_milestone_number: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    /// Insert a contract. A duplicate `contract_number` surfaces as a
    /// `DbError` for which `is_unique_violation()` is true.
    pub fn insert_contract(&self, contract: &DbContract) -> Result<(), DbError> {
        let (financed_by_type, financed_by_id) = contract.financing_columns();
        self.conn.execute(
            &format!(
                "INSERT INTO contracts ({CONTRACT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19)"
            ),
            params![
                contract.id,
                contract.project_id,
                contract.phase_id,
                contract.subcontractor_id,
                contract.contract_number,
                contract.job_description,
                decimal_sql(contract.base_amount),
                decimal_sql(contract.vat_rate),
                decimal_sql(contract.vat_amount),
                decimal_sql(contract.total_amount),
                contract.has_contract as i32,
                financed_by_type,
                financed_by_id,
                contract.status.as_str(),
                contract.start_date,
                contract.end_date,
                contract.last_milestone_number,
                contract.created_at,
                contract.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_contract(&self, id: &str) -> Result<Option<DbContract>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], Self::map_contract_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_contracts_for_phase(&self, phase_id: &str) -> Result<Vec<DbContract>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE phase_id = ?1 ORDER BY created_at, contract_number"
        ))?;
        let rows = stmt.query_map(params![phase_id], Self::map_contract_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_contracts_for_project(&self, project_id: &str) -> Result<Vec<DbContract>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE project_id = ?1 ORDER BY created_at, contract_number"
        ))?;
        let rows = stmt.query_map(params![project_id], Self::map_contract_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Write every mutable field of a contract.
    pub fn update_contract(&self, contract: &DbContract) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        let (financed_by_type, financed_by_id) = contract.financing_columns();
        Ok(self.conn.execute(
            "UPDATE contracts SET
                job_description = ?1,
                base_amount = ?2,
                vat_rate = ?3,
                vat_amount = ?4,
                total_amount = ?5,
                has_contract = ?6,
                financed_by_type = ?7,
                financed_by_id = ?8,
                status = ?9,
                start_date = ?10,
                end_date = ?11,
                updated_at = ?12
             WHERE id = ?13",
            params![
                contract.job_description,
                decimal_sql(contract.base_amount),
                decimal_sql(contract.vat_rate),
                decimal_sql(contract.vat_amount),
                decimal_sql(contract.total_amount),
                contract.has_contract as i32,
                financed_by_type,
                financed_by_id,
                contract.status.as_str(),
                contract.start_date,
                contract.end_date,
                now,
                contract.id,
            ],
        )?)
    }

    /// Delete a contract; its milestones go with it.
    pub fn delete_contract_row(&self, id: &str) -> Result<usize, DbError> {
        Ok(self
            .conn
            .execute("DELETE FROM contracts WHERE id = ?1", params![id])?)
    }

    /// Count contracts under a phase that carry no contract amount.
    pub fn count_invoice_only_contracts(&self, phase_id: &str) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE phase_id = ?1 AND has_contract = 0",
            params![phase_id],
            |row| row.get(0),
        )?)
    }

    /// All contract numbers starting with `prefix`, e.g. `CNT-2026-`.
    pub fn contract_numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT contract_number FROM contracts WHERE substr(contract_number, 1, ?2) = ?1",
        )?;
        let rows = stmt.query_map(params![prefix, prefix.chars().count() as i64], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn contract_number_exists(&self, contract_number: &str) -> Result<bool, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM contracts WHERE contract_number = ?1")?;
        Ok(stmt.exists(params![contract_number])?)
    }

    /// Record the highest milestone number issued on a contract.
    pub fn set_last_milestone_number(
        &self,
        contract_id: &str,
        number: i64,
    ) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE contracts SET last_milestone_number = MAX(last_milestone_number, ?1)
             WHERE id = ?2",
            params![number, contract_id],
        )?)
    }
}
