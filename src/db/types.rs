//! Shared type definitions for the database layer.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ContractStatus, FinancingKind, FinancingSource, MilestoneStatus, PhaseStatus, ProjectStatus,
};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl DbError {
    fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e.code),
            _ => None,
        }
    }

    /// True for UNIQUE / PRIMARY KEY collisions.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            }
            _ => false,
        }
    }

    /// True when another writer holds the database and the call may be retried.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

// =============================================================================
// Column codecs
// =============================================================================

/// Read a TEXT column holding a canonical decimal string.
pub(crate) fn decimal_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a TEXT column holding one of the storage enums.
pub(crate) fn enum_col<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown value '{}'", raw).into(),
        )
    })
}

/// Decimal to its storage string.
pub(crate) fn decimal_sql(value: Decimal) -> String {
    value.normalize().to_string()
}

// =============================================================================
// Rows
// =============================================================================

/// A row from the `projects` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProject {
    pub id: String,
    pub name: String,
    pub budget: Decimal,
    pub status: ProjectStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `project_phases` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPhase {
    pub id: String,
    pub project_id: String,
    pub phase_number: i64,
    pub phase_name: String,
    pub budget_allocated: Decimal,
    /// Cached sum of committed contract costs. Written only by recalculation.
    pub budget_used: Decimal,
    pub status: PhaseStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

impl DbPhase {
    /// Allocation not yet committed to contracts. Negative when over-committed.
    pub fn available(&self) -> Decimal {
        self.budget_allocated - self.budget_used
    }
}

/// A row from the `subcontractors` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSubcontractor {
    pub id: String,
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `contracts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContract {
    pub id: String,
    pub project_id: String,
    pub phase_id: String,
    pub subcontractor_id: String,
    pub contract_number: String,
    pub job_description: String,
    pub base_amount: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    /// `base_amount + vat_amount`; zero for invoice-only engagements.
    pub total_amount: Decimal,
    pub has_contract: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financed_by: Option<FinancingSource>,
    pub status: ContractStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Highest milestone number ever issued on this contract.
    pub last_milestone_number: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DbContract {
    /// What this contract contributes to its phase's `budget_used`.
    pub fn committed_cost(&self) -> Decimal {
        if self.has_contract {
            self.total_amount
        } else {
            Decimal::ZERO
        }
    }

    pub(crate) fn financing_columns(&self) -> (Option<&'static str>, Option<&str>) {
        match &self.financed_by {
            Some(source) => (Some(source.kind.as_str()), Some(source.id.as_str())),
            None => (None, None),
        }
    }

    pub(crate) fn financing_from_columns(
        kind: Option<String>,
        id: Option<String>,
    ) -> Option<FinancingSource> {
        match (kind.as_deref().and_then(FinancingKind::from_db), id) {
            (Some(kind), Some(id)) if !id.is_empty() => Some(FinancingSource { kind, id }),
            _ => None,
        }
    }
}

/// A row from the `subcontractor_milestones` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMilestone {
    pub id: String,
    pub contract_id: String,
    pub milestone_number: i64,
    pub milestone_name: String,
    pub description: Option<String>,
    pub percentage: Decimal,
    pub due_date: Option<NaiveDate>,
    pub status: MilestoneStatus,
    pub created_at: String,
    pub updated_at: String,
}
