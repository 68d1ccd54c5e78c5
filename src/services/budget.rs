// Budget service — phase budget recalculation.
// `project_phases.budget_used` is a cache of the committed contract cost; these
// functions are the only writers of that column.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{BudgetDb, DbContract, DbPhase};
use crate::error::BudgetError;
use crate::money;

/// Committed cost of a set of contracts: the sum of `total_amount` over
/// contracts with `has_contract = true`.
pub fn committed_budget(contracts: &[DbContract]) -> Result<Decimal, BudgetError> {
    let total = money::sum(
        contracts.iter().map(DbContract::committed_cost),
        "Committed contract cost",
    )?;
    Ok(total.normalize())
}

/// Allocation figures for one phase, freshly derived from its contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseBudget {
    pub phase_id: String,
    pub budget_allocated: Decimal,
    pub budget_used: Decimal,
    /// `budget_allocated - budget_used`; negative when over-committed.
    pub available: Decimal,
}

/// A phase whose cached `budget_used` disagreed with its contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDrift {
    pub phase_id: String,
    pub previous: Decimal,
    pub recalculated: Decimal,
}

/// Outcome of a full repair pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationReport {
    pub phases_checked: usize,
    pub repaired: Vec<PhaseDrift>,
}

/// Recompute and store `budget_used` for a loaded phase. Runs in the caller's
/// transaction. Returns the previous cached value and the new one.
pub(crate) fn refresh_phase(
    db: &BudgetDb,
    phase: &DbPhase,
) -> Result<(Decimal, Decimal), BudgetError> {
    let contracts = db.get_contracts_for_phase(&phase.id)?;
    let used = committed_budget(&contracts)?;
    if used != phase.budget_used {
        db.set_phase_budget_used(&phase.id, used)?;
    }
    log::debug!(
        "Phase {} budget_used {} -> {} ({} contracts)",
        phase.id,
        phase.budget_used,
        used,
        contracts.len()
    );
    Ok((phase.budget_used, used))
}

pub(crate) fn load_phase(db: &BudgetDb, phase_id: &str) -> Result<DbPhase, BudgetError> {
    db.get_phase(phase_id)?
        .ok_or_else(|| BudgetError::not_found("Phase", phase_id))
}

/// Recalculate `budget_used` for one phase and return the new value.
///
/// Idempotent: repeated calls with no contract changes write nothing.
pub fn recalculate(db: &BudgetDb, phase_id: &str) -> Result<Decimal, BudgetError> {
    db.with_transaction(|tx| {
        let phase = load_phase(tx, phase_id)?;
        let (_, used) = refresh_phase(tx, &phase)?;
        Ok(used)
    })
}

/// Recalculate every phase in the store.
///
/// Each phase is repaired in its own transaction so a failure part-way
/// keeps the repairs already made.
pub fn recalculate_all(db: &BudgetDb) -> Result<RecalculationReport, BudgetError> {
    let phase_ids = db.get_all_phase_ids()?;
    let mut report = RecalculationReport::default();

    for phase_id in phase_ids {
        let drift = db.with_transaction(|tx| {
            // Deleted by another writer since the ID list was read
            let Some(phase) = tx.get_phase(&phase_id)? else {
                return Ok::<_, BudgetError>(None);
            };
            let (previous, recalculated) = refresh_phase(tx, &phase)?;
            Ok(Some((previous, recalculated)))
        })?;

        let Some((previous, recalculated)) = drift else {
            continue;
        };
        report.phases_checked += 1;
        if previous != recalculated {
            log::warn!(
                "Repaired budget drift on phase {}: stored {}, contracts sum to {}",
                phase_id,
                previous,
                recalculated
            );
            report.repaired.push(PhaseDrift {
                phase_id,
                previous,
                recalculated,
            });
        }
    }

    log::info!(
        "Budget recalculation checked {} phases, repaired {}",
        report.phases_checked,
        report.repaired.len()
    );
    Ok(report)
}

/// Allocation, committed spend and headroom of a phase, recalculating first.
pub fn phase_budget(db: &BudgetDb, phase_id: &str) -> Result<PhaseBudget, BudgetError> {
    db.with_transaction(|tx| {
        let phase = load_phase(tx, phase_id)?;
        let (_, used) = refresh_phase(tx, &phase)?;
        Ok(PhaseBudget {
            phase_id: phase.id,
            budget_allocated: phase.budget_allocated,
            budget_used: used,
            available: phase.budget_allocated - used,
        })
    })
}
