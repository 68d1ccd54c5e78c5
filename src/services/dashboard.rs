// Dashboard service — read-only project rollups.
// Joins phases and contracts with Accounting's per-contract payment totals.
// Nothing here writes to the store.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::accounting::PaymentLedger;
use crate::db::{BudgetDb, DbContract, DbPhase, DbProject};
use crate::error::BudgetError;
use crate::money;
use crate::services::budget::committed_budget;
use crate::types::{PhaseStatus, ProjectStatus};

/// Per-phase line of a project rollup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRollup {
    pub phase_id: String,
    pub phase_number: i64,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub budget_allocated: Decimal,
    /// Derived from the phase's contracts, not the stored cache.
    pub budget_used: Decimal,
    pub available: Decimal,
    pub contract_count: usize,
    pub total_paid: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRollup {
    pub project_id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub budget: Decimal,
    pub total_budget_allocated: Decimal,
    pub total_budget_used: Decimal,
    /// Sum of contract cost over contracts with `has_contract`.
    pub total_contract_cost: Decimal,
    /// Paid across every contract, invoice-only engagements included.
    pub total_paid_out: Decimal,
    pub total_owed: Decimal,
    /// `round(paid on costed contracts / total contract cost × 100)`, 0 without cost.
    /// Not capped: overpayment reads above 100.
    pub completion_percentage: u32,
    pub overdue_count: usize,
    pub phases: Vec<PhaseRollup>,
}

/// Deadline passed and not yet paid in full.
fn is_overdue(contract: &DbContract, paid: Decimal, today: NaiveDate) -> bool {
    match contract.end_date {
        Some(deadline) => deadline < today && paid < contract.committed_cost(),
        None => false,
    }
}

fn rollup(
    project: DbProject,
    phases: Vec<DbPhase>,
    contracts: Vec<DbContract>,
    ledger: &impl PaymentLedger,
    today: NaiveDate,
) -> Result<ProjectRollup, BudgetError> {
    let mut by_phase: HashMap<String, Vec<DbContract>> = HashMap::new();
    for contract in contracts {
        by_phase
            .entry(contract.phase_id.clone())
            .or_default()
            .push(contract);
    }

    let mut total_contract_cost = Decimal::ZERO;
    let mut paid_on_costed = Decimal::ZERO;
    let mut total_paid_out = Decimal::ZERO;
    let mut total_owed = Decimal::ZERO;
    let mut overdue_count = 0;
    let mut phase_rollups = Vec::with_capacity(phases.len());

    for phase in phases {
        let contracts = by_phase.remove(&phase.id).unwrap_or_default();
        let used = committed_budget(&contracts)?;
        let mut phase_paid = Decimal::ZERO;

        for contract in &contracts {
            let totals = ledger.contract_totals(&contract.id)?;
            phase_paid = money::add(phase_paid, totals.total_paid, "Phase payments")?;
            total_owed = money::add(total_owed, totals.total_owed, "Amount owed")?;
            if contract.has_contract {
                total_contract_cost =
                    money::add(total_contract_cost, contract.total_amount, "Contract cost")?;
                paid_on_costed = money::add(paid_on_costed, totals.total_paid, "Payments")?;
            }
            if is_overdue(contract, totals.total_paid, today) {
                overdue_count += 1;
            }
        }
        total_paid_out = money::add(total_paid_out, phase_paid, "Payments")?;

        phase_rollups.push(PhaseRollup {
            phase_id: phase.id,
            phase_number: phase.phase_number,
            phase_name: phase.phase_name,
            status: phase.status,
            budget_allocated: phase.budget_allocated,
            budget_used: used,
            available: phase.budget_allocated - used,
            contract_count: contracts.len(),
            total_paid: phase_paid.normalize(),
        });
    }

    let total_budget_allocated = money::sum(
        phase_rollups.iter().map(|p| p.budget_allocated),
        "Allocated budget",
    )?;
    let total_budget_used =
        money::sum(phase_rollups.iter().map(|p| p.budget_used), "Used budget")?;

    Ok(ProjectRollup {
        project_id: project.id,
        name: project.name,
        status: project.status,
        budget: project.budget,
        total_budget_allocated: total_budget_allocated.normalize(),
        total_budget_used: total_budget_used.normalize(),
        total_contract_cost: total_contract_cost.normalize(),
        total_paid_out: total_paid_out.normalize(),
        total_owed: total_owed.normalize(),
        completion_percentage: money::whole_percent(paid_on_costed, total_contract_cost),
        overdue_count,
        phases: phase_rollups,
    })
}

/// Rollup for one project as of `today`.
pub fn project_rollup(
    db: &BudgetDb,
    ledger: &impl PaymentLedger,
    project_id: &str,
    today: NaiveDate,
) -> Result<ProjectRollup, BudgetError> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| BudgetError::not_found("Project", project_id))?;
    let phases = db.get_phases_for_project(project_id)?;
    let contracts = db.get_contracts_for_project(project_id)?;
    rollup(project, phases, contracts, ledger, today)
}

/// Rollups for every project, in project name order.
pub fn portfolio_rollups(
    db: &BudgetDb,
    ledger: &impl PaymentLedger,
    today: NaiveDate,
) -> Result<Vec<ProjectRollup>, BudgetError> {
    let projects = db.get_all_projects()?;
    let mut rollups = Vec::with_capacity(projects.len());
    for project in projects {
        let phases = db.get_phases_for_project(&project.id)?;
        let contracts = db.get_contracts_for_project(&project.id)?;
        rollups.push(rollup(project, phases, contracts, ledger, today)?);
    }
    log::debug!("Built {} project rollups", rollups.len());
    Ok(rollups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{LedgerSnapshot, PaymentTotals};
    use crate::db::test_utils::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
    }

    fn due(days_from_today: i64) -> Option<NaiveDate> {
        Some(today() + chrono::Duration::days(days_from_today))
    }

    struct FailingLedger;

    impl PaymentLedger for FailingLedger {
        fn contract_totals(&self, _contract_id: &str) -> Result<PaymentTotals, BudgetError> {
            Err(BudgetError::Validation("ledger unavailable".to_string()))
        }
    }

    #[test]
    fn test_empty_project_rolls_up_to_zero() {
        let db = test_db();
        db.insert_project(&sample_project("proj-1", 500_000)).unwrap();

        let rollup = project_rollup(&db, &LedgerSnapshot::new(), "proj-1", today()).unwrap();
        assert!(rollup.phases.is_empty());
        assert_eq!(rollup.completion_percentage, 0);
        assert_eq!(rollup.overdue_count, 0);
        assert_eq!(rollup.total_budget_allocated, Decimal::ZERO);
        assert_eq!(rollup.budget, Decimal::from(500_000));
    }

    #[test]
    fn test_phase_without_contracts_is_tolerated() {
        let db = test_db();
        seeded_phase(&db, 100_000);
        let rollup = project_rollup(&db, &LedgerSnapshot::new(), "proj-1", today()).unwrap();
        assert_eq!(rollup.phases.len(), 1);
        assert_eq!(rollup.phases[0].contract_count, 0);
        assert_eq!(rollup.phases[0].available, Decimal::from(100_000));
        assert_eq!(rollup.completion_percentage, 0);
    }

    #[test]
    fn test_rollup_completion_overdue_and_totals() {
        let db = test_db();
        let phase = seeded_phase(&db, 200_000);
        let second = sample_phase("phase-2", "proj-1", 2, 50_000);
        db.insert_phase(&second).unwrap();

        // Overdue and part-paid
        let mut late = sample_contract("c-late", &phase, "sub-1", 60_000);
        late.end_date = due(-3);
        db.insert_contract(&late).unwrap();
        // Overdue deadline but fully paid
        let mut settled = sample_contract("c-settled", &phase, "sub-1", 40_000);
        settled.end_date = due(-30);
        db.insert_contract(&settled).unwrap();
        // Deadline ahead
        let mut upcoming = sample_contract("c-upcoming", &second, "sub-1", 20_000);
        upcoming.end_date = due(10);
        db.insert_contract(&upcoming).unwrap();
        // Invoice-only: no cost, past deadline, never overdue
        let mut invoices = sample_contract("c-invoices", &second, "sub-1", 0);
        invoices.has_contract = false;
        invoices.end_date = due(-1);
        db.insert_contract(&invoices).unwrap();

        let ledger = LedgerSnapshot::new()
            .with_paid("c-late", Decimal::from(30_000), Decimal::from(30_000))
            .with_paid("c-settled", Decimal::from(40_000), Decimal::ZERO)
            .with_paid("c-invoices", Decimal::from(5_000), Decimal::from(1_000));

        let rollup = project_rollup(&db, &ledger, "proj-1", today()).unwrap();
        assert_eq!(rollup.total_contract_cost, Decimal::from(120_000));
        assert_eq!(rollup.total_paid_out, Decimal::from(75_000));
        assert_eq!(rollup.total_owed, Decimal::from(31_000));
        // 70000 / 120000 = 58.33%
        assert_eq!(rollup.completion_percentage, 58);
        assert_eq!(rollup.overdue_count, 1);
        assert_eq!(rollup.total_budget_allocated, Decimal::from(250_000));
        assert_eq!(rollup.total_budget_used, Decimal::from(120_000));

        let first = &rollup.phases[0];
        assert_eq!(first.phase_number, 1);
        assert_eq!(first.contract_count, 2);
        assert_eq!(first.budget_used, Decimal::from(100_000));
        assert_eq!(first.total_paid, Decimal::from(70_000));
        let second = &rollup.phases[1];
        assert_eq!(second.budget_used, Decimal::from(20_000));
        assert_eq!(second.available, Decimal::from(30_000));
        assert_eq!(second.total_paid, Decimal::from(5_000));
    }

    #[test]
    fn test_completion_rounds_half_up_and_is_not_capped() {
        let db = test_db();
        let phase = seeded_phase(&db, 1_000);
        db.insert_contract(&sample_contract("c-1", &phase, "sub-1", 200))
            .unwrap();

        let half = LedgerSnapshot::new().with_paid("c-1", Decimal::from(1), Decimal::ZERO);
        // 1 / 200 = 0.5%
        assert_eq!(
            project_rollup(&db, &half, "proj-1", today()).unwrap().completion_percentage,
            1
        );

        let over = LedgerSnapshot::new().with_paid("c-1", Decimal::from(250), Decimal::ZERO);
        assert_eq!(
            project_rollup(&db, &over, "proj-1", today()).unwrap().completion_percentage,
            125
        );
    }

    #[test]
    fn test_rollup_does_not_touch_stored_budget() {
        let db = test_db();
        let phase = seeded_phase(&db, 1_000);
        db.insert_contract(&sample_contract("c-1", &phase, "sub-1", 300))
            .unwrap();

        let rollup = project_rollup(&db, &LedgerSnapshot::new(), "proj-1", today()).unwrap();
        assert_eq!(rollup.phases[0].budget_used, Decimal::from(300));
        assert_eq!(
            db.get_phase(&phase.id).unwrap().unwrap().budget_used,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_portfolio_and_errors() {
        let db = test_db();
        seeded_phase(&db, 1_000);
        db.insert_project(&sample_project("proj-2", 2_000)).unwrap();

        let rollups = portfolio_rollups(&db, &LedgerSnapshot::new(), today()).unwrap();
        let ids: Vec<&str> = rollups.iter().map(|r| r.project_id.as_str()).collect();
        assert_eq!(ids, vec!["proj-1", "proj-2"]);

        assert!(matches!(
            project_rollup(&db, &LedgerSnapshot::new(), "proj-x", today()),
            Err(BudgetError::NotFound { entity: "Project", .. })
        ));

        let phase = db.get_phase("phase-1").unwrap().unwrap();
        db.insert_contract(&sample_contract("c-1", &phase, "sub-1", 10))
            .unwrap();
        assert!(project_rollup(&db, &FailingLedger, "proj-1", today()).is_err());
    }
}
