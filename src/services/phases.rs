// Phases service — phase setup, edits and deletion within a project.
// Keeps phase numbers contiguous (1..N) and surfaces allocation problems as
// warnings the caller confirms with `force`.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::db::{BudgetDb, DbPhase, DbProject};
use crate::error::BudgetError;
use crate::money;
use crate::services::budget::{load_phase, refresh_phase};
use crate::types::{BudgetWarning, Commit, PhaseDefinition, PhaseStatus, PhaseUpdate};

fn load_project(db: &BudgetDb, project_id: &str) -> Result<DbProject, BudgetError> {
    db.get_project(project_id)?
        .ok_or_else(|| BudgetError::not_found("Project", project_id))
}

fn validate_fields(
    name: &str,
    budget_allocated: Decimal,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), BudgetError> {
    if name.trim().is_empty() {
        return Err(BudgetError::Validation("Phase name is required".to_string()));
    }
    if budget_allocated < Decimal::ZERO {
        return Err(BudgetError::Validation(format!(
            "Phase '{}' cannot have a negative allocation",
            name.trim()
        )));
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(BudgetError::Validation(format!(
                "Phase '{}' ends ({}) before it starts ({})",
                name.trim(),
                end,
                start
            )));
        }
    }
    Ok(())
}

fn validate_definitions(definitions: &[PhaseDefinition]) -> Result<(), BudgetError> {
    if definitions.is_empty() {
        return Err(BudgetError::Validation(
            "At least one phase is required".to_string(),
        ));
    }
    for def in definitions {
        validate_fields(&def.phase_name, def.budget_allocated, def.start_date, def.end_date)?;
    }
    Ok(())
}

fn total_allocation<I>(allocations: I) -> Result<Decimal, BudgetError>
where
    I: IntoIterator<Item = Decimal>,
{
    money::sum(allocations, "Total phase allocation")
}

/// Warn when phase allocations do not add up to the project budget.
fn allocation_mismatch(project: &DbProject, total_allocated: Decimal) -> Option<BudgetWarning> {
    if total_allocated == project.budget {
        return None;
    }
    Some(BudgetWarning::ProjectAllocationMismatch {
        project_budget: project.budget,
        total_allocated: total_allocated.normalize(),
        difference: (total_allocated - project.budget).normalize(),
    })
}

fn new_phase_row(project_id: &str, number: i64, def: &PhaseDefinition) -> DbPhase {
    let now = Utc::now().to_rfc3339();
    DbPhase {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        phase_number: number,
        phase_name: def.phase_name.trim().to_string(),
        budget_allocated: def.budget_allocated.normalize(),
        budget_used: Decimal::ZERO,
        status: PhaseStatus::Planning,
        start_date: def.start_date,
        end_date: def.end_date,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Existing phases of the project, refreshed. Fails when any of them carries
/// committed contract cost, since re-setup would drop those contracts.
fn replaceable_phases(db: &BudgetDb, project_id: &str) -> Result<Vec<DbPhase>, BudgetError> {
    let existing = db.get_phases_for_project(project_id)?;
    for phase in &existing {
        let (_, used) = refresh_phase(db, phase)?;
        if used > Decimal::ZERO {
            return Err(BudgetError::ConstraintViolation(format!(
                "Phase {} '{}' has {} committed to contracts; remove its contracts before re-running phase setup",
                phase.phase_number, phase.phase_name, used
            )));
        }
    }
    Ok(existing)
}

// =============================================================================
// Phase setup
// =============================================================================

/// Dry run of `create_phases`: hard errors as `Err`, warnings as the result.
pub fn validate_phase_setup(
    db: &BudgetDb,
    project_id: &str,
    definitions: &[PhaseDefinition],
) -> Result<Vec<BudgetWarning>, BudgetError> {
    validate_definitions(definitions)?;
    db.with_transaction(|tx| {
        let project = load_project(tx, project_id)?;
        replaceable_phases(tx, project_id)?;
        let total = total_allocation(definitions.iter().map(|d| d.budget_allocated))?;
        Ok(allocation_mismatch(&project, total).into_iter().collect())
    })
}

/// Create a project's phases, numbered 1..N in input order.
///
/// Phases already on the project are replaced as a whole; this is refused
/// while any of them has committed contracts. Invoice-only contracts in the
/// replaced phases are removed with them. A total allocation different from
/// the project budget is a warning: without `force` nothing is written.
pub fn create_phases(
    db: &BudgetDb,
    project_id: &str,
    definitions: Vec<PhaseDefinition>,
    force: bool,
) -> Result<Commit<Vec<DbPhase>>, BudgetError> {
    validate_definitions(&definitions)?;

    db.with_transaction(|tx| {
        let project = load_project(tx, project_id)?;
        let existing = replaceable_phases(tx, project_id)?;

        let total = total_allocation(definitions.iter().map(|d| d.budget_allocated))?;
        let warnings: Vec<BudgetWarning> =
            allocation_mismatch(&project, total).into_iter().collect();
        if !warnings.is_empty() && !force {
            return Ok(Commit::NeedsConfirmation { warnings });
        }

        if !existing.is_empty() {
            let removed = tx.delete_phases_for_project(project_id)?;
            log::warn!(
                "Phase setup for project {} replaced {} existing phases",
                project_id,
                removed
            );
        }

        let mut phases = Vec::with_capacity(definitions.len());
        for (idx, def) in definitions.iter().enumerate() {
            let phase = new_phase_row(project_id, idx as i64 + 1, def);
            tx.insert_phase(&phase)?;
            phases.push(phase);
        }

        log::info!(
            "Created {} phases for project {} (allocated {} of {})",
            phases.len(),
            project.name,
            total,
            project.budget
        );
        Ok(Commit::Applied {
            value: phases,
            warnings,
        })
    })
}

/// Append one phase after the project's last phase.
pub fn add_phase(
    db: &BudgetDb,
    project_id: &str,
    definition: PhaseDefinition,
    force: bool,
) -> Result<Commit<DbPhase>, BudgetError> {
    validate_fields(
        &definition.phase_name,
        definition.budget_allocated,
        definition.start_date,
        definition.end_date,
    )?;

    db.with_transaction(|tx| {
        let project = load_project(tx, project_id)?;
        let existing = tx.get_phases_for_project(project_id)?;
        let total = total_allocation(
            existing
                .iter()
                .map(|p| p.budget_allocated)
                .chain([definition.budget_allocated]),
        )?;

        let warnings: Vec<BudgetWarning> =
            allocation_mismatch(&project, total).into_iter().collect();
        if !warnings.is_empty() && !force {
            return Ok(Commit::NeedsConfirmation { warnings });
        }

        let number = tx.max_phase_number(project_id)? + 1;
        let phase = new_phase_row(project_id, number, &definition);
        tx.insert_phase(&phase)?;
        log::info!("Added phase {} '{}' to project {}", number, phase.phase_name, project_id);
        Ok(Commit::Applied {
            value: phase,
            warnings,
        })
    })
}

// =============================================================================
// Edits
// =============================================================================

fn plan_phase_update(
    db: &BudgetDb,
    phase_id: &str,
    update: &PhaseUpdate,
) -> Result<(DbPhase, Vec<BudgetWarning>), BudgetError> {
    let current = load_phase(db, phase_id)?;
    let (_, used) = refresh_phase(db, &current)?;

    let mut next = current;
    next.budget_used = used;
    if let Some(name) = &update.phase_name {
        next.phase_name = name.trim().to_string();
    }
    if let Some(allocated) = update.budget_allocated {
        next.budget_allocated = allocated.normalize();
    }
    if let Some(status) = update.status {
        next.status = status;
    }
    if let Some(start_date) = update.start_date {
        next.start_date = start_date;
    }
    if let Some(end_date) = update.end_date {
        next.end_date = end_date;
    }
    validate_fields(&next.phase_name, next.budget_allocated, next.start_date, next.end_date)?;

    let mut warnings = Vec::new();
    if update.budget_allocated.is_some() && next.budget_allocated < used {
        warnings.push(BudgetWarning::AllocationBelowCommitted {
            phase_id: next.id.clone(),
            budget_allocated: next.budget_allocated,
            budget_used: used,
        });
    }
    Ok((next, warnings))
}

/// Dry run of `update_phase`.
pub fn validate_phase_update(
    db: &BudgetDb,
    phase_id: &str,
    update: &PhaseUpdate,
) -> Result<Vec<BudgetWarning>, BudgetError> {
    db.with_transaction(|tx| {
        let (_, warnings) = plan_phase_update(tx, phase_id, update)?;
        Ok(warnings)
    })
}

/// Edit a phase's name, allocation, status or dates.
///
/// Lowering the allocation below what contracts already commit is a warning:
/// without `force` nothing is written.
pub fn update_phase(
    db: &BudgetDb,
    phase_id: &str,
    update: PhaseUpdate,
    force: bool,
) -> Result<Commit<DbPhase>, BudgetError> {
    db.with_transaction(|tx| {
        let (next, warnings) = plan_phase_update(tx, phase_id, &update)?;
        if !warnings.is_empty() && !force {
            return Ok(Commit::NeedsConfirmation { warnings });
        }
        if !warnings.is_empty() {
            log::warn!(
                "Phase {} allocation set to {}, below committed {}",
                next.id,
                next.budget_allocated,
                next.budget_used
            );
        }
        tx.update_phase_details(&next)?;
        let value = load_phase(tx, phase_id)?;
        Ok(Commit::Applied { value, warnings })
    })
}

// =============================================================================
// Deletion
// =============================================================================

/// Delete a phase and renumber the rest of the project 1..N.
///
/// Refused with `ConstraintViolation` while the phase has committed contract
/// cost. Invoice-only contracts (and their milestones) go with the phase.
/// Returns the project's remaining phases.
pub fn delete_phase(db: &BudgetDb, phase_id: &str) -> Result<Vec<DbPhase>, BudgetError> {
    db.with_transaction(|tx| {
        let phase = load_phase(tx, phase_id)?;
        let (_, used) = refresh_phase(tx, &phase)?;
        if used > Decimal::ZERO {
            return Err(BudgetError::ConstraintViolation(format!(
                "Phase {} '{}' has {} committed to contracts and cannot be deleted",
                phase.phase_number, phase.phase_name, used
            )));
        }

        let invoice_only = tx.count_invoice_only_contracts(phase_id)?;
        if invoice_only > 0 {
            log::warn!(
                "Deleting phase {} removes {} invoice-only contracts",
                phase_id,
                invoice_only
            );
        }

        tx.delete_phase_row(phase_id)?;
        let renumbered = tx.resequence_phases(&phase.project_id)?;
        log::info!(
            "Deleted phase {} '{}' from project {}; {} phases renumbered",
            phase.phase_number,
            phase.phase_name,
            phase.project_id,
            renumbered
        );
        Ok(tx.get_phases_for_project(&phase.project_id)?)
    })
}

pub fn list_phases(db: &BudgetDb, project_id: &str) -> Result<Vec<DbPhase>, BudgetError> {
    load_project(db, project_id)?;
    Ok(db.get_phases_for_project(project_id)?)
}
