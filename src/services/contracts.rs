// Contracts service — subcontractor contracts attached to phases.
// Issues contract numbers, prices contracts (base + VAT), enforces the phase
// budget on creation, and keeps the phase's budget_used in step.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::db::{BudgetDb, DbContract, DbPhase, DbSubcontractor};
use crate::error::BudgetError;
use crate::money;
use crate::services::budget::{load_phase, refresh_phase};
use crate::types::{
    BudgetWarning, Commit, ContractStatus, ContractUpdate, NewContract, NewSubcontractor,
    NumberingPolicy, SubcontractorRef,
};

// =============================================================================
// Contract numbers
// =============================================================================

/// Sequence part of a number like `CNT-2026-0042`, given the `CNT-2026-` prefix.
fn sequence_of(contract_number: &str, prefix: &str) -> Option<u32> {
    contract_number.strip_prefix(prefix)?.parse().ok()
}

/// Next candidate number for `year`, from a fresh read of the store.
///
/// Starts after both the count and the highest sequence in use, so numbers
/// freed by deleted contracts are not the first candidates.
pub(crate) fn next_contract_number(
    db: &BudgetDb,
    policy: &NumberingPolicy,
    year: i32,
) -> Result<String, BudgetError> {
    let prefix = format!("{}-{}-", policy.prefix, year);
    let existing = db.contract_numbers_with_prefix(&prefix)?;
    let highest = existing
        .iter()
        .filter_map(|n| sequence_of(n, &prefix))
        .max()
        .unwrap_or(0);
    let next = highest.max(existing.len() as u32) + 1;
    Ok(format!("{}{:0width$}", prefix, next, width = policy.width))
}

/// Generate a contract number for a new contract in `project_id`, in the form
/// `CNT-<year>-<sequence>`.
///
/// The number is only a candidate: a concurrent creator may claim it first,
/// which `create_contract` handles by asking again.
pub fn generate_unique_contract_number(
    db: &BudgetDb,
    project_id: &str,
    policy: &NumberingPolicy,
) -> Result<String, BudgetError> {
    if db.get_project(project_id)?.is_none() {
        return Err(BudgetError::not_found("Project", project_id));
    }
    next_contract_number(db, policy, Utc::now().year())
}

/// Insert `contract`, drawing a fresh number from `next_number` after each
/// collision, up to `attempts` tries in total.
///
/// Inside the write transaction the sequence scan already skips every stored
/// number, so a collision means a number was taken outside the sequence
/// (an import or a hand-edited row written between scan and insert).
fn insert_with_unique_number<F>(
    db: &BudgetDb,
    attempts: u32,
    contract: &mut DbContract,
    mut next_number: F,
) -> Result<(), BudgetError>
where
    F: FnMut(&BudgetDb) -> Result<String, BudgetError>,
{
    let mut attempt = 1;
    loop {
        contract.contract_number = next_number(db)?;
        match db.insert_contract(contract) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_unique_violation() => {
                // A collision on anything but the number is not ours to retry
                if !db.contract_number_exists(&contract.contract_number)? {
                    return Err(e.into());
                }
                if attempt >= attempts {
                    return Err(BudgetError::DuplicateContractNumber(
                        contract.contract_number.clone(),
                    ));
                }
                log::warn!(
                    "Contract number {} already taken (attempt {}/{}), regenerating",
                    contract.contract_number,
                    attempt,
                    attempts
                );
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// =============================================================================
// Validation and pricing
// =============================================================================

fn validate_amounts(base_amount: Decimal, vat_rate: Decimal) -> Result<(), BudgetError> {
    if base_amount < Decimal::ZERO {
        return Err(BudgetError::Validation(
            "Contract amount cannot be negative".to_string(),
        ));
    }
    if vat_rate < Decimal::ZERO || vat_rate > Decimal::ONE {
        return Err(BudgetError::Validation(format!(
            "VAT rate {} must be a fraction between 0 and 1",
            vat_rate
        )));
    }
    Ok(())
}

fn validate_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), BudgetError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(BudgetError::Validation(format!(
                "Contract deadline {} is before its start date {}",
                end, start
            )));
        }
    }
    Ok(())
}

/// Fill the monetary fields of a contract from base amount and VAT rate.
/// Invoice-only engagements carry zero in every monetary field.
fn price(contract: &mut DbContract) -> Result<(), BudgetError> {
    if contract.has_contract {
        contract.vat_amount = money::vat_amount(contract.base_amount, contract.vat_rate)?;
        contract.total_amount = money::contract_cost(contract.base_amount, contract.vat_rate)?;
    } else {
        contract.base_amount = Decimal::ZERO;
        contract.vat_rate = Decimal::ZERO;
        contract.vat_amount = Decimal::ZERO;
        contract.total_amount = Decimal::ZERO;
    }
    Ok(())
}

fn resolve_subcontractor(
    db: &BudgetDb,
    subcontractor: &SubcontractorRef,
) -> Result<DbSubcontractor, BudgetError> {
    match subcontractor {
        SubcontractorRef::Existing { id } => db
            .get_subcontractor(id)?
            .ok_or_else(|| BudgetError::not_found("Subcontractor", id)),
        SubcontractorRef::New(new) => register_subcontractor(db, new),
    }
}

fn register_subcontractor(
    db: &BudgetDb,
    new: &NewSubcontractor,
) -> Result<DbSubcontractor, BudgetError> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(BudgetError::Validation(
            "Subcontractor name is required".to_string(),
        ));
    }
    let now = Utc::now().to_rfc3339();
    let sub = DbSubcontractor {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        contact_person: new.contact_person.clone(),
        email: new.email.clone(),
        phone: new.phone.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    db.insert_subcontractor(&sub)?;
    log::info!("Registered subcontractor {} ({})", sub.name, sub.id);
    Ok(sub)
}

fn load_contract(db: &BudgetDb, contract_id: &str) -> Result<DbContract, BudgetError> {
    db.get_contract(contract_id)?
        .ok_or_else(|| BudgetError::not_found("Contract", contract_id))
}

/// Fail with `InsufficientBudget` when `cost` does not fit in the phase.
fn ensure_fits(phase: &DbPhase, used: Decimal, cost: Decimal) -> Result<(), BudgetError> {
    let available = phase.budget_allocated - used;
    if cost > available {
        return Err(BudgetError::InsufficientBudget {
            phase_id: phase.id.clone(),
            requested: cost,
            available,
            shortfall: money::sub(cost, available, "Shortfall")?.normalize(),
        });
    }
    Ok(())
}

// =============================================================================
// Operations
// =============================================================================

/// Create a contract in a phase.
///
/// With `has_contract` the cost (`base + base × vat_rate`) must fit in the
/// phase's available budget; otherwise the request is rejected with
/// `InsufficientBudget`. Invoice-only engagements skip the check and carry
/// zero cost. An inline subcontractor is registered in the same transaction,
/// so a rejected contract leaves nothing behind.
pub fn create_contract(
    db: &BudgetDb,
    policy: &NumberingPolicy,
    request: NewContract,
) -> Result<DbContract, BudgetError> {
    if request.has_contract {
        validate_amounts(request.base_amount, request.vat_rate)?;
    }
    validate_dates(request.start_date, request.end_date)?;

    db.with_transaction(|tx| {
        let phase = load_phase(tx, &request.phase_id)?;
        let subcontractor = resolve_subcontractor(tx, &request.subcontractor)?;

        let now = Utc::now().to_rfc3339();
        let mut contract = DbContract {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: phase.project_id.clone(),
            phase_id: phase.id.clone(),
            subcontractor_id: subcontractor.id.clone(),
            contract_number: String::new(),
            job_description: request.job_description.trim().to_string(),
            base_amount: request.base_amount.normalize(),
            vat_rate: request.vat_rate.normalize(),
            vat_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            has_contract: request.has_contract,
            financed_by: request.financed_by.clone(),
            status: ContractStatus::Active,
            start_date: request.start_date,
            end_date: request.end_date,
            last_milestone_number: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        price(&mut contract)?;

        if contract.has_contract {
            let (_, used) = refresh_phase(tx, &phase)?;
            ensure_fits(&phase, used, contract.total_amount)?;
        }

        let year = Utc::now().year();
        insert_with_unique_number(tx, policy.attempts, &mut contract, |db| {
            next_contract_number(db, policy, year)
        })?;
        let (_, used) = refresh_phase(tx, &phase)?;

        log::info!(
            "Contract {} created in phase {} for {} (cost {}, phase used {})",
            contract.contract_number,
            phase.phase_number,
            subcontractor.name,
            money::format_amount(contract.total_amount),
            money::format_amount(used)
        );
        Ok(contract)
    })
}

/// Apply an update to a copy of the contract and collect the warnings it
/// would raise. Reads only, apart from refreshing the phase cache.
fn plan_contract_update(
    db: &BudgetDb,
    contract_id: &str,
    update: &ContractUpdate,
) -> Result<(DbContract, DbPhase, Vec<BudgetWarning>), BudgetError> {
    let current = load_contract(db, contract_id)?;
    let phase = load_phase(db, &current.phase_id)?;

    let mut next = current.clone();
    if let Some(description) = &update.job_description {
        next.job_description = description.trim().to_string();
    }
    if let Some(has_contract) = update.has_contract {
        next.has_contract = has_contract;
    }
    if let Some(base_amount) = update.base_amount {
        next.base_amount = base_amount.normalize();
    }
    if let Some(vat_rate) = update.vat_rate {
        next.vat_rate = vat_rate.normalize();
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
    if let Some(financed_by) = &update.financed_by {
        next.financed_by = financed_by.clone();
    }

    if next.has_contract {
        validate_amounts(next.base_amount, next.vat_rate)?;
    }
    validate_dates(next.start_date, next.end_date)?;
    price(&mut next)?;

    let mut warnings = Vec::new();
    let increase = next.committed_cost() - current.committed_cost();
    if increase > Decimal::ZERO {
        let (_, used) = refresh_phase(db, &phase)?;
        let available = phase.budget_allocated - used;
        if increase > available {
            warnings.push(BudgetWarning::ContractExceedsAvailable {
                phase_id: phase.id.clone(),
                requested_increase: increase.normalize(),
                available,
                shortfall: money::sub(increase, available, "Shortfall")?.normalize(),
            });
        }
    }

    Ok((next, phase, warnings))
}

/// Dry run of `update_contract`: the warnings the edit would raise.
pub fn validate_contract_update(
    db: &BudgetDb,
    contract_id: &str,
    update: &ContractUpdate,
) -> Result<Vec<BudgetWarning>, BudgetError> {
    db.with_transaction(|tx| {
        let (_, _, warnings) = plan_contract_update(tx, contract_id, update)?;
        Ok(warnings)
    })
}

/// Edit a contract and recalculate its phase.
///
/// A cost increase beyond the phase's available budget is a warning, not an
/// error: without `force` nothing is written and the warning is returned.
pub fn update_contract(
    db: &BudgetDb,
    contract_id: &str,
    update: ContractUpdate,
    force: bool,
) -> Result<Commit<DbContract>, BudgetError> {
    db.with_transaction(|tx| {
        let (next, phase, warnings) = plan_contract_update(tx, contract_id, &update)?;
        if !warnings.is_empty() && !force {
            return Ok(Commit::NeedsConfirmation { warnings });
        }

        for warning in &warnings {
            log::warn!("Contract {} updated past warning: {:?}", next.contract_number, warning);
        }

        tx.update_contract(&next)?;
        refresh_phase(tx, &phase)?;
        let value = load_contract(tx, contract_id)?;
        Ok(Commit::Applied { value, warnings })
    })
}

/// Delete a contract and its milestones, then recalculate the phase.
/// Returns the phase's new `budget_used`.
pub fn delete_contract(db: &BudgetDb, contract_id: &str) -> Result<Decimal, BudgetError> {
    db.with_transaction(|tx| {
        let contract = load_contract(tx, contract_id)?;
        tx.delete_contract_row(contract_id)?;
        let phase = load_phase(tx, &contract.phase_id)?;
        let (_, used) = refresh_phase(tx, &phase)?;
        log::info!(
            "Contract {} deleted; phase {} budget_used now {}",
            contract.contract_number,
            phase.id,
            money::format_amount(used)
        );
        Ok(used)
    })
}

pub fn get_contract(db: &BudgetDb, contract_id: &str) -> Result<DbContract, BudgetError> {
    load_contract(db, contract_id)
}

pub fn list_contracts_for_phase(
    db: &BudgetDb,
    phase_id: &str,
) -> Result<Vec<DbContract>, BudgetError> {
    load_phase(db, phase_id)?;
    Ok(db.get_contracts_for_phase(phase_id)?)
}

pub fn list_subcontractors(db: &BudgetDb) -> Result<Vec<DbSubcontractor>, BudgetError> {
    Ok(db.get_all_subcontractors()?)
}

pub fn get_subcontractor(db: &BudgetDb, id: &str) -> Result<DbSubcontractor, BudgetError> {
    db.get_subcontractor(id)?
        .ok_or_else(|| BudgetError::not_found("Subcontractor", id))
}
