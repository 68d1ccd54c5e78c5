// Milestones service — percentage-of-contract payment milestones.
// The sum of a contract's milestone percentages never exceeds 100.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{BudgetDb, DbContract, DbMilestone};
use crate::error::BudgetError;
use crate::money;
use crate::types::{MilestoneStatus, MilestoneUpdate, NewMilestone};

const FULL_CONTRACT: Decimal = Decimal::ONE_HUNDRED;

/// A milestone with its payable amount.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneView {
    #[serde(flatten)]
    pub milestone: DbMilestone,
    pub amount: Decimal,
}

/// All milestones of a contract with allocation totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneSchedule {
    pub contract_id: String,
    pub contract_cost: Decimal,
    pub allocated_percentage: Decimal,
    pub remaining_percentage: Decimal,
    pub milestones: Vec<MilestoneView>,
}

/// Payable amount of a milestone: `contract_cost × percentage / 100`.
pub fn amount(contract_cost: Decimal, percentage: Decimal) -> Result<Decimal, BudgetError> {
    money::milestone_amount(contract_cost, percentage)
}

fn load_contract(db: &BudgetDb, contract_id: &str) -> Result<DbContract, BudgetError> {
    db.get_contract(contract_id)?
        .ok_or_else(|| BudgetError::not_found("Contract", contract_id))
}

fn load_milestone(db: &BudgetDb, milestone_id: &str) -> Result<DbMilestone, BudgetError> {
    db.get_milestone(milestone_id)?
        .ok_or_else(|| BudgetError::not_found("Milestone", milestone_id))
}

fn allocated_excluding(
    milestones: &[DbMilestone],
    exclude_milestone_id: Option<&str>,
) -> Result<Decimal, BudgetError> {
    let percentages = milestones
        .iter()
        .filter(|m| Some(m.id.as_str()) != exclude_milestone_id)
        .map(|m| m.percentage);
    money::sum(percentages, "Allocated percentage")
}

/// Percentage of the contract not yet promised to milestones.
///
/// `exclude_milestone_id` leaves one milestone out of the sum, for validating
/// an edit of that milestone in place.
pub fn remaining_percentage(
    db: &BudgetDb,
    contract_id: &str,
    exclude_milestone_id: Option<&str>,
) -> Result<Decimal, BudgetError> {
    load_contract(db, contract_id)?;
    let milestones = db.get_milestones_for_contract(contract_id)?;
    let allocated = allocated_excluding(&milestones, exclude_milestone_id)?;
    Ok((FULL_CONTRACT - allocated).normalize())
}

fn validate_name(name: &str) -> Result<(), BudgetError> {
    if name.trim().is_empty() {
        return Err(BudgetError::Validation(
            "Milestone name is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_percentage(percentage: Decimal, remaining: Decimal) -> Result<(), BudgetError> {
    if percentage <= Decimal::ZERO {
        return Err(BudgetError::Validation(
            "Milestone percentage must be greater than 0".to_string(),
        ));
    }
    if percentage > FULL_CONTRACT {
        return Err(BudgetError::Validation(format!(
            "Milestone percentage {}% cannot exceed 100%",
            percentage.normalize()
        )));
    }
    if percentage > remaining {
        return Err(BudgetError::Validation(format!(
            "Milestone percentage {}% exceeds available {}%",
            percentage.normalize(),
            remaining.max(Decimal::ZERO).normalize()
        )));
    }
    Ok(())
}

/// Validate and add a milestone to a contract.
///
/// The new milestone gets the next number after every number ever issued on
/// the contract, so numbers of deleted milestones are not handed out again.
pub fn validate_and_create(
    db: &BudgetDb,
    contract_id: &str,
    request: NewMilestone,
) -> Result<DbMilestone, BudgetError> {
    validate_name(&request.name)?;

    db.with_transaction(|tx| {
        let contract = load_contract(tx, contract_id)?;
        let remaining = remaining_percentage(tx, contract_id, None)?;
        validate_percentage(request.percentage, remaining)?;

        let number = contract
            .last_milestone_number
            .max(tx.max_milestone_number(contract_id)?)
            + 1;
        let now = Utc::now().to_rfc3339();
        let milestone = DbMilestone {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            milestone_number: number,
            milestone_name: request.name.trim().to_string(),
            description: request.description.clone(),
            percentage: request.percentage.normalize(),
            due_date: request.due_date,
            status: MilestoneStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };
        tx.insert_milestone(&milestone)?;
        tx.set_last_milestone_number(contract_id, number)?;

        log::info!(
            "Milestone #{} ({}%) added to contract {}",
            number,
            milestone.percentage,
            contract.contract_number
        );
        Ok(milestone)
    })
}

/// Validate and apply an edit to a milestone. The percentage bound is checked
/// against the other milestones only, so keeping or lowering the milestone's
/// own share always passes.
pub fn validate_and_update(
    db: &BudgetDb,
    milestone_id: &str,
    update: MilestoneUpdate,
) -> Result<DbMilestone, BudgetError> {
    db.with_transaction(|tx| {
        let mut milestone = load_milestone(tx, milestone_id)?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            milestone.milestone_name = name.trim().to_string();
        }
        if let Some(percentage) = update.percentage {
            let remaining = remaining_percentage(tx, &milestone.contract_id, Some(milestone_id))?;
            validate_percentage(percentage, remaining)?;
            milestone.percentage = percentage.normalize();
        }
        if let Some(description) = update.description {
            milestone.description = description;
        }
        if let Some(due_date) = update.due_date {
            milestone.due_date = due_date;
        }
        if let Some(status) = update.status {
            milestone.status = status;
        }

        tx.update_milestone(&milestone)?;
        Ok(milestone)
    })
}

/// Delete a milestone, freeing its percentage for reallocation.
pub fn delete_milestone(db: &BudgetDb, milestone_id: &str) -> Result<(), BudgetError> {
    let deleted = db.delete_milestone_row(milestone_id)?;
    if deleted == 0 {
        return Err(BudgetError::not_found("Milestone", milestone_id));
    }
    Ok(())
}

/// Milestones of a contract with computed amounts and allocation totals.
pub fn list_milestones(
    db: &BudgetDb,
    contract_id: &str,
) -> Result<MilestoneSchedule, BudgetError> {
    let contract = load_contract(db, contract_id)?;
    let milestones = db.get_milestones_for_contract(contract_id)?;
    let allocated = allocated_excluding(&milestones, None)?.normalize();

    let milestones = milestones
        .into_iter()
        .map(|m| {
            Ok(MilestoneView {
                amount: amount(contract.total_amount, m.percentage)?,
                milestone: m,
            })
        })
        .collect::<Result<Vec<_>, BudgetError>>()?;

    Ok(MilestoneSchedule {
        contract_id: contract.id,
        contract_cost: contract.total_amount,
        allocated_percentage: allocated,
        remaining_percentage: (FULL_CONTRACT - allocated).normalize(),
        milestones,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::*;
    use std::str::FromStr;

    fn pct(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn request(name: &str, percentage: &str) -> NewMilestone {
        NewMilestone {
            name: name.to_string(),
            description: None,
            percentage: pct(percentage),
            due_date: None,
        }
    }

    fn contract_db(cost: i64) -> BudgetDb {
        let db = test_db();
        let phase = seeded_phase(&db, 1_000_000);
        db.insert_contract(&sample_contract("c-1", &phase, "sub-1", cost))
            .unwrap();
        db
    }

    fn total_percentage(db: &BudgetDb) -> Decimal {
        db.get_milestones_for_contract("c-1")
            .unwrap()
            .iter()
            .map(|m| m.percentage)
            .sum()
    }

    #[test]
    fn test_third_milestone_bounded_by_remaining() {
        let db = contract_db(200_000);
        validate_and_create(&db, "c-1", request("Foundations", "40")).unwrap();
        validate_and_create(&db, "c-1", request("Shell", "50")).unwrap();
        assert_eq!(remaining_percentage(&db, "c-1", None).unwrap(), pct("10"));

        let err = validate_and_create(&db, "c-1", request("Roof", "15")).unwrap_err();
        match err {
            BudgetError::Validation(msg) => assert!(
                msg.contains("exceeds available 10%"),
                "unexpected message: {}",
                msg
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(total_percentage(&db), pct("90"));

        validate_and_create(&db, "c-1", request("Roof", "10")).unwrap();
        assert_eq!(remaining_percentage(&db, "c-1", None).unwrap(), Decimal::ZERO);
        assert_eq!(total_percentage(&db), pct("100"));
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let db = contract_db(1_000);
        for (name, p) in [("", "10"), ("   ", "10"), ("Zero", "0"), ("Negative", "-5"), ("Over", "100.01")] {
            let err = validate_and_create(&db, "c-1", request(name, p)).unwrap_err();
            assert!(matches!(err, BudgetError::Validation(_)), "{} / {}", name, p);
        }
        assert!(db.get_milestones_for_contract("c-1").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_contract() {
        let db = contract_db(1_000);
        assert!(matches!(
            remaining_percentage(&db, "c-404", None),
            Err(BudgetError::NotFound { entity: "Contract", .. })
        ));
        assert!(matches!(
            validate_and_create(&db, "c-404", request("A", "5")),
            Err(BudgetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_excludes_own_allocation() {
        let db = contract_db(1_000);
        let first = validate_and_create(&db, "c-1", request("Deposit", "30")).unwrap();
        validate_and_create(&db, "c-1", request("Handover", "60")).unwrap();

        assert_eq!(
            remaining_percentage(&db, "c-1", Some(&first.id)).unwrap(),
            pct("40")
        );

        let grown = validate_and_update(
            &db,
            &first.id,
            MilestoneUpdate {
                percentage: Some(pct("40")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(grown.percentage, pct("40"));

        let err = validate_and_update(
            &db,
            &first.id,
            MilestoneUpdate {
                percentage: Some(pct("40.5")),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BudgetError::Validation(_)));
        assert_eq!(total_percentage(&db), pct("100"));
    }

    #[test]
    fn test_update_status_and_name() {
        let db = contract_db(1_000);
        let m = validate_and_create(&db, "c-1", request("Deposit", "30")).unwrap();
        let updated = validate_and_update(
            &db,
            &m.id,
            MilestoneUpdate {
                name: Some("Advance payment".to_string()),
                status: Some(MilestoneStatus::Paid),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.milestone_name, "Advance payment");
        assert_eq!(updated.status, MilestoneStatus::Paid);
        assert_eq!(updated.percentage, pct("30"));

        let err = validate_and_update(
            &db,
            &m.id,
            MilestoneUpdate {
                name: Some(" ".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BudgetError::Validation(_)));
    }

    #[test]
    fn test_numbers_are_sequential_and_never_reused() {
        let db = contract_db(1_000);
        let a = validate_and_create(&db, "c-1", request("A", "10")).unwrap();
        let b = validate_and_create(&db, "c-1", request("B", "10")).unwrap();
        assert_eq!((a.milestone_number, b.milestone_number), (1, 2));

        delete_milestone(&db, &b.id).unwrap();
        let c = validate_and_create(&db, "c-1", request("C", "10")).unwrap();
        assert_eq!(c.milestone_number, 3);
    }

    #[test]
    fn test_delete_frees_percentage() {
        let db = contract_db(1_000);
        let m = validate_and_create(&db, "c-1", request("All", "100")).unwrap();
        assert_eq!(remaining_percentage(&db, "c-1", None).unwrap(), Decimal::ZERO);

        delete_milestone(&db, &m.id).unwrap();
        assert_eq!(remaining_percentage(&db, "c-1", None).unwrap(), pct("100"));
        assert!(matches!(
            delete_milestone(&db, &m.id),
            Err(BudgetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_schedule_amounts() {
        let db = contract_db(250_000);
        validate_and_create(&db, "c-1", request("Deposit", "12.5")).unwrap();
        validate_and_create(&db, "c-1", request("Shell", "50")).unwrap();

        let schedule = list_milestones(&db, "c-1").unwrap();
        assert_eq!(schedule.contract_cost, Decimal::from(250_000));
        assert_eq!(schedule.allocated_percentage, pct("62.5"));
        assert_eq!(schedule.remaining_percentage, pct("37.5"));
        let amounts: Vec<Decimal> = schedule.milestones.iter().map(|m| m.amount).collect();
        assert_eq!(amounts, vec![Decimal::from(31_250), Decimal::from(125_000)]);
    }

    #[test]
    fn test_schedule_of_contract_beyond_decimal_range_is_an_error() {
        let db = test_db();
        let phase = seeded_phase(&db, 1_000_000);
        let mut huge = sample_contract("c-1", &phase, "sub-1", 0);
        huge.base_amount = Decimal::MAX;
        huge.total_amount = Decimal::MAX;
        db.insert_contract(&huge).unwrap();
        validate_and_create(&db, "c-1", request("Shell", "50")).unwrap();

        assert!(matches!(
            list_milestones(&db, "c-1"),
            Err(BudgetError::Validation(_))
        ));
        assert!(amount(Decimal::MAX, pct("50")).is_err());
        assert_eq!(remaining_percentage(&db, "c-1", None).unwrap(), pct("50"));
    }

    #[test]
    fn test_amount_formula() {
        assert_eq!(amount(Decimal::from(112_500), pct("40")).unwrap(), Decimal::from(45_000));
        assert_eq!(amount(Decimal::ZERO, pct("40")).unwrap(), Decimal::ZERO);
    }
}
