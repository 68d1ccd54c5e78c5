// Projects service — project registration and project-level edits.
// Projects are never deleted here.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::db::{BudgetDb, DbProject};
use crate::error::BudgetError;
use crate::money;
use crate::types::{BudgetWarning, Commit, NewProject, ProjectStatus};

fn load_project(db: &BudgetDb, project_id: &str) -> Result<DbProject, BudgetError> {
    db.get_project(project_id)?
        .ok_or_else(|| BudgetError::not_found("Project", project_id))
}

fn validate_budget(budget: Decimal) -> Result<(), BudgetError> {
    if budget < Decimal::ZERO {
        return Err(BudgetError::Validation(
            "Project budget cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Register a project with its total budget.
pub fn create_project(db: &BudgetDb, request: NewProject) -> Result<DbProject, BudgetError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(BudgetError::Validation("Project name is required".to_string()));
    }
    validate_budget(request.budget)?;
    if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
        if end < start {
            return Err(BudgetError::Validation(format!(
                "Project ends ({}) before it starts ({})",
                end, start
            )));
        }
    }

    let now = Utc::now().to_rfc3339();
    let project = DbProject {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        budget: request.budget.normalize(),
        status: request.status,
        start_date: request.start_date,
        end_date: request.end_date,
        created_at: now.clone(),
        updated_at: now,
    };
    db.insert_project(&project)?;
    log::info!(
        "Created project '{}' ({}) with budget {}",
        project.name,
        project.id,
        project.budget
    );
    Ok(project)
}

pub fn get_project(db: &BudgetDb, project_id: &str) -> Result<DbProject, BudgetError> {
    load_project(db, project_id)
}

pub fn list_projects(db: &BudgetDb) -> Result<Vec<DbProject>, BudgetError> {
    Ok(db.get_all_projects()?)
}

pub fn update_project_status(
    db: &BudgetDb,
    project_id: &str,
    status: ProjectStatus,
) -> Result<DbProject, BudgetError> {
    db.with_transaction(|tx| {
        if tx.update_project_status(project_id, status)? == 0 {
            return Err(BudgetError::not_found("Project", project_id));
        }
        log::info!("Project {} status -> {}", project_id, status.as_str());
        load_project(tx, project_id)
    })
}

/// Change a project's total budget.
///
/// When the project's phases no longer add up to the new budget the change
/// needs `force`, the same as phase setup.
pub fn update_project_budget(
    db: &BudgetDb,
    project_id: &str,
    budget: Decimal,
    force: bool,
) -> Result<Commit<DbProject>, BudgetError> {
    validate_budget(budget)?;

    db.with_transaction(|tx| {
        let project = load_project(tx, project_id)?;
        let phases = tx.get_phases_for_project(project_id)?;

        let mut warnings = Vec::new();
        if !phases.is_empty() {
            let total_allocated = money::sum(
                phases.iter().map(|p| p.budget_allocated),
                "Total phase allocation",
            )?;
            if total_allocated != budget {
                warnings.push(BudgetWarning::ProjectAllocationMismatch {
                    project_budget: budget.normalize(),
                    total_allocated: total_allocated.normalize(),
                    difference: (total_allocated - budget).normalize(),
                });
            }
        }
        if !warnings.is_empty() && !force {
            return Ok(Commit::NeedsConfirmation { warnings });
        }

        tx.update_project_budget(project_id, budget.normalize())?;
        log::info!(
            "Project {} budget {} -> {}",
            project_id,
            project.budget,
            budget.normalize()
        );
        let value = load_project(tx, project_id)?;
        Ok(Commit::Applied { value, warnings })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::*;
    use crate::services::phases;
    use crate::types::PhaseDefinition;

    fn new_project(name: &str, budget: i64) -> NewProject {
        NewProject {
            name: name.to_string(),
            budget: Decimal::from(budget),
            status: ProjectStatus::Planning,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn test_create_and_list_projects() {
        let db = test_db();
        let b = create_project(&db, new_project("  Zagreb Residence ", 1_000_000)).unwrap();
        create_project(&db, new_project("Adriatic Villas", 500_000)).unwrap();

        assert_eq!(b.name, "Zagreb Residence");
        let names: Vec<String> = list_projects(&db)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Adriatic Villas", "Zagreb Residence"]);
        assert_eq!(get_project(&db, &b.id).unwrap().budget, Decimal::from(1_000_000));
    }

    #[test]
    fn test_create_project_validation() {
        let db = test_db();
        assert!(matches!(
            create_project(&db, new_project(" ", 10)),
            Err(BudgetError::Validation(_))
        ));
        assert!(matches!(
            create_project(&db, new_project("Negative", -10)),
            Err(BudgetError::Validation(_))
        ));
        let mut backwards = new_project("Backwards", 10);
        backwards.start_date = chrono::NaiveDate::from_ymd_opt(2026, 6, 1);
        backwards.end_date = chrono::NaiveDate::from_ymd_opt(2026, 1, 1);
        assert!(create_project(&db, backwards).is_err());
        assert!(list_projects(&db).unwrap().is_empty());
    }

    #[test]
    fn test_update_status() {
        let db = test_db();
        let project = create_project(&db, new_project("Site", 10)).unwrap();
        let updated = update_project_status(&db, &project.id, ProjectStatus::InProgress).unwrap();
        assert_eq!(updated.status, ProjectStatus::InProgress);
        assert!(matches!(
            update_project_status(&db, "missing", ProjectStatus::Completed),
            Err(BudgetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_budget_change_against_phases_needs_confirmation() {
        let db = test_db();
        let project = create_project(&db, new_project("Site", 1_000)).unwrap();

        // No phases yet: nothing to mismatch
        let commit = update_project_budget(&db, &project.id, Decimal::from(2_000), false).unwrap();
        assert!(commit.is_applied());

        phases::create_phases(
            &db,
            &project.id,
            vec![PhaseDefinition::new("Shell", Decimal::from(2_000))],
            false,
        )
        .unwrap();

        let pending = update_project_budget(&db, &project.id, Decimal::from(1_500), false).unwrap();
        assert!(!pending.is_applied());
        assert_eq!(get_project(&db, &project.id).unwrap().budget, Decimal::from(2_000));

        let applied = update_project_budget(&db, &project.id, Decimal::from(1_500), true)
            .unwrap()
            .into_applied()
            .unwrap();
        assert_eq!(applied.budget, Decimal::from(1_500));

        assert!(matches!(
            update_project_budget(&db, &project.id, Decimal::from(-1), true),
            Err(BudgetError::Validation(_))
        ));
    }
}
