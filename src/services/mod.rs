//! Business operations over the budget store.
//!
//! Every mutation runs in one `BudgetDb::with_transaction` call together with
//! the phase recalculation it triggers.

pub mod budget;
pub mod contracts;
pub mod dashboard;
pub mod milestones;
pub mod phases;
pub mod projects;
