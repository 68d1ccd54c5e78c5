//! Budget allocation and reconciliation for construction projects.
//!
//! A project's budget is split across numbered phases; subcontractor contracts
//! draw on a phase's allocation and are paid out through percentage milestones.
//! Payments themselves come from the Accounting side through
//! [`accounting::PaymentLedger`].

pub mod accounting;
pub mod db;
pub mod error;
mod migrations;
pub mod money;
pub mod services;
pub mod state;
pub mod types;
