//! Domain vocabulary shared by the store and the services: statuses, request
//! and patch structs, engine configuration, and the two-phase commit envelope.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration, read from `~/.sitebudget/config.json`.
///
/// Every field has a default so an absent or partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Explicit database file. Defaults to `~/.sitebudget/sitebudget.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default = "default_contract_number_prefix")]
    pub contract_number_prefix: String,
    #[serde(default = "default_contract_number_width")]
    pub contract_number_width: usize,
    /// Total attempts when a generated contract number collides.
    #[serde(default = "default_contract_number_attempts")]
    pub contract_number_attempts: u32,
    #[serde(default = "default_true")]
    pub recalculate_on_startup: bool,
}

fn default_contract_number_prefix() -> String {
    "CNT".to_string()
}

fn default_contract_number_width() -> usize {
    4
}

fn default_contract_number_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: None,
            contract_number_prefix: default_contract_number_prefix(),
            contract_number_width: default_contract_number_width(),
            contract_number_attempts: default_contract_number_attempts(),
            recalculate_on_startup: true,
        }
    }
}

/// Settings the contract registrar needs, split from `Config` so services
/// don't depend on file-level concerns.
#[derive(Debug, Clone)]
pub struct NumberingPolicy {
    pub prefix: String,
    pub width: usize,
    pub attempts: u32,
}

impl Default for NumberingPolicy {
    fn default() -> Self {
        NumberingPolicy::from(&Config::default())
    }
}

impl From<&Config> for NumberingPolicy {
    fn from(config: &Config) -> Self {
        NumberingPolicy {
            prefix: config.contract_number_prefix.clone(),
            width: config.contract_number_width,
            attempts: config.contract_number_attempts.max(1),
        }
    }
}

// =============================================================================
// Statuses
// =============================================================================

macro_rules! storage_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// String label for SQL storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Parse from SQL string.
            pub fn from_db(s: &str) -> Option<Self> {
                match s {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

storage_enum! {
    /// Lifecycle of a whole project.
    ProjectStatus {
        Planning => "planning",
        InProgress => "in_progress",
        Completed => "completed",
        OnHold => "on_hold",
    }
}

storage_enum! {
    /// Lifecycle of a phase. Operator-controlled; any transition is stored as given.
    PhaseStatus {
        Planning => "planning",
        Active => "active",
        Completed => "completed",
        OnHold => "on_hold",
    }
}

storage_enum! {
    ContractStatus {
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

storage_enum! {
    MilestoneStatus {
        Pending => "pending",
        Completed => "completed",
        Paid => "paid",
    }
}

storage_enum! {
    /// Who nominally funds a contract.
    FinancingKind {
        Investor => "investor",
        Bank => "bank",
    }
}

/// Investor or bank reference attached to a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingSource {
    pub kind: FinancingKind,
    pub id: String,
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    pub budget: Decimal,
    #[serde(default = "default_project_status")]
    pub status: ProjectStatus,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_project_status() -> ProjectStatus {
    ProjectStatus::Planning
}

/// One phase in a phase-setup batch. Numbering comes from input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    pub phase_name: String,
    pub budget_allocated: Decimal,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl PhaseDefinition {
    pub fn new(phase_name: impl Into<String>, budget_allocated: Decimal) -> Self {
        PhaseDefinition {
            phase_name: phase_name.into(),
            budget_allocated,
            start_date: None,
            end_date: None,
        }
    }
}

/// Partial phase edit. `None` leaves a field untouched; `budget_used` is not
/// editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseUpdate {
    #[serde(default)]
    pub phase_name: Option<String>,
    #[serde(default)]
    pub budget_allocated: Option<Decimal>,
    #[serde(default)]
    pub status: Option<PhaseStatus>,
    #[serde(default)]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub end_date: Option<Option<NaiveDate>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubcontractor {
    pub name: String,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Either reuse a registered subcontractor or register one inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum SubcontractorRef {
    Existing { id: String },
    New(NewSubcontractor),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContract {
    pub phase_id: String,
    pub subcontractor: SubcontractorRef,
    pub job_description: String,
    pub base_amount: Decimal,
    /// Fraction, e.g. `0.25` for 25 % VAT.
    pub vat_rate: Decimal,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Contract deadline.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub financed_by: Option<FinancingSource>,
    /// False for invoice-only engagements, which carry no contract amount.
    #[serde(default = "default_true")]
    pub has_contract: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractUpdate {
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub base_amount: Option<Decimal>,
    #[serde(default)]
    pub vat_rate: Option<Decimal>,
    #[serde(default)]
    pub has_contract: Option<bool>,
    #[serde(default)]
    pub status: Option<ContractStatus>,
    #[serde(default)]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub financed_by: Option<Option<FinancingSource>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMilestone {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub percentage: Decimal,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub percentage: Option<Decimal>,
    #[serde(default)]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub status: Option<MilestoneStatus>,
}

// =============================================================================
// Two-phase commit envelope
// =============================================================================

/// A non-blocking condition the caller must acknowledge before a change is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum BudgetWarning {
    /// Phase allocations do not add up to the project budget (over or under).
    #[serde(rename_all = "camelCase")]
    ProjectAllocationMismatch {
        project_budget: Decimal,
        total_allocated: Decimal,
        /// `total_allocated - project_budget`; positive means over-allocated.
        difference: Decimal,
    },
    /// Committed contracts already exceed the new allocation.
    #[serde(rename_all = "camelCase")]
    AllocationBelowCommitted {
        phase_id: String,
        budget_allocated: Decimal,
        budget_used: Decimal,
    },
    /// A contract edit raises cost beyond what the phase has left.
    #[serde(rename_all = "camelCase")]
    ContractExceedsAvailable {
        phase_id: String,
        requested_increase: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },
}

/// Outcome of a warning-class mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum Commit<T> {
    /// The change was written. Warnings were acknowledged via `force`.
    Applied { value: T, warnings: Vec<BudgetWarning> },
    /// Nothing was written; repeat with `force = true` to proceed.
    NeedsConfirmation { warnings: Vec<BudgetWarning> },
}

impl<T> Commit<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Commit::Applied { .. })
    }

    pub fn warnings(&self) -> &[BudgetWarning] {
        match self {
            Commit::Applied { warnings, .. } | Commit::NeedsConfirmation { warnings } => warnings,
        }
    }

    /// The applied value, if the change went through.
    pub fn into_applied(self) -> Option<T> {
        match self {
            Commit::Applied { value, .. } => Some(value),
            Commit::NeedsConfirmation { .. } => None,
        }
    }
}
