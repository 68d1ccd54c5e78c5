//! Read-only view of the Accounting collaborator.
//!
//! Actual money movement (invoices, payments) is recorded by the Accounting
//! module. The budget engine only consumes its per-contract aggregates and
//! never writes back.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BudgetError;

/// Aggregated payment position of one contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTotals {
    pub total_paid: Decimal,
    pub total_owed: Decimal,
}

/// Per-contract payment aggregates supplied by Accounting.
///
/// Contracts with no payment records report zero totals rather than an error.
pub trait PaymentLedger {
    fn contract_totals(&self, contract_id: &str) -> Result<PaymentTotals, BudgetError>;
}

/// Point-in-time copy of Accounting's aggregates, keyed by contract ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    totals: HashMap<String, PaymentTotals>,
}

impl LedgerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the totals for a contract, replacing any earlier entry.
    pub fn insert(&mut self, contract_id: impl Into<String>, totals: PaymentTotals) {
        self.totals.insert(contract_id.into(), totals);
    }

    pub fn with_paid(
        mut self,
        contract_id: impl Into<String>,
        paid: Decimal,
        owed: Decimal,
    ) -> Self {
        self.insert(
            contract_id,
            PaymentTotals {
                total_paid: paid,
                total_owed: owed,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

impl FromIterator<(String, PaymentTotals)> for LedgerSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, PaymentTotals)>>(iter: I) -> Self {
        LedgerSnapshot {
            totals: iter.into_iter().collect(),
        }
    }
}

impl PaymentLedger for LedgerSnapshot {
    fn contract_totals(&self, contract_id: &str) -> Result<PaymentTotals, BudgetError> {
        Ok(self.totals.get(contract_id).copied().unwrap_or_default())
    }
}

impl<L: PaymentLedger + ?Sized> PaymentLedger for &L {
    fn contract_totals(&self, contract_id: &str) -> Result<PaymentTotals, BudgetError> {
        (**self).contract_totals(contract_id)
    }
}
