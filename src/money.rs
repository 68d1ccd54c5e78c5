//! Monetary arithmetic on `Decimal`.
//!
//! Full precision is kept in storage and in every intermediate sum; rounding
//! happens only when a figure is formatted for display (two decimals) or turned
//! into a whole percentage.
//!
//! Every operation that can leave `Decimal`'s range is checked and reports a
//! `BudgetError::Validation` instead of overflowing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::BudgetError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn out_of_range(what: &str) -> BudgetError {
    BudgetError::Validation(format!("{} is too large to represent", what))
}

/// `a + b`, or a validation error naming `what` when the sum overflows.
pub fn add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, BudgetError> {
    a.checked_add(b).ok_or_else(|| out_of_range(what))
}

/// `a - b`, or a validation error naming `what` when the result overflows.
pub fn sub(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, BudgetError> {
    a.checked_sub(b).ok_or_else(|| out_of_range(what))
}

/// Sum of `values`, checked at every step.
pub fn sum<I>(values: I, what: &str) -> Result<Decimal, BudgetError>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| add(total, value, what))
}

/// VAT portion of a base amount. `vat_rate` is a fraction (0.25 = 25 %).
pub fn vat_amount(base_amount: Decimal, vat_rate: Decimal) -> Result<Decimal, BudgetError> {
    base_amount
        .checked_mul(vat_rate)
        .map(|vat| vat.normalize())
        .ok_or_else(|| out_of_range("VAT amount"))
}

/// Contract cost: base plus VAT.
pub fn contract_cost(base_amount: Decimal, vat_rate: Decimal) -> Result<Decimal, BudgetError> {
    let vat = vat_amount(base_amount, vat_rate)?;
    Ok(add(base_amount, vat, "Contract cost")?.normalize())
}

/// Payment due for a milestone worth `percentage` of the contract.
pub fn milestone_amount(
    contract_cost: Decimal,
    percentage: Decimal,
) -> Result<Decimal, BudgetError> {
    contract_cost
        .checked_mul(percentage)
        .and_then(|scaled| scaled.checked_div(HUNDRED))
        .map(|amount| amount.normalize())
        .ok_or_else(|| out_of_range("Milestone amount"))
}

/// Round half away from zero to two decimals, the precision shown to users.
pub fn round_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Display string with exactly two decimals.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", round_display(amount))
}

/// `part / whole` as a whole-number percentage; 0 when `whole` is not positive.
pub fn whole_percent(part: Decimal, whole: Decimal) -> u32 {
    if whole <= Decimal::ZERO || part <= Decimal::ZERO {
        return 0;
    }
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(HUNDRED))
        .map_or(u32::MAX, |percent| {
            percent
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_u32()
                .unwrap_or(u32::MAX)
        })
}
