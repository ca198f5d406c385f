// Winner payouts: proportional share of the distributable pool.

use rust_decimal::Decimal;

use super::pool::SettlementResult;
use super::SettlementError;
use crate::market::outcome::Outcome;

/// Amount a bettor on `outcome` receives if `outcome` is the declared winner.
///
/// With a uniform stake this is `distributable_pool / count(outcome)`; under
/// the single-slot rule that is the whole distributable pool.
pub fn compute_payout(
    outcome: Outcome,
    settlement: &SettlementResult,
) -> Result<Decimal, SettlementError> {
    payout_for_stake(outcome, settlement.stake_amount, settlement)
}

/// Proportional payout for a bet of `stake` on the winning `outcome`:
/// `distributable_pool * stake / totals[outcome]`.
pub fn payout_for_stake(
    outcome: Outcome,
    stake: Decimal,
    settlement: &SettlementResult,
) -> Result<Decimal, SettlementError> {
    let outcome_total = settlement.totals[outcome];
    if settlement.counts[outcome] == 0 || outcome_total.is_zero() {
        return Err(SettlementError::NoWinnerToPay { outcome });
    }
    if stake <= Decimal::ZERO || stake > outcome_total {
        return Err(SettlementError::Validation {
            field: "stake".into(),
            message: format!("must be in (0, {outcome_total}], got {stake}"),
        });
    }

    settlement
        .distributable_pool
        .checked_mul(stake)
        .and_then(|weighted| weighted.checked_div(outcome_total))
        .ok_or(SettlementError::Overflow { what: "payout" })
}
