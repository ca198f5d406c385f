// Pool totals: per-outcome stakes, total pool, commission, distributable pool.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PoolRules, SettlementError, SlotPolicy};
use crate::market::outcome::{Outcome, OutcomeMap};
use crate::market::state::BetRecord;

/// Breakdown of a match pool. Derived on demand, never stored by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub stake_amount: Decimal,
    /// Number of bets on each outcome.
    pub counts: OutcomeMap<u32>,
    /// `counts[o] * stake_amount`.
    pub totals: OutcomeMap<Decimal>,
    /// Sum of `totals`.
    pub total_pool: Decimal,
    pub house_commission_rate: Decimal,
    /// `total_pool - distributable_pool`.
    pub house_commission: Decimal,
    /// `total_pool * (1 - house_commission_rate)`.
    pub distributable_pool: Decimal,
}

impl SettlementResult {
    /// Amount each winner receives if `outcome` wins, or `None` when nobody
    /// bet on it.
    pub fn payout_per_winner(&self, outcome: Outcome) -> Option<Decimal> {
        let count = self.counts[outcome];
        if count == 0 {
            None
        } else {
            Some(self.distributable_pool / Decimal::from(count))
        }
    }

    /// Total number of bets in the pool.
    pub fn bet_count(&self) -> u32 {
        self.counts.sum()
    }
}

/// Compute the pool breakdown under the canonical rules (10% commission,
/// one bettor per outcome).
pub fn compute_pool_totals(
    bets: &[BetRecord],
    stake_amount: Decimal,
) -> Result<SettlementResult, SettlementError> {
    compute_pool_totals_with(bets, stake_amount, &PoolRules::default())
}

/// Compute the pool breakdown under the given rules.
///
/// Algorithm:
/// 1. Count bets per outcome. Under `SlotPolicy::SingleSlot` a second bet on
///    an occupied outcome is an invariant violation.
/// 2. `totals[o] = counts[o] * stake_amount`
/// 3. `total_pool = sum(totals)`
/// 4. `distributable_pool = total_pool * (1 - commission_rate)`
pub fn compute_pool_totals_with(
    bets: &[BetRecord],
    stake_amount: Decimal,
    rules: &PoolRules,
) -> Result<SettlementResult, SettlementError> {
    if stake_amount <= Decimal::ZERO {
        return Err(SettlementError::Validation {
            field: "stake_amount".into(),
            message: format!("must be > 0, got {stake_amount}"),
        });
    }
    validate_commission_rate(rules.commission_rate)?;

    let mut counts: OutcomeMap<u32> = OutcomeMap::default();
    for bet in bets {
        if rules.slot_policy == SlotPolicy::SingleSlot && counts[bet.outcome] > 0 {
            return Err(SettlementError::InvariantViolation {
                message: format!(
                    "outcome `{}` already holds a bet; bettor {} cannot share the slot",
                    bet.outcome, bet.bettor_id
                ),
            });
        }
        counts[bet.outcome] += 1;
    }

    let mut totals: OutcomeMap<Decimal> = OutcomeMap::default();
    for outcome in Outcome::ALL {
        totals[outcome] = stake_amount
            .checked_mul(Decimal::from(counts[outcome]))
            .ok_or(SettlementError::Overflow { what: "outcome total" })?;
    }

    let total_pool = Outcome::ALL
        .iter()
        .try_fold(Decimal::ZERO, |acc, o| acc.checked_add(totals[*o]))
        .ok_or(SettlementError::Overflow { what: "total pool" })?;

    let distributable_pool = total_pool
        .checked_mul(Decimal::ONE - rules.commission_rate)
        .ok_or(SettlementError::Overflow { what: "distributable pool" })?;

    Ok(SettlementResult {
        stake_amount,
        counts,
        totals,
        total_pool,
        house_commission_rate: rules.commission_rate,
        house_commission: total_pool - distributable_pool,
        distributable_pool,
    })
}

/// Check that a stake is positive and representable in the platform currency,
/// and that its share after commission is too.
///
/// Any pool is a whole number of stakes, so the second check means a sole
/// winner is always paid the distributable pool to the last unit.
pub fn validate_stake(stake_amount: Decimal, rules: &PoolRules) -> Result<(), SettlementError> {
    if stake_amount <= Decimal::ZERO {
        return Err(SettlementError::Validation {
            field: "stake_amount".into(),
            message: format!("must be > 0, got {stake_amount}"),
        });
    }
    if stake_amount.normalize().scale() > rules.currency_scale {
        return Err(SettlementError::Validation {
            field: "stake_amount".into(),
            message: format!(
                "at most {} decimal places allowed, got {stake_amount}",
                rules.currency_scale
            ),
        });
    }
    validate_commission_rate(rules.commission_rate)?;
    let share = stake_amount
        .checked_mul(Decimal::ONE - rules.commission_rate)
        .ok_or(SettlementError::Overflow { what: "stake share" })?;
    if share.normalize().scale() > rules.currency_scale {
        return Err(SettlementError::Validation {
            field: "stake_amount".into(),
            message: format!(
                "{stake_amount} leaves {share} after commission, which is not payable at {} decimal places",
                rules.currency_scale
            ),
        });
    }
    Ok(())
}

fn validate_commission_rate(rate: Decimal) -> Result<(), SettlementError> {
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(SettlementError::Validation {
            field: "commission_rate".into(),
            message: format!("must be in [0, 1), got {rate}"),
        });
    }
    Ok(())
}
