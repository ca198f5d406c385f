// Match resolution: final settlement once a result is declared.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::payout::payout_for_stake;
use super::pool::{compute_pool_totals_with, validate_stake, SettlementResult};
use super::{PoolRules, SettlementError, UnclaimedPolicy};
use crate::market::outcome::{Outcome, Score};
use crate::market::state::{BetRecord, Match, MatchId, MatchStatus, UserId};

/// Money owed to a single bettor after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub bettor_id: UserId,
    pub outcome: Outcome,
    pub amount: Decimal,
}

/// Where the pool goes once the winner is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disbursement {
    /// At least one bettor chose the winning outcome.
    Winners {
        payouts: Vec<Payout>,
        /// Commission plus any rounding remainder.
        house_revenue: Decimal,
    },
    /// Nobody chose the winning outcome.
    NoWinnerToPay {
        /// Distributable pool that no winner claims.
        unclaimed: Decimal,
        policy: UnclaimedPolicy,
        /// Stakes returned under `UnclaimedPolicy::Refund`; empty otherwise.
        refunds: Vec<Payout>,
        house_revenue: Decimal,
    },
}

/// Final, immutable settlement of a completed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub match_id: MatchId,
    pub winning_outcome: Outcome,
    pub final_score: Score,
    pub settlement: SettlementResult,
    pub disbursement: Disbursement,
}

impl Resolution {
    /// Every credit owed to a bettor, whether a payout or a refund.
    pub fn credits(&self) -> &[Payout] {
        match &self.disbursement {
            Disbursement::Winners { payouts, .. } => payouts,
            Disbursement::NoWinnerToPay { refunds, .. } => refunds,
        }
    }

    pub fn house_revenue(&self) -> Decimal {
        match &self.disbursement {
            Disbursement::Winners { house_revenue, .. }
            | Disbursement::NoWinnerToPay { house_revenue, .. } => *house_revenue,
        }
    }

    pub fn has_winner(&self) -> bool {
        matches!(self.disbursement, Disbursement::Winners { .. })
    }
}

/// Complete a match with the declared result and compute its final settlement.
///
/// The match must be `Active` or `InPlay`, `winning_outcome` must agree with
/// `final_score`, and the stake must pass `validate_stake` under `rules`. On
/// success the match is `Completed` and carries the result; on error it is
/// left untouched.
pub fn resolve_match(
    m: &mut Match,
    winning_outcome: Outcome,
    final_score: Score,
    rules: &PoolRules,
) -> Result<Resolution, SettlementError> {
    if !m.status.is_resolvable() {
        return Err(SettlementError::NotResolvable { status: m.status });
    }
    if final_score.outcome() != winning_outcome {
        return Err(SettlementError::Validation {
            field: "winning_outcome".into(),
            message: format!(
                "score {final_score} implies {}, not {winning_outcome}",
                final_score.outcome()
            ),
        });
    }

    validate_stake(m.stake_amount, rules)?;

    let settlement = compute_pool_totals_with(&m.bets, m.stake_amount, rules)?;
    let disbursement = disburse(&m.bets, winning_outcome, &settlement, rules)?;

    m.status = MatchStatus::Completed;
    m.winning_outcome = Some(winning_outcome);
    m.final_score = Some(final_score);

    Ok(Resolution {
        match_id: m.id,
        winning_outcome,
        final_score,
        settlement,
        disbursement,
    })
}

fn disburse(
    bets: &[BetRecord],
    winning_outcome: Outcome,
    settlement: &SettlementResult,
    rules: &PoolRules,
) -> Result<Disbursement, SettlementError> {
    let winners: Vec<&BetRecord> = bets
        .iter()
        .filter(|b| b.outcome == winning_outcome)
        .collect();

    if winners.is_empty() {
        return Ok(match rules.unclaimed {
            UnclaimedPolicy::House => Disbursement::NoWinnerToPay {
                unclaimed: settlement.distributable_pool,
                policy: UnclaimedPolicy::House,
                refunds: Vec::new(),
                house_revenue: settlement.total_pool,
            },
            UnclaimedPolicy::Refund => Disbursement::NoWinnerToPay {
                unclaimed: settlement.distributable_pool,
                policy: UnclaimedPolicy::Refund,
                refunds: bets
                    .iter()
                    .map(|b| Payout {
                        bettor_id: b.bettor_id,
                        outcome: b.outcome,
                        amount: settlement.stake_amount,
                    })
                    .collect(),
                house_revenue: Decimal::ZERO,
            },
        });
    }

    // Exact unless several winners split a share finer than the currency.
    let mut payouts = Vec::with_capacity(winners.len());
    let mut paid = Decimal::ZERO;
    for bet in winners {
        let amount = payout_for_stake(winning_outcome, settlement.stake_amount, settlement)?
            .round_dp_with_strategy(rules.currency_scale, RoundingStrategy::ToZero);
        paid += amount;
        payouts.push(Payout {
            bettor_id: bet.bettor_id,
            outcome: bet.outcome,
            amount,
        });
    }

    Ok(Disbursement::Winners {
        payouts,
        house_revenue: settlement.total_pool - paid,
    })
}
