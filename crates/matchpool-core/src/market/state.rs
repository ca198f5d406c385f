// Match, bet, account and transaction entities.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::outcome::{Outcome, Score};
use crate::settlement::PoolRules;

pub type MatchId = u64;
pub type UserId = u64;
pub type TransactionId = u64;

/// Lifecycle status of a match. Progression is monotone:
/// `Template -> Active -> InPlay -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Template,
    Active,
    InPlay,
    Completed,
}

impl MatchStatus {
    /// Position in the lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            MatchStatus::Template => 0,
            MatchStatus::Active => 1,
            MatchStatus::InPlay => 2,
            MatchStatus::Completed => 3,
        }
    }

    /// Whether an admin status update may move a match from `self` to `next`.
    ///
    /// Only opening a template for betting and starting play are status
    /// updates; completion happens through result declaration.
    pub fn can_advance_to(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (MatchStatus::Template, MatchStatus::Active) | (MatchStatus::Active, MatchStatus::InPlay)
        )
    }

    /// Whether a result may be declared for a match in this status.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, MatchStatus::Active | MatchStatus::InPlay)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Template => "template",
            MatchStatus::Active => "active",
            MatchStatus::InPlay => "inplay",
            MatchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bet placed against a match. Every bet on a match carries the
/// match's stake amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRecord {
    pub bettor_id: UserId,
    pub outcome: Outcome,
    pub placed_at: DateTime<Utc>,
}

/// A sporting event offered for betting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub home_team: String,
    pub away_team: String,
    /// Fixed per-bettor stake.
    pub stake_amount: Decimal,
    /// Settlement rules fixed when the match was created.
    pub rules: PoolRules,
    pub status: MatchStatus,
    #[serde(default)]
    pub kickoff: Option<DateTime<Utc>>,
    /// Template this game was derived from, for user-created games.
    #[serde(default)]
    pub template_id: Option<MatchId>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Present only once the match is completed.
    #[serde(default)]
    pub winning_outcome: Option<Outcome>,
    #[serde(default)]
    pub final_score: Option<Score>,
    /// Bets in placement order.
    #[serde(default)]
    pub bets: Vec<BetRecord>,
}

impl Match {
    /// The bet placed by `bettor_id`, if any.
    pub fn bet_of(&self, bettor_id: UserId) -> Option<&BetRecord> {
        self.bets.iter().find(|b| b.bettor_id == bettor_id)
    }

    /// Whether any bet already occupies `outcome`.
    pub fn is_outcome_taken(&self, outcome: Outcome) -> bool {
        self.bets.iter().any(|b| b.outcome == outcome)
    }

    /// Outcomes that no bet occupies yet.
    pub fn open_outcomes(&self) -> Vec<Outcome> {
        Outcome::ALL
            .into_iter()
            .filter(|o| !self.is_outcome_taken(*o))
            .collect()
    }

    pub fn label(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

/// A bettor's wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    /// May create templates, move matches through their lifecycle, declare
    /// results and delete matches.
    #[serde(default)]
    pub is_admin: bool,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// Why money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionReason {
    /// Opening balance granted at registration.
    Opening,
    Stake,
    Refund,
    Payout,
}

/// One entry in a user's transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(default)]
    pub match_id: Option<MatchId>,
    /// Always non-negative; direction is given by `kind`.
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub reason: TransactionReason,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed effect of this entry on the user's balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TransactionKind::Credit => self.amount,
            TransactionKind::Debit => -self.amount,
        }
    }
}
