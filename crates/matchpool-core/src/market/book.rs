// The match book: admission control, match lifecycle, and wallet ledger.
//
// Every change is expressed as a `BookEvent`. `validate` checks an event
// against the current state without touching it, `apply` validates and then
// commits it, and `restore_from_events` replays a journal of previously
// admitted events. The caller owns the book exclusively, so admissions and
// status transitions for a match are serialized by construction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::outcome::{Outcome, Score};
use super::state::{
    Account, BetRecord, Match, MatchId, MatchStatus, Transaction, TransactionId, TransactionKind,
    TransactionReason, UserId,
};
use crate::settlement::{
    compute_pool_totals_with, resolve_match, validate_stake, Disbursement, PoolRules, Resolution,
    SettlementError, SettlementResult, SlotPolicy,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookError {
    #[error("match {match_id} not found")]
    UnknownMatch { match_id: MatchId },

    #[error("user {user_id} not found")]
    UnknownUser { user_id: UserId },

    #[error("match {match_id} is not a template")]
    NotATemplate { match_id: MatchId },

    #[error("username `{username}` is already registered")]
    DuplicateUsername { username: String },

    #[error("id {id} is already in use")]
    DuplicateId { id: u64 },

    #[error("match {match_id} cannot move from {from} to {to}")]
    InvalidTransition {
        match_id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
    },

    #[error("match {match_id} is {actual}, not {expected}")]
    StaleStatus {
        match_id: MatchId,
        expected: MatchStatus,
        actual: MatchStatus,
    },

    #[error("match {match_id} is {status} and not accepting bets")]
    NotAcceptingBets { match_id: MatchId, status: MatchStatus },

    #[error("outcome {outcome} on match {match_id} is already taken")]
    SlotTaken { match_id: MatchId, outcome: Outcome },

    #[error("user {bettor_id} already has a bet on match {match_id}")]
    AlreadyBet { match_id: MatchId, bettor_id: UserId },

    #[error("user {bettor_id} has no bet on match {match_id}")]
    NoBet { match_id: MatchId, bettor_id: UserId },

    #[error("user {user_id} has balance {balance}, needs {required}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Decimal,
        required: Decimal,
    },

    #[error("match {match_id} is already completed")]
    AlreadyCompleted { match_id: MatchId },

    #[error("match {match_id} is settled and cannot be deleted")]
    MatchSettled { match_id: MatchId },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl BookError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            BookError::UnknownMatch { .. } => "unknown_match",
            BookError::UnknownUser { .. } => "unknown_user",
            BookError::NotATemplate { .. } => "not_a_template",
            BookError::DuplicateUsername { .. } => "duplicate_username",
            BookError::DuplicateId { .. } => "duplicate_id",
            BookError::InvalidTransition { .. } => "invalid_transition",
            BookError::StaleStatus { .. } => "stale_status",
            BookError::NotAcceptingBets { .. } => "not_accepting_bets",
            BookError::SlotTaken { .. } => "slot_taken",
            BookError::AlreadyBet { .. } => "already_bet",
            BookError::NoBet { .. } => "no_bet",
            BookError::InsufficientBalance { .. } => "insufficient_balance",
            BookError::AlreadyCompleted { .. } => "already_completed",
            BookError::MatchSettled { .. } => "match_settled",
            BookError::Validation { .. } => "validation_error",
            BookError::Settlement(SettlementError::Validation { .. }) => "validation_error",
            BookError::Settlement(SettlementError::InvariantViolation { .. }) => {
                "invariant_violation"
            }
            BookError::Settlement(SettlementError::NoWinnerToPay { .. }) => "no_winner_to_pay",
            BookError::Settlement(SettlementError::NotResolvable { .. }) => "not_resolvable",
            BookError::Settlement(SettlementError::Overflow { .. }) => "overflow",
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An admitted change to the book. Events carry their own ids and timestamps
/// so replaying a journal reproduces the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookEvent {
    UserRegistered {
        user_id: UserId,
        username: String,
        opening_balance: Decimal,
        #[serde(default)]
        is_admin: bool,
        at: DateTime<Utc>,
    },
    MatchCreated {
        match_id: MatchId,
        home_team: String,
        away_team: String,
        stake_amount: Decimal,
        /// Rules the match admits bets and settles under for its whole life.
        rules: PoolRules,
        /// `Template` for admin-created shells, `Active` for games derived
        /// from a template.
        status: MatchStatus,
        #[serde(default)]
        kickoff: Option<DateTime<Utc>>,
        #[serde(default)]
        template_id: Option<MatchId>,
        #[serde(default)]
        created_by: Option<UserId>,
        at: DateTime<Utc>,
    },
    StatusChanged {
        match_id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        at: DateTime<Utc>,
    },
    BetPlaced {
        match_id: MatchId,
        bettor_id: UserId,
        outcome: Outcome,
        at: DateTime<Utc>,
    },
    BetCancelled {
        match_id: MatchId,
        bettor_id: UserId,
        at: DateTime<Utc>,
    },
    ResultDeclared {
        match_id: MatchId,
        final_score: Score,
        at: DateTime<Utc>,
    },
    MatchDeleted {
        match_id: MatchId,
        at: DateTime<Utc>,
    },
}

impl BookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BookEvent::UserRegistered { .. } => "user_registered",
            BookEvent::MatchCreated { .. } => "match_created",
            BookEvent::StatusChanged { .. } => "status_changed",
            BookEvent::BetPlaced { .. } => "bet_placed",
            BookEvent::BetCancelled { .. } => "bet_cancelled",
            BookEvent::ResultDeclared { .. } => "result_declared",
            BookEvent::MatchDeleted { .. } => "match_deleted",
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            BookEvent::UserRegistered { at, .. }
            | BookEvent::MatchCreated { at, .. }
            | BookEvent::StatusChanged { at, .. }
            | BookEvent::BetPlaced { at, .. }
            | BookEvent::BetCancelled { at, .. }
            | BookEvent::ResultDeclared { at, .. }
            | BookEvent::MatchDeleted { at, .. } => *at,
        }
    }

    /// The match this event concerns, if any.
    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            BookEvent::UserRegistered { .. } => None,
            BookEvent::MatchCreated { match_id, .. }
            | BookEvent::StatusChanged { match_id, .. }
            | BookEvent::BetPlaced { match_id, .. }
            | BookEvent::BetCancelled { match_id, .. }
            | BookEvent::ResultDeclared { match_id, .. }
            | BookEvent::MatchDeleted { match_id, .. } => Some(*match_id),
        }
    }
}

/// The effect of a committed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    UserRegistered(Account),
    MatchCreated(Match),
    StatusChanged(Match),
    BetPlaced {
        bet: BetRecord,
        stake: Transaction,
    },
    BetCancelled {
        refund: Transaction,
    },
    Settled(Resolution),
    MatchDeleted {
        match_id: MatchId,
        refunds: Vec<Transaction>,
    },
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

/// Bounds on the stake an admin or user may set for a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeLimits {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for StakeLimits {
    fn default() -> Self {
        StakeLimits {
            min: Decimal::ONE,
            max: Decimal::from(100_000),
        }
    }
}

/// Authoritative state of all matches, bets, and wallets.
#[derive(Debug, Clone)]
pub struct Book {
    rules: PoolRules,
    limits: StakeLimits,
    matches: BTreeMap<MatchId, Match>,
    accounts: BTreeMap<UserId, Account>,
    transactions: Vec<Transaction>,
    resolutions: BTreeMap<MatchId, Resolution>,
    house_revenue: Decimal,
    next_match_id: MatchId,
    next_user_id: UserId,
    next_transaction_id: TransactionId,
}

impl Book {
    pub fn new(rules: PoolRules, limits: StakeLimits) -> Self {
        Book {
            rules,
            limits,
            matches: BTreeMap::new(),
            accounts: BTreeMap::new(),
            transactions: Vec::new(),
            resolutions: BTreeMap::new(),
            house_revenue: Decimal::ZERO,
            next_match_id: 1,
            next_user_id: 1,
            next_transaction_id: 1,
        }
    }

    /// Rules that newly created matches are given.
    pub fn rules(&self) -> &PoolRules {
        &self.rules
    }

    pub fn limits(&self) -> &StakeLimits {
        &self.limits
    }

    /// Id the next created match should use.
    pub fn next_match_id(&self) -> MatchId {
        self.next_match_id
    }

    /// Id the next registered user should use.
    pub fn next_user_id(&self) -> UserId {
        self.next_user_id
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn match_by_id(&self, match_id: MatchId) -> Option<&Match> {
        self.matches.get(&match_id)
    }

    /// All matches in id order, optionally restricted to one status.
    pub fn matches(&self, status: Option<MatchStatus>) -> Vec<&Match> {
        self.matches
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .collect()
    }

    pub fn templates(&self) -> Vec<&Match> {
        self.matches(Some(MatchStatus::Template))
    }

    /// Look up a template by id.
    pub fn template(&self, match_id: MatchId) -> Result<&Match, BookError> {
        let m = self.require_match(match_id)?;
        if m.status != MatchStatus::Template {
            return Err(BookError::NotATemplate { match_id });
        }
        Ok(m)
    }

    /// Matches the user created or holds a bet on.
    pub fn user_games(&self, user_id: UserId) -> Vec<&Match> {
        self.matches
            .values()
            .filter(|m| m.created_by == Some(user_id) || m.bet_of(user_id).is_some())
            .collect()
    }

    pub fn account(&self, user_id: UserId) -> Option<&Account> {
        self.accounts.get(&user_id)
    }

    pub fn account_by_username(&self, username: &str) -> Option<&Account> {
        self.accounts
            .values()
            .find(|a| a.username.eq_ignore_ascii_case(username.trim()))
    }

    /// A user's transaction history, newest first.
    pub fn transactions_for(&self, user_id: UserId) -> Vec<&Transaction> {
        let mut txs: Vec<&Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        txs
    }

    /// Current pool breakdown of a match.
    pub fn pool_summary(&self, match_id: MatchId) -> Result<SettlementResult, BookError> {
        if let Some(resolution) = self.resolutions.get(&match_id) {
            return Ok(resolution.settlement.clone());
        }
        let m = self.require_match(match_id)?;
        Ok(compute_pool_totals_with(&m.bets, m.stake_amount, &m.rules)?)
    }

    pub fn resolution(&self, match_id: MatchId) -> Option<&Resolution> {
        self.resolutions.get(&match_id)
    }

    /// Total retained by the house across all settled matches.
    pub fn house_revenue(&self) -> Decimal {
        self.house_revenue
    }

    /// Stakes currently held in unsettled matches.
    pub fn escrowed(&self) -> Decimal {
        self.matches
            .values()
            .filter(|m| m.status != MatchStatus::Completed)
            .map(|m| m.stake_amount * Decimal::from(m.bets.len() as u64))
            .sum()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check whether `event` would be admitted, without changing anything.
    pub fn validate(&self, event: &BookEvent) -> Result<(), BookError> {
        match event {
            BookEvent::UserRegistered {
                user_id,
                username,
                opening_balance,
                ..
            } => {
                if username.trim().is_empty() {
                    return Err(BookError::Validation {
                        field: "username".into(),
                        message: "must not be empty".into(),
                    });
                }
                if *opening_balance < Decimal::ZERO {
                    return Err(BookError::Validation {
                        field: "opening_balance".into(),
                        message: format!("must be >= 0, got {opening_balance}"),
                    });
                }
                if self.accounts.contains_key(user_id) {
                    return Err(BookError::DuplicateId { id: *user_id });
                }
                if self.account_by_username(username).is_some() {
                    return Err(BookError::DuplicateUsername {
                        username: username.trim().to_string(),
                    });
                }
                Ok(())
            }

            BookEvent::MatchCreated {
                match_id,
                home_team,
                away_team,
                stake_amount,
                rules,
                status,
                template_id,
                created_by,
                ..
            } => {
                if self.matches.contains_key(match_id) {
                    return Err(BookError::DuplicateId { id: *match_id });
                }
                if home_team.trim().is_empty() || away_team.trim().is_empty() {
                    return Err(BookError::Validation {
                        field: "teams".into(),
                        message: "team names must not be empty".into(),
                    });
                }
                if home_team.trim().eq_ignore_ascii_case(away_team.trim()) {
                    return Err(BookError::Validation {
                        field: "teams".into(),
                        message: format!("home and away are both `{home_team}`"),
                    });
                }
                self.check_stake(*stake_amount, rules)?;
                match (status, template_id) {
                    (MatchStatus::Template, None) => {}
                    (MatchStatus::Active, Some(template_id)) => {
                        self.template(*template_id)?;
                    }
                    (MatchStatus::Active, None) => {}
                    (other, _) => {
                        return Err(BookError::Validation {
                            field: "status".into(),
                            message: format!("matches cannot be created as {other}"),
                        });
                    }
                }
                if let Some(user_id) = created_by {
                    self.require_account(*user_id)?;
                }
                Ok(())
            }

            BookEvent::StatusChanged {
                match_id, from, to, ..
            } => {
                let m = self.require_match(*match_id)?;
                if m.status == MatchStatus::Completed {
                    return Err(BookError::AlreadyCompleted {
                        match_id: *match_id,
                    });
                }
                if m.status != *from {
                    return Err(BookError::StaleStatus {
                        match_id: *match_id,
                        expected: *from,
                        actual: m.status,
                    });
                }
                if !from.can_advance_to(*to) {
                    return Err(BookError::InvalidTransition {
                        match_id: *match_id,
                        from: *from,
                        to: *to,
                    });
                }
                Ok(())
            }

            BookEvent::BetPlaced {
                match_id,
                bettor_id,
                outcome,
                ..
            } => {
                let m = self.require_match(*match_id)?;
                if m.status != MatchStatus::Active {
                    return Err(BookError::NotAcceptingBets {
                        match_id: *match_id,
                        status: m.status,
                    });
                }
                let account = self.require_account(*bettor_id)?;
                if m.bet_of(*bettor_id).is_some() {
                    return Err(BookError::AlreadyBet {
                        match_id: *match_id,
                        bettor_id: *bettor_id,
                    });
                }
                if m.rules.slot_policy == SlotPolicy::SingleSlot && m.is_outcome_taken(*outcome) {
                    return Err(BookError::SlotTaken {
                        match_id: *match_id,
                        outcome: *outcome,
                    });
                }
                if account.balance < m.stake_amount {
                    return Err(BookError::InsufficientBalance {
                        user_id: *bettor_id,
                        balance: account.balance,
                        required: m.stake_amount,
                    });
                }
                Ok(())
            }

            BookEvent::BetCancelled {
                match_id,
                bettor_id,
                ..
            } => {
                let m = self.require_match(*match_id)?;
                if m.status != MatchStatus::Active {
                    return Err(BookError::NotAcceptingBets {
                        match_id: *match_id,
                        status: m.status,
                    });
                }
                if m.bet_of(*bettor_id).is_none() {
                    return Err(BookError::NoBet {
                        match_id: *match_id,
                        bettor_id: *bettor_id,
                    });
                }
                Ok(())
            }

            BookEvent::ResultDeclared { match_id, .. } => {
                let m = self.require_match(*match_id)?;
                if m.status == MatchStatus::Completed {
                    return Err(BookError::AlreadyCompleted {
                        match_id: *match_id,
                    });
                }
                if !m.status.is_resolvable() {
                    return Err(SettlementError::NotResolvable { status: m.status }.into());
                }
                // Dry run so an unsettleable pool is rejected before it is journaled.
                validate_stake(m.stake_amount, &m.rules)?;
                compute_pool_totals_with(&m.bets, m.stake_amount, &m.rules)?;
                Ok(())
            }

            BookEvent::MatchDeleted { match_id, .. } => {
                let m = self.require_match(*match_id)?;
                if m.status == MatchStatus::Completed {
                    return Err(BookError::MatchSettled {
                        match_id: *match_id,
                    });
                }
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Validate and commit `event`.
    pub fn apply(&mut self, event: &BookEvent) -> Result<Applied, BookError> {
        self.validate(event)?;
        let applied = self.commit(event)?;
        debug!("Applied {} event", event.kind());
        Ok(applied)
    }

    /// Rebuild the book by replaying a journal of admitted events.
    ///
    /// Events are committed without re-running admission checks: they were
    /// admitted under the configuration in force at the time.
    pub fn restore_from_events(&mut self, events: &[BookEvent]) -> Result<(), BookError> {
        let (rules, limits) = (self.rules, self.limits);
        *self = Book::new(rules, limits);
        for event in events {
            self.commit(event)?;
        }
        info!(
            "Replayed {} events: {} matches, {} accounts",
            events.len(),
            self.matches.len(),
            self.accounts.len()
        );
        Ok(())
    }

    fn commit(&mut self, event: &BookEvent) -> Result<Applied, BookError> {
        match event {
            BookEvent::UserRegistered {
                user_id,
                username,
                opening_balance,
                is_admin,
                at,
            } => {
                let account = Account {
                    id: *user_id,
                    username: username.trim().to_string(),
                    is_admin: *is_admin,
                    balance: *opening_balance,
                    created_at: *at,
                };
                self.accounts.insert(*user_id, account.clone());
                self.next_user_id = self.next_user_id.max(user_id + 1);
                if *opening_balance > Decimal::ZERO {
                    self.record_transaction(
                        *user_id,
                        None,
                        *opening_balance,
                        TransactionKind::Credit,
                        TransactionReason::Opening,
                        *at,
                    );
                }
                Ok(Applied::UserRegistered(account))
            }

            BookEvent::MatchCreated {
                match_id,
                home_team,
                away_team,
                stake_amount,
                rules,
                status,
                kickoff,
                template_id,
                created_by,
                at,
            } => {
                let m = Match {
                    id: *match_id,
                    home_team: home_team.trim().to_string(),
                    away_team: away_team.trim().to_string(),
                    stake_amount: *stake_amount,
                    rules: *rules,
                    status: *status,
                    kickoff: *kickoff,
                    template_id: *template_id,
                    created_by: *created_by,
                    created_at: *at,
                    winning_outcome: None,
                    final_score: None,
                    bets: Vec::new(),
                };
                self.matches.insert(*match_id, m.clone());
                self.next_match_id = self.next_match_id.max(match_id + 1);
                Ok(Applied::MatchCreated(m))
            }

            BookEvent::StatusChanged { match_id, to, .. } => {
                let m = self.require_match_mut(*match_id)?;
                m.status = *to;
                Ok(Applied::StatusChanged(m.clone()))
            }

            BookEvent::BetPlaced {
                match_id,
                bettor_id,
                outcome,
                at,
            } => {
                let m = self.require_match_mut(*match_id)?;
                let bet = BetRecord {
                    bettor_id: *bettor_id,
                    outcome: *outcome,
                    placed_at: *at,
                };
                m.bets.push(bet.clone());
                let stake = m.stake_amount;
                self.adjust_balance(*bettor_id, -stake)?;
                let tx = self.record_transaction(
                    *bettor_id,
                    Some(*match_id),
                    stake,
                    TransactionKind::Debit,
                    TransactionReason::Stake,
                    *at,
                );
                Ok(Applied::BetPlaced { bet, stake: tx })
            }

            BookEvent::BetCancelled {
                match_id,
                bettor_id,
                at,
            } => {
                let m = self.require_match_mut(*match_id)?;
                let before = m.bets.len();
                m.bets.retain(|b| b.bettor_id != *bettor_id);
                if m.bets.len() == before {
                    return Err(BookError::NoBet {
                        match_id: *match_id,
                        bettor_id: *bettor_id,
                    });
                }
                let stake = m.stake_amount;
                self.adjust_balance(*bettor_id, stake)?;
                let refund = self.record_transaction(
                    *bettor_id,
                    Some(*match_id),
                    stake,
                    TransactionKind::Credit,
                    TransactionReason::Refund,
                    *at,
                );
                Ok(Applied::BetCancelled { refund })
            }

            BookEvent::ResultDeclared {
                match_id,
                final_score,
                at,
            } => {
                let m = self.require_match_mut(*match_id)?;
                let rules = m.rules;
                let resolution = resolve_match(m, final_score.outcome(), *final_score, &rules)?;

                let reason = match &resolution.disbursement {
                    Disbursement::Winners { .. } => TransactionReason::Payout,
                    Disbursement::NoWinnerToPay { .. } => TransactionReason::Refund,
                };
                for credit in resolution.credits() {
                    if credit.amount.is_zero() {
                        continue;
                    }
                    self.adjust_balance(credit.bettor_id, credit.amount)?;
                    self.record_transaction(
                        credit.bettor_id,
                        Some(*match_id),
                        credit.amount,
                        TransactionKind::Credit,
                        reason,
                        *at,
                    );
                }
                self.house_revenue += resolution.house_revenue();
                self.resolutions.insert(*match_id, resolution.clone());
                Ok(Applied::Settled(resolution))
            }

            BookEvent::MatchDeleted { match_id, at } => {
                let m = self
                    .matches
                    .remove(match_id)
                    .ok_or(BookError::UnknownMatch {
                        match_id: *match_id,
                    })?;
                let mut refunds = Vec::with_capacity(m.bets.len());
                for bet in &m.bets {
                    self.adjust_balance(bet.bettor_id, m.stake_amount)?;
                    refunds.push(self.record_transaction(
                        bet.bettor_id,
                        Some(*match_id),
                        m.stake_amount,
                        TransactionKind::Credit,
                        TransactionReason::Refund,
                        *at,
                    ));
                }
                Ok(Applied::MatchDeleted {
                    match_id: *match_id,
                    refunds,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn check_stake(&self, stake_amount: Decimal, rules: &PoolRules) -> Result<(), BookError> {
        validate_stake(stake_amount, rules)?;
        if stake_amount < self.limits.min || stake_amount > self.limits.max {
            return Err(BookError::Validation {
                field: "stake_amount".into(),
                message: format!(
                    "must be between {} and {}, got {stake_amount}",
                    self.limits.min, self.limits.max
                ),
            });
        }
        Ok(())
    }

    fn require_match(&self, match_id: MatchId) -> Result<&Match, BookError> {
        self.matches
            .get(&match_id)
            .ok_or(BookError::UnknownMatch { match_id })
    }

    fn require_match_mut(&mut self, match_id: MatchId) -> Result<&mut Match, BookError> {
        self.matches
            .get_mut(&match_id)
            .ok_or(BookError::UnknownMatch { match_id })
    }

    fn require_account(&self, user_id: UserId) -> Result<&Account, BookError> {
        self.accounts
            .get(&user_id)
            .ok_or(BookError::UnknownUser { user_id })
    }

    fn adjust_balance(&mut self, user_id: UserId, delta: Decimal) -> Result<(), BookError> {
        let account = self
            .accounts
            .get_mut(&user_id)
            .ok_or(BookError::UnknownUser { user_id })?;
        account.balance += delta;
        Ok(())
    }

    fn record_transaction(
        &mut self,
        user_id: UserId,
        match_id: Option<MatchId>,
        amount: Decimal,
        kind: TransactionKind,
        reason: TransactionReason,
        at: DateTime<Utc>,
    ) -> Transaction {
        let tx = Transaction {
            id: self.next_transaction_id,
            user_id,
            match_id,
            amount,
            kind,
            reason,
            created_at: at,
        };
        self.next_transaction_id += 1;
        self.transactions.push(tx.clone());
        tx
    }
}
