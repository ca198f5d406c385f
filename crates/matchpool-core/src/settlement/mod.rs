// Pool settlement engine: pool totals, house commission, winner payouts.
//
// Everything here is a pure computation over bet records and a stake amount.
// Nothing touches I/O or shared state, so the functions may be called from any
// number of tasks at once.

pub mod payout;
pub mod pool;
pub mod resolve;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market::outcome::Outcome;
use crate::market::state::MatchStatus;

pub use payout::{compute_payout, payout_for_stake};
pub use pool::{compute_pool_totals, compute_pool_totals_with, validate_stake, SettlementResult};
pub use resolve::{resolve_match, Disbursement, Payout, Resolution};

/// Fraction of every pool retained by the house.
pub const HOUSE_COMMISSION_RATE: Decimal = dec!(0.10);

/// Decimal places of the platform currency (ETB cents).
pub const DEFAULT_CURRENCY_SCALE: u32 = 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("pool invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("no bettor chose {outcome}; there is no winner to pay")]
    NoWinnerToPay { outcome: Outcome },

    #[error("match in status `{status}` cannot be resolved")]
    NotResolvable { status: MatchStatus },

    #[error("arithmetic overflow while computing {what}")]
    Overflow { what: &'static str },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// How many bettors may hold the same outcome on one match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Each outcome is a single slot: at most three bettors per match.
    #[default]
    SingleSlot,
    /// Any number of bettors per outcome; winners split proportionally.
    OpenPool,
}

/// What happens to the distributable pool when nobody chose the winning outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclaimedPolicy {
    /// The house keeps the whole pool.
    #[default]
    House,
    /// The match is voided and every bettor gets their stake back.
    Refund,
}

/// Parameters of the settlement computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolRules {
    pub commission_rate: Decimal,
    pub slot_policy: SlotPolicy,
    /// Payouts are rounded toward zero to this many decimal places.
    pub currency_scale: u32,
    pub unclaimed: UnclaimedPolicy,
}

impl Default for PoolRules {
    fn default() -> Self {
        PoolRules {
            commission_rate: HOUSE_COMMISSION_RATE,
            slot_policy: SlotPolicy::SingleSlot,
            currency_scale: DEFAULT_CURRENCY_SCALE,
            unclaimed: UnclaimedPolicy::House,
        }
    }
}
