// Match outcomes, final scores, and the fixed three-slot outcome map.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::settlement::SettlementError;

/// One of the three exhaustive, mutually exclusive results of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    /// All outcomes in canonical display order.
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    /// Parse an outcome string. Accepts any casing of `home`, `draw`, `away`.
    pub fn from_str_outcome(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Some(Outcome::Home),
            "draw" => Some(Outcome::Draw),
            "away" => Some(Outcome::Away),
            _ => None,
        }
    }

    /// Return the wire/display string for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Home => "home",
            Outcome::Draw => "draw",
            Outcome::Away => "away",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outcome::from_str_outcome(s).ok_or_else(|| SettlementError::Validation {
            field: "outcome".into(),
            message: format!("expected one of home, draw, away; got `{s}`"),
        })
    }
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// A final score as declared by the admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn new(home: u32, away: u32) -> Self {
        Score { home, away }
    }

    /// The outcome implied by this score.
    pub fn outcome(&self) -> Outcome {
        match self.home.cmp(&self.away) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Less => Outcome::Away,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

// ---------------------------------------------------------------------------
// OutcomeMap
// ---------------------------------------------------------------------------

/// A value for each of the three outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMap<T> {
    pub home: T,
    pub draw: T,
    pub away: T,
}

impl<T> OutcomeMap<T> {
    /// Build a map by evaluating `f` for each outcome.
    pub fn from_fn(mut f: impl FnMut(Outcome) -> T) -> Self {
        OutcomeMap {
            home: f(Outcome::Home),
            draw: f(Outcome::Draw),
            away: f(Outcome::Away),
        }
    }

    /// Iterate `(outcome, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Outcome, &T)> {
        [
            (Outcome::Home, &self.home),
            (Outcome::Draw, &self.draw),
            (Outcome::Away, &self.away),
        ]
        .into_iter()
    }
}

impl OutcomeMap<Decimal> {
    pub fn sum(&self) -> Decimal {
        self.home + self.draw + self.away
    }
}

impl OutcomeMap<u32> {
    pub fn sum(&self) -> u32 {
        self.home + self.draw + self.away
    }
}

impl<T> Index<Outcome> for OutcomeMap<T> {
    type Output = T;

    fn index(&self, outcome: Outcome) -> &T {
        match outcome {
            Outcome::Home => &self.home,
            Outcome::Draw => &self.draw,
            Outcome::Away => &self.away,
        }
    }
}

impl<T> IndexMut<Outcome> for OutcomeMap<T> {
    fn index_mut(&mut self, outcome: Outcome) -> &mut T {
        match outcome {
            Outcome::Home => &mut self.home,
            Outcome::Draw => &mut self.draw,
            Outcome::Away => &mut self.away,
        }
    }
}
