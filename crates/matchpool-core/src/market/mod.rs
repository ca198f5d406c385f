// Matches, bets, wallets, and the book that admits changes to them.

pub mod book;
pub mod outcome;
pub mod state;
