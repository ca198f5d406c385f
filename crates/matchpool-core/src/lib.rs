// Library root: domain model, pool settlement engine, match book,
// configuration, and persistence for the matchpool betting backend.

pub mod config;
pub mod db;
pub mod market;
pub mod settlement;
