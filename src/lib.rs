//! # ascend
//!
//! Gamified task completion: categorized tasks, scored completions, and a
//! per-entity points ledger with bounded history.
//!
//! The [`engine`] scores completions and resets daily tasks. It works against
//! the [`store`] traits, implemented in memory and on Postgres ([`db`]).
//! Free-text task references are resolved by a [`matcher`].

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod store;
pub mod telemetry;
