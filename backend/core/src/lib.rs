//! # respawn-core
//!
//! Core engine for coordinating shared hunting spawns across a game
//! community: who may claim a spawn for a time window, how claim priority is
//! decided through a point-bidding auction, and how the community proposes
//! and governs changes to spawn definitions and rules.
//!
//! | Subsystem   | Module                     |
//! |-------------|----------------------------|
//! | Identity    | [`registry`]               |
//! | Points      | [`ledger`]                 |
//! | Auction     | [`auction`]                |
//! | Scheduling  | [`scheduler`]              |
//! | Governance  | [`governance`]             |
//! | Lookups     | [`identity`]               |
//!
//! ## Architecture
//!
//! The crate is the core an HTTP surface embeds: handlers call into the
//! engine modules, which consult [`registry`] for policy, [`ledger`] for
//! balances, and SQLite (via [`db`]) for durable state. Results flow back as
//! typed outcomes and [`errors::CoreError`] values — never rendered text.
//! Every mutating operation runs inside a single transaction, so concurrent
//! requests cannot interleave read-then-write sequences (balance check →
//! debit, dedup check → insert, threshold check → transition).

pub mod auction;
pub mod config;
pub mod db;
pub mod errors;
pub mod governance;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod registry;
pub mod scheduler;







#[cfg(test)]
mod test_governance;


pub use config::Config;
pub use errors::{CoreError, Result};
