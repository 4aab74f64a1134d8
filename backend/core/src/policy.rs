//! # Policy
//!
//! Pure numeric policy functions, implemented once and consumed by the
//! auction, scheduler, and governance modules. Each takes explicit scalar
//! snapshots (counts, balances) so it is testable without a live store,
//! and so the scalar path and any aggregate query can never drift apart.

use chrono::{DateTime, Utc};

/// Grant issued when a (character, spawn) points row is first created.
pub const STARTING_POINTS: f64 = 1000.0;

/// A bid must commit at least this fraction of the bidder's current balance
/// for the spawn. Keeps the auction meaningful as balances shrink.
pub const MIN_BID_FRACTION: f64 = 0.25;

/// A change proposal is only evaluated once this many votes are in.
pub const MIN_VOTES_FOR_EVALUATION: i64 = 5;

/// Smallest acceptable bid for a given pre-debit balance.
pub fn minimum_bid(balance: f64) -> f64 {
    balance * MIN_BID_FRACTION
}

/// Sponsors required to approve a spawn proposal:
/// `min(flat, round(active_users × fraction))`.
pub fn required_sponsors(flat: i64, fraction: f64, active_users: i64) -> i64 {
    let scaled = (active_users as f64 * fraction).round() as i64;
    flat.min(scaled)
}

/// Outcome of evaluating a change proposal's vote tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteVerdict {
    /// Below the evaluation floor; tally keeps accumulating.
    Pending,
    Approved,
    Rejected,
}

/// Evaluate a vote tally against a world's approval threshold.
///
/// Below [`MIN_VOTES_FOR_EVALUATION`] total votes the proposal stays pending
/// regardless of per-vote favourability.
pub fn evaluate_votes(votes_for: i64, total_votes: i64, approval_threshold: f64) -> VoteVerdict {
    if total_votes < MIN_VOTES_FOR_EVALUATION {
        return VoteVerdict::Pending;
    }
    let favourability = votes_for as f64 / total_votes as f64;
    if favourability >= approval_threshold {
        VoteVerdict::Approved
    } else {
        VoteVerdict::Rejected
    }
}

/// Read-model favourability percentage: `floor(for / max(total, 1) × 100)`.
pub fn favourability_pct(votes_for: i64, total_votes: i64) -> i64 {
    (votes_for as f64 / total_votes.max(1) as f64 * 100.0).floor() as i64
}

/// Read-model engagement: `floor(total / max(active_users_on_spawn, 1))`.
pub fn engagement(total_votes: i64, active_users_on_spawn: i64) -> i64 {
    total_votes / active_users_on_spawn.max(1)
}

/// Half-open interval overlap test for hunt windows and change windows.
pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}
