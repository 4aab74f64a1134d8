//! # Models
//!
//! Entity structs mapped 1:1 onto the migration schema, plus the status
//! enums that drive the two governance state machines.
//!
//! ## Design decisions
//!
//! ### Durations as whole seconds
//!
//! Every policy duration (`locking_period`, `claim_time_min/max`,
//! `inactive_threshold`, `deprioritize_time`) is persisted as an integer
//! `*_secs` column and exposed through a [`chrono::Duration`] accessor.
//! Arithmetic against `DateTime<Utc>` values then stays in one type.
//!
//! ### Status as a Finite-State Machine
//!
//! [`ProposalStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Pending ──► Approved
//!     └─────► Rejected
//!     └─────► Expired
//! ```
//!
//! Terminal states are never re-opened; status-guarded UPDATEs in
//! [`crate::governance`] make the transition race-free.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status shared by [`SpawnProposal`] and [`SpawnChangeProposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Direction of a vote on a [`SpawnChangeProposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    Upvote,
    Downvote,
}

/// A top-level namespace of spawns with its own governance policy knobs.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct World {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub inactive_threshold_secs: i64,
    pub engagement_threshold: f64,
    pub favourability_approval: f64,
    pub favourability_rejection: f64,
    pub sponsorship_flat: i64,
    pub sponsorship_fraction: f64,
}

impl World {
    /// Recency window beyond which a user counts as inactive.
    pub fn inactive_threshold(&self) -> Duration {
        Duration::seconds(self.inactive_threshold_secs)
    }
}

/// An account that owns characters and participates in governance.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// An in-game character, verified against the identity collaborator.
/// `user_id` is NULL once a character has been disowned.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub vocation: String,
    pub user_id: Option<i64>,
    pub world_id: i64,
    pub last_login: Option<DateTime<Utc>>,
}

/// A schedulable hunting location with claim-duration and locking policy.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Spawn {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
    pub deprioritize_time_secs: Option<i64>,
    pub world_id: i64,
    /// Back-reference to the creation proposal, when community-created.
    pub proposal_id: Option<i64>,
}

impl Spawn {
    pub fn locking_period(&self) -> Duration {
        Duration::seconds(self.locking_period_secs)
    }

    pub fn deprioritize_time(&self) -> Option<Duration> {
        self.deprioritize_time_secs.map(Duration::seconds)
    }
}

/// Per-(character, spawn) spendable balance. One row per pair, created
/// lazily at the starting grant, debited on every accepted bid.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Points {
    pub id: i64,
    pub character_id: i64,
    pub spawn_id: i64,
    pub points: f64,
}

/// A reservation request for a future hunt window, backed by a point stake.
/// Immutable after creation except for the scheduler-owned `scheduled_start`
/// and `is_locked`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Bid {
    pub id: i64,
    pub character_id: i64,
    pub spawn_id: i64,
    pub bid_points: i64,
    pub hunt_window_start: DateTime<Utc>,
    pub hunt_window_end: DateTime<Utc>,
    pub claim_time_secs: i64,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn claim_time(&self) -> Duration {
        Duration::seconds(self.claim_time_secs)
    }
}

/// The realized claim produced from a winning bid.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Hunt {
    pub id: i64,
    pub character_id: i64,
    pub spawn_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub points_paid: i64,
    pub bid_id: Option<i64>,
}

/// A community request to create a new spawn, gated by sponsorship.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpawnProposal {
    pub id: i64,
    pub world_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
    pub deprioritize_time_secs: Option<i64>,
    pub proposed_by: Option<i64>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// A community request to alter an existing spawn's rules, gated by voting.
/// `start_time`/`end_time` are either both NULL (permanent change) or both
/// set with `end_time > start_time` (temporary, time-boxed change).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpawnChangeProposal {
    pub id: i64,
    pub spawn_id: Option<i64>,
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl SpawnChangeProposal {
    /// True when the change is time-boxed rather than permanent.
    pub fn is_temporary(&self) -> bool {
        self.start_time.is_some()
    }
}

/// First-class sponsorship row; `(proposal_id, user_id)` is unique.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sponsor {
    pub id: i64,
    pub proposal_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// First-class vote row; `(proposal_id, user_id)` is unique.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Vote {
    pub id: i64,
    pub proposal_id: i64,
    pub user_id: i64,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

/// The claim rules in force for a spawn at a given instant: either the
/// spawn's own columns or a currently-effective approved temporary change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClaimPolicy {
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
}

impl ClaimPolicy {
    pub fn locking_period(&self) -> Duration {
        Duration::seconds(self.locking_period_secs)
    }
}
