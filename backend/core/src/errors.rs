//! Application-wide error types.
//!
//! Every validation failure the core can produce is a distinct variant so the
//! embedding layer can render an appropriate message without parsing
//! free-text. Persistence failures roll the enclosing transaction back in
//! full before surfacing here.

use thiserror::Error;

use crate::models::ProposalStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} '{name}' not found")]
    NotFound { entity: &'static str, name: String },

    #[error("Insufficient points: balance {balance:.2}, bid {bid_points}")]
    InsufficientFunds { balance: f64, bid_points: i64 },

    #[error("Bid below minimum: at least {minimum:.2} points required, got {bid_points}")]
    BelowMinimumBid { minimum: f64, bid_points: i64 },

    #[error("Bid points must be positive")]
    InvalidBidPoints,

    #[error("Invalid hunt window: {0}")]
    InvalidWindow(String),

    #[error("Claim duration outside allowed bounds [{min_secs}s, {max_secs}s]")]
    InvalidClaimTime { min_secs: i64, max_secs: i64 },

    #[error("A bid for this character, spawn, and window start already exists")]
    DuplicateBid,

    #[error("Proposal already resolved: {0:?}")]
    NotPending(ProposalStatus),

    #[error("User has already sponsored this proposal")]
    AlreadySponsored,

    #[error("User has already voted on this proposal")]
    AlreadyVoted,

    #[error("Policy conflict: {0}")]
    PolicyConflict(String),

    #[error("Upstream identity service unavailable: {0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// True when the underlying database error is a UNIQUE constraint hit.
    /// Used to translate raw conflicts into their domain-level variants.
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            CoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
