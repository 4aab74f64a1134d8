//! # Bid/Auction Engine
//!
//! Validates and records bids against a spawn's claim-duration policy and
//! the bidder's point balance for that spawn.
//!
//! The validation pipeline fails fast, each step with its own error kind:
//!
//! 1. positive bid points
//! 2. window ordering (`start < end`)
//! 3. window strictly in the future
//! 4. claim duration within the effective policy bounds (spawn columns, or
//!    a currently-active approved temporary change)
//! 5. lazy balance creation
//! 6. sufficient funds
//! 7. minimum-bid floor (at least a quarter of the pre-debit balance)
//! 8. debit
//! 9. bid insert (duplicate `(character, spawn, window_start)` rejected)
//!
//! Steps 5–9 share one transaction: a duplicate-bid conflict at step 9 rolls
//! the debit back, and two concurrent bids cannot both read the same balance
//! and both pass the funds checks.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{CoreError, Result};
use crate::governance;
use crate::ledger;
use crate::models::Bid;
use crate::policy;
use crate::registry;

/// Place a bid for a future hunt window on a spawn.
#[allow(clippy::too_many_arguments)]
pub async fn place_bid(
    pool: &SqlitePool,
    character_id: i64,
    spawn_id: i64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    claim_duration: Duration,
    bid_points: i64,
    now: DateTime<Utc>,
) -> Result<Bid> {
    if bid_points <= 0 {
        return Err(CoreError::InvalidBidPoints);
    }
    if window_start >= window_end {
        return Err(CoreError::InvalidWindow(
            "hunt window end must be after start".to_string(),
        ));
    }
    if window_start <= now {
        return Err(CoreError::InvalidWindow(
            "hunt window must start in the future".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let spawn = registry::get_spawn_by_id(&mut tx, spawn_id).await?;
    let rules = governance::effective_policy(&mut tx, &spawn, now).await?;

    let claim_secs = claim_duration.num_seconds();
    if claim_secs < rules.claim_time_min_secs || claim_secs > rules.claim_time_max_secs {
        return Err(CoreError::InvalidClaimTime {
            min_secs: rules.claim_time_min_secs,
            max_secs: rules.claim_time_max_secs,
        });
    }

    let balance = ledger::get_or_create_balance(&mut tx, character_id, spawn_id)
        .await?
        .points;

    if bid_points as f64 > balance {
        return Err(CoreError::InsufficientFunds {
            balance,
            bid_points,
        });
    }

    // Minimum-bid floor is evaluated against the balance *before* this bid's
    // deduction.
    let minimum = policy::minimum_bid(balance);
    if (bid_points as f64) < minimum {
        return Err(CoreError::BelowMinimumBid {
            minimum,
            bid_points,
        });
    }

    ledger::debit(&mut tx, character_id, spawn_id, bid_points as f64).await?;

    let bid_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO bids
            (character_id, spawn_id, bid_points, hunt_window_start,
             hunt_window_end, claim_time_secs, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(character_id)
    .bind(spawn_id)
    .bind(bid_points)
    .bind(window_start)
    .bind(window_end)
    .bind(claim_secs)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        let err = CoreError::from(e);
        if err.is_unique_violation() {
            CoreError::DuplicateBid
        } else {
            err
        }
    })?;

    let bid = sqlx::query_as::<_, Bid>("SELECT * FROM bids WHERE id = ?1")
        .bind(bid_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(
        "Character {character_id} bid {bid_points} points on spawn {spawn_id} for window starting {window_start}"
    );
    Ok(bid)
}
