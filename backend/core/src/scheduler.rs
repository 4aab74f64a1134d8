//! # Hunt Scheduler
//!
//! Turns surviving bids into authoritative hunts once their locking period
//! has elapsed.
//!
//! A bid is a *candidate* for locking when all of the following hold:
//!
//! - it is not locked yet,
//! - its locking period (from the spawn's effective policy) has elapsed
//!   since submission,
//! - its hunt window has not already closed,
//! - its window does not overlap an existing hunt on the spawn (such bids
//!   were superseded by an earlier winner and never lock).
//!
//! Candidates are clustered by transitive window overlap and exactly one
//! winner per cluster is locked.
//!
//! ## Winner policy
//!
//! Within a cluster, bids are ranked:
//!
//! 1. non-deprioritized before deprioritized — a bidder whose previous hunt
//!    on this spawn ended within the spawn's `deprioritize_time` of the
//!    bid's window start ranks last,
//! 2. highest `bid_points`,
//! 3. earliest submission (`created_at`),
//! 4. lowest bid id (total order for identical timestamps).
//!
//! The winner's `scheduled_start` is its window start and `is_locked` flips
//! under a guard (`WHERE is_locked = 0`), so concurrent ticks cannot lock
//! the same bid twice; the hunt runs for the bid's claim duration.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::governance;
use crate::models::{Bid, Hunt, Spawn};
use crate::policy;
use crate::registry;

/// Run one scheduling pass over every spawn. Returns the hunts produced.
pub async fn tick(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Hunt>> {
    let spawn_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM spawns ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut hunts = Vec::new();
    for spawn_id in spawn_ids {
        hunts.extend(on_bid_locking_elapsed(pool, spawn_id, now).await?);
    }
    Ok(hunts)
}

/// Run one scheduling pass for a single spawn. Returns the hunts produced
/// (zero or more: disjoint windows can each lock a winner in the same pass).
pub async fn on_bid_locking_elapsed(
    pool: &SqlitePool,
    spawn_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Hunt>> {
    let mut tx = pool.begin().await?;

    let spawn = registry::get_spawn_by_id(&mut tx, spawn_id).await?;
    let rules = governance::effective_policy(&mut tx, &spawn, now).await?;
    let mature_before = now - rules.locking_period();

    // Unlocked bids whose locking period has elapsed and whose window is
    // still open.
    let candidates = sqlx::query_as::<_, Bid>(
        r#"
        SELECT * FROM bids
        WHERE spawn_id = ?1
          AND is_locked = 0
          AND created_at <= ?2
          AND hunt_window_end > ?3
        ORDER BY hunt_window_start ASC, id ASC
        "#,
    )
    .bind(spawn_id)
    .bind(mature_before)
    .bind(now)
    .fetch_all(&mut *tx)
    .await?;

    let existing_hunts = sqlx::query_as::<_, Hunt>(
        "SELECT * FROM hunts WHERE spawn_id = ?1",
    )
    .bind(spawn_id)
    .fetch_all(&mut *tx)
    .await?;

    // Superseded bids: their window already belongs to a realized hunt.
    let candidates: Vec<Bid> = candidates
        .into_iter()
        .filter(|bid| {
            !existing_hunts.iter().any(|hunt| {
                policy::windows_overlap(
                    bid.hunt_window_start,
                    bid.hunt_window_end,
                    hunt.start_time,
                    hunt.end_time,
                )
            })
        })
        .collect();

    let mut produced = Vec::new();
    for cluster in cluster_by_overlap(candidates) {
        let winner = match select_winner(&mut tx, &spawn, cluster).await? {
            Some(bid) => bid,
            None => continue,
        };

        let locked = sqlx::query(
            "UPDATE bids SET is_locked = 1, scheduled_start = hunt_window_start WHERE id = ?1 AND is_locked = 0",
        )
        .bind(winner.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if locked == 0 {
            // Another pass got here first.
            continue;
        }

        let start = winner.hunt_window_start;
        let end = start + winner.claim_time();
        let hunt_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO hunts (character_id, spawn_id, start_time, end_time, points_paid, bid_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(winner.character_id)
        .bind(spawn_id)
        .bind(start)
        .bind(end)
        .bind(winner.bid_points)
        .bind(winner.id)
        .fetch_one(&mut *tx)
        .await?;

        let hunt = sqlx::query_as::<_, Hunt>("SELECT * FROM hunts WHERE id = ?1")
            .bind(hunt_id)
            .fetch_one(&mut *tx)
            .await?;

        info!(
            "Locked bid {} on spawn {spawn_id}: hunt {hunt_id} scheduled {start} – {end}",
            winner.id
        );
        produced.push(hunt);
    }

    tx.commit().await?;
    Ok(produced)
}

/// Group bids into clusters of transitively overlapping windows. Input must
/// be sorted by window start; each cluster keeps that order.
fn cluster_by_overlap(bids: Vec<Bid>) -> Vec<Vec<Bid>> {
    let mut clusters: Vec<(DateTime<Utc>, Vec<Bid>)> = Vec::new();

    for bid in bids {
        if let Some((end, cluster)) = clusters.last_mut() {
            if bid.hunt_window_start < *end {
                *end = (*end).max(bid.hunt_window_end);
                cluster.push(bid);
                continue;
            }
        }
        clusters.push((bid.hunt_window_end, vec![bid]));
    }

    clusters.into_iter().map(|(_, cluster)| cluster).collect()
}

/// Pick the cluster winner under the documented ranking.
async fn select_winner(
    conn: &mut SqliteConnection,
    spawn: &Spawn,
    cluster: Vec<Bid>,
) -> Result<Option<Bid>> {
    let mut ranked = Vec::with_capacity(cluster.len());
    for bid in cluster {
        let deprioritized = is_deprioritized(conn, spawn, &bid).await?;
        ranked.push((deprioritized, bid));
    }

    ranked.sort_by(|(a_dep, a), (b_dep, b)| {
        a_dep
            .cmp(b_dep)
            .then(b.bid_points.cmp(&a.bid_points))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    Ok(ranked.into_iter().next().map(|(_, bid)| bid))
}

/// A bidder is deprioritized when the spawn carries a `deprioritize_time`
/// and one of their hunts on this spawn ended within that duration before
/// the bid's window start.
async fn is_deprioritized(
    conn: &mut SqliteConnection,
    spawn: &Spawn,
    bid: &Bid,
) -> Result<bool> {
    let window: Duration = match spawn.deprioritize_time() {
        Some(d) => d,
        None => return Ok(false),
    };
    let cutoff = bid.hunt_window_start - window;

    let recent: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM hunts
        WHERE spawn_id = ?1
          AND character_id = ?2
          AND end_time >= ?3
          AND end_time <= ?4
        "#,
    )
    .bind(spawn.id)
    .bind(bid.character_id)
    .bind(cutoff)
    .bind(bid.hunt_window_start)
    .fetch_one(conn)
    .await?;

    Ok(recent > 0)
}
