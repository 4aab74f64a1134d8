//! # Governance Engine
//!
//! Two parallel proposal state machines, both `PENDING → {APPROVED |
//! REJECTED}` with a time-based `EXPIRED` sweep:
//!
//! | Proposal kind         | Gate        | Approval effect                  |
//! |-----------------------|-------------|----------------------------------|
//! | [`SpawnProposal`]     | sponsorship | creates the real spawn           |
//! | [`SpawnChangeProposal`] | voting    | rewrites (or time-boxes) rules   |
//!
//! Every mutation runs in a single transaction. Sponsor/vote deduplication
//! rides on the UNIQUE constraints; threshold-crossing transitions use
//! status-guarded UPDATEs so the first writer wins and the second observes
//! the already-resolved status.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::{CoreError, Result};
use crate::models::{ClaimPolicy, ProposalStatus, Spawn, SpawnChangeProposal, SpawnProposal, VoteType};
use crate::policy;
use crate::registry::{self, SpawnAttrs};

/// Result of a sponsorship attempt on a pending spawn proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SponsorOutcome {
    /// Still short of the sponsorship threshold.
    Pending { sponsors: i64, required: i64 },
    /// Threshold crossed: the proposal was approved and the spawn created.
    Approved { spawn_id: i64 },
}

/// Result of a vote on a pending change proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote recorded; tally below the evaluation floor or spawn not linked.
    Pending { votes_for: i64, votes_against: i64 },
    /// Tally evaluated and the change was applied.
    Approved { votes_for: i64, votes_against: i64 },
    /// Tally evaluated below the approval threshold.
    Rejected { votes_for: i64, votes_against: i64 },
}

/// Proposed rule values for a spawn change, optionally time-boxed.
#[derive(Debug, Clone)]
pub struct ChangeAttrs {
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────
// Spawn proposals (creation via sponsorship)
// ─────────────────────────────────────────────────────────

/// Open a new spawn-creation proposal in a world.
pub async fn create_proposal(
    pool: &SqlitePool,
    world_id: i64,
    attrs: &SpawnAttrs,
    proposed_by: Option<i64>,
    now: DateTime<Utc>,
) -> Result<SpawnProposal> {
    validate_claim_bounds(attrs.claim_time_min_secs, attrs.claim_time_max_secs)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO spawn_proposals
            (world_id, name, description, locking_period_secs, claim_time_min_secs,
             claim_time_max_secs, deprioritize_time_secs, proposed_by, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'PENDING', ?9)
        RETURNING id
        "#,
    )
    .bind(world_id)
    .bind(&attrs.name)
    .bind(&attrs.description)
    .bind(attrs.locking_period_secs)
    .bind(attrs.claim_time_min_secs)
    .bind(attrs.claim_time_max_secs)
    .bind(attrs.deprioritize_time_secs)
    .bind(proposed_by)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!("Opened spawn proposal '{}' (id {id}) in world {world_id}", attrs.name);
    get_proposal(pool, id).await
}

pub async fn get_proposal(pool: &SqlitePool, id: i64) -> Result<SpawnProposal> {
    sqlx::query_as::<_, SpawnProposal>("SELECT * FROM spawn_proposals WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "SpawnProposal",
            name: id.to_string(),
        })
}

/// Sponsor a pending spawn proposal.
///
/// Adds the user to the sponsor set (rejecting duplicates), recomputes the
/// sponsorship threshold from the world's current active-user count, and if
/// the threshold is met approves the proposal and creates the spawn — all in
/// one transaction.
pub async fn sponsor(
    pool: &SqlitePool,
    user_id: i64,
    proposal_id: i64,
    now: DateTime<Utc>,
) -> Result<SponsorOutcome> {
    let mut tx = pool.begin().await?;

    let proposal = sqlx::query_as::<_, SpawnProposal>(
        "SELECT * FROM spawn_proposals WHERE id = ?1",
    )
    .bind(proposal_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| CoreError::NotFound {
        entity: "SpawnProposal",
        name: proposal_id.to_string(),
    })?;

    if proposal.status != ProposalStatus::Pending {
        return Err(CoreError::NotPending(proposal.status));
    }

    sqlx::query(
        "INSERT INTO spawn_proposal_sponsors (proposal_id, user_id, created_at) VALUES (?1, ?2, ?3)",
    )
    .bind(proposal_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        let err = CoreError::from(e);
        if err.is_unique_violation() {
            CoreError::AlreadySponsored
        } else {
            err
        }
    })?;

    let sponsors: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM spawn_proposal_sponsors WHERE proposal_id = ?1")
            .bind(proposal_id)
            .fetch_one(&mut *tx)
            .await?;

    let world = registry::get_world_by_id(&mut tx, proposal.world_id).await?;
    let active_users = registry::active_user_count(&mut tx, &world, now).await?;
    let required = policy::required_sponsors(
        world.sponsorship_flat,
        world.sponsorship_fraction,
        active_users,
    );

    if sponsors < required {
        tx.commit().await?;
        return Ok(SponsorOutcome::Pending { sponsors, required });
    }

    // Threshold crossed: approve and materialize the spawn. The status guard
    // makes the transition first-writer-wins.
    let transitioned = sqlx::query(
        "UPDATE spawn_proposals SET status = 'APPROVED', approved_at = ?2 WHERE id = ?1 AND status = 'PENDING'",
    )
    .bind(proposal_id)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if transitioned == 0 {
        let current = sqlx::query_as::<_, SpawnProposal>(
            "SELECT * FROM spawn_proposals WHERE id = ?1",
        )
        .bind(proposal_id)
        .fetch_one(&mut *tx)
        .await?;
        return Err(CoreError::NotPending(current.status));
    }

    let spawn_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO spawns
            (name, description, locking_period_secs, claim_time_min_secs,
             claim_time_max_secs, deprioritize_time_secs, world_id, proposal_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING id
        "#,
    )
    .bind(&proposal.name)
    .bind(&proposal.description)
    .bind(proposal.locking_period_secs)
    .bind(proposal.claim_time_min_secs)
    .bind(proposal.claim_time_max_secs)
    .bind(proposal.deprioritize_time_secs)
    .bind(proposal.world_id)
    .bind(proposal_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        "Spawn proposal {proposal_id} approved with {sponsors} sponsors; created spawn {spawn_id}"
    );
    Ok(SponsorOutcome::Approved { spawn_id })
}

// ─────────────────────────────────────────────────────────
// Spawn change proposals (rule changes via voting)
// ─────────────────────────────────────────────────────────

/// Open a rule-change proposal against a spawn.
///
/// A temporary change (both `start_time` and `end_time` set) must not
/// overlap another pending or approved temporary change on the same spawn.
pub async fn create_change_proposal(
    pool: &SqlitePool,
    spawn_id: Option<i64>,
    attrs: &ChangeAttrs,
    now: DateTime<Utc>,
) -> Result<SpawnChangeProposal> {
    validate_claim_bounds(attrs.claim_time_min_secs, attrs.claim_time_max_secs)?;

    let window = match (attrs.start_time, attrs.end_time) {
        (None, None) => None,
        (Some(start), Some(end)) if end > start => Some((start, end)),
        (Some(_), Some(_)) => {
            return Err(CoreError::InvalidWindow(
                "change window end must be after start".to_string(),
            ))
        }
        _ => {
            return Err(CoreError::InvalidWindow(
                "temporary change needs both start and end times".to_string(),
            ))
        }
    };

    let mut tx = pool.begin().await?;

    if let (Some(spawn_id), Some((start, end))) = (spawn_id, window) {
        let existing = sqlx::query_as::<_, SpawnChangeProposal>(
            r#"
            SELECT * FROM spawn_change_proposals
            WHERE spawn_id = ?1
              AND status IN ('PENDING', 'APPROVED')
              AND start_time IS NOT NULL
            "#,
        )
        .bind(spawn_id)
        .fetch_all(&mut *tx)
        .await?;

        for other in &existing {
            if let (Some(o_start), Some(o_end)) = (other.start_time, other.end_time) {
                if policy::windows_overlap(start, end, o_start, o_end) {
                    return Err(CoreError::PolicyConflict(format!(
                        "temporary change window overlaps proposal {}",
                        other.id
                    )));
                }
            }
        }
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO spawn_change_proposals
            (spawn_id, locking_period_secs, claim_time_min_secs, claim_time_max_secs,
             start_time, end_time, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7)
        RETURNING id
        "#,
    )
    .bind(spawn_id)
    .bind(attrs.locking_period_secs)
    .bind(attrs.claim_time_min_secs)
    .bind(attrs.claim_time_max_secs)
    .bind(attrs.start_time)
    .bind(attrs.end_time)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    info!("Opened change proposal {id} for spawn {spawn_id:?}");
    get_change_proposal(pool, id).await
}

pub async fn get_change_proposal(pool: &SqlitePool, id: i64) -> Result<SpawnChangeProposal> {
    sqlx::query_as::<_, SpawnChangeProposal>(
        "SELECT * FROM spawn_change_proposals WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CoreError::NotFound {
        entity: "SpawnChangeProposal",
        name: id.to_string(),
    })
}

/// Cast a vote on a pending change proposal.
///
/// One vote per user per proposal. Once the tally reaches the evaluation
/// floor and the proposal is linked to a spawn, it resolves in the same
/// transaction: approval applies the proposed rules (immediately for a
/// permanent change; temporary changes take effect through
/// [`effective_policy`] during their window), anything below the world's
/// approval threshold is rejected.
pub async fn cast_vote(
    pool: &SqlitePool,
    user_id: i64,
    proposal_id: i64,
    vote_type: VoteType,
    now: DateTime<Utc>,
) -> Result<VoteOutcome> {
    let mut tx = pool.begin().await?;

    let proposal = sqlx::query_as::<_, SpawnChangeProposal>(
        "SELECT * FROM spawn_change_proposals WHERE id = ?1",
    )
    .bind(proposal_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| CoreError::NotFound {
        entity: "SpawnChangeProposal",
        name: proposal_id.to_string(),
    })?;

    if proposal.status != ProposalStatus::Pending {
        return Err(CoreError::NotPending(proposal.status));
    }

    sqlx::query(
        "INSERT INTO spawn_change_votes (proposal_id, user_id, vote_type, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(proposal_id)
    .bind(user_id)
    .bind(vote_type)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        let err = CoreError::from(e);
        if err.is_unique_violation() {
            CoreError::AlreadyVoted
        } else {
            err
        }
    })?;

    let (total, votes_for) = vote_tally(&mut tx, proposal_id).await?;
    let votes_against = total - votes_for;

    // An unlinked proposal accumulates votes but cannot resolve: there is no
    // spawn to apply the rules to and no world threshold to evaluate against.
    let spawn_id = match proposal.spawn_id {
        Some(id) => id,
        None => {
            tx.commit().await?;
            return Ok(VoteOutcome::Pending { votes_for, votes_against });
        }
    };

    let spawn = registry::get_spawn_by_id(&mut tx, spawn_id).await?;
    let world = registry::get_world_by_id(&mut tx, spawn.world_id).await?;

    match policy::evaluate_votes(votes_for, total, world.favourability_approval) {
        policy::VoteVerdict::Pending => {
            tx.commit().await?;
            Ok(VoteOutcome::Pending { votes_for, votes_against })
        }
        policy::VoteVerdict::Approved => {
            let transitioned = sqlx::query(
                "UPDATE spawn_change_proposals SET status = 'APPROVED', approved_at = ?2 WHERE id = ?1 AND status = 'PENDING'",
            )
            .bind(proposal_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if transitioned == 0 {
                let current = get_change_status(&mut tx, proposal_id).await?;
                return Err(CoreError::NotPending(current));
            }

            if !proposal.is_temporary() {
                sqlx::query(
                    r#"
                    UPDATE spawns
                    SET locking_period_secs = ?2,
                        claim_time_min_secs = ?3,
                        claim_time_max_secs = ?4
                    WHERE id = ?1
                    "#,
                )
                .bind(spawn_id)
                .bind(proposal.locking_period_secs)
                .bind(proposal.claim_time_min_secs)
                .bind(proposal.claim_time_max_secs)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            info!("Change proposal {proposal_id} approved ({votes_for}/{total} in favour)");
            Ok(VoteOutcome::Approved { votes_for, votes_against })
        }
        policy::VoteVerdict::Rejected => {
            let transitioned = sqlx::query(
                "UPDATE spawn_change_proposals SET status = 'REJECTED' WHERE id = ?1 AND status = 'PENDING'",
            )
            .bind(proposal_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if transitioned == 0 {
                let current = get_change_status(&mut tx, proposal_id).await?;
                return Err(CoreError::NotPending(current));
            }

            tx.commit().await?;
            info!("Change proposal {proposal_id} rejected ({votes_for}/{total} in favour)");
            Ok(VoteOutcome::Rejected { votes_for, votes_against })
        }
    }
}

// ─────────────────────────────────────────────────────────
// Effective policy & read-model metrics
// ─────────────────────────────────────────────────────────

/// Resolve the claim rules in force for a spawn at `now`: the most recently
/// approved temporary change whose window covers `now`, falling back to the
/// spawn's own columns. Permanent approved changes were already written onto
/// the spawn row.
pub async fn effective_policy(
    conn: &mut SqliteConnection,
    spawn: &Spawn,
    now: DateTime<Utc>,
) -> Result<ClaimPolicy> {
    let active_change = sqlx::query_as::<_, SpawnChangeProposal>(
        r#"
        SELECT * FROM spawn_change_proposals
        WHERE spawn_id = ?1
          AND status = 'APPROVED'
          AND start_time IS NOT NULL
          AND start_time <= ?2
          AND end_time >= ?2
        ORDER BY approved_at DESC
        LIMIT 1
        "#,
    )
    .bind(spawn.id)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(match active_change {
        Some(change) => ClaimPolicy {
            locking_period_secs: change.locking_period_secs,
            claim_time_min_secs: change.claim_time_min_secs,
            claim_time_max_secs: change.claim_time_max_secs,
        },
        None => ClaimPolicy {
            locking_period_secs: spawn.locking_period_secs,
            claim_time_min_secs: spawn.claim_time_min_secs,
            claim_time_max_secs: spawn.claim_time_max_secs,
        },
    })
}

/// Favourability percentage for a change proposal (informational).
pub async fn favourability(pool: &SqlitePool, proposal_id: i64) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let (total, votes_for) = vote_tally(&mut conn, proposal_id).await?;
    Ok(policy::favourability_pct(votes_for, total))
}

/// Engagement metric for a change proposal: votes cast per active user on
/// the target spawn (informational; not a gating condition).
pub async fn engagement(pool: &SqlitePool, proposal_id: i64, now: DateTime<Utc>) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let proposal = sqlx::query_as::<_, SpawnChangeProposal>(
        "SELECT * FROM spawn_change_proposals WHERE id = ?1",
    )
    .bind(proposal_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::NotFound {
        entity: "SpawnChangeProposal",
        name: proposal_id.to_string(),
    })?;

    let (total, _) = vote_tally(&mut conn, proposal_id).await?;

    let active_on_spawn = match proposal.spawn_id {
        Some(spawn_id) => {
            let spawn = registry::get_spawn_by_id(&mut conn, spawn_id).await?;
            let world = registry::get_world_by_id(&mut conn, spawn.world_id).await?;
            registry::active_user_count_on_spawn(&mut conn, &world, spawn_id, now).await?
        }
        None => 0,
    };

    Ok(policy::engagement(total, active_on_spawn))
}

// ─────────────────────────────────────────────────────────
// Expiry sweep
// ─────────────────────────────────────────────────────────

/// Move pending proposals of both kinds that were created more than
/// `older_than` ago to EXPIRED. Returns how many rows were swept.
pub async fn expire_proposals(
    pool: &SqlitePool,
    older_than: Duration,
    now: DateTime<Utc>,
) -> Result<u64> {
    let cutoff = now - older_than;
    let mut tx = pool.begin().await?;

    let creations = sqlx::query(
        "UPDATE spawn_proposals SET status = 'EXPIRED' WHERE status = 'PENDING' AND created_at < ?1",
    )
    .bind(cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let changes = sqlx::query(
        "UPDATE spawn_change_proposals SET status = 'EXPIRED' WHERE status = 'PENDING' AND created_at < ?1",
    )
    .bind(cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    let swept = creations + changes;
    if swept > 0 {
        info!("Expired {swept} stale pending proposals");
    }
    Ok(swept)
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

/// Proposed claim bounds must be positive and ordered; the schema CHECKs on
/// `spawns` would reject them anyway, but failing here keeps the error typed.
fn validate_claim_bounds(min_secs: i64, max_secs: i64) -> Result<()> {
    if min_secs <= 0 || max_secs < min_secs {
        return Err(CoreError::InvalidClaimTime { min_secs, max_secs });
    }
    Ok(())
}

async fn vote_tally(conn: &mut SqliteConnection, proposal_id: i64) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN vote_type = 'UPVOTE' THEN 1 ELSE 0 END), 0)
        FROM   spawn_change_votes
        WHERE  proposal_id = ?1
        "#,
    )
    .bind(proposal_id)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

async fn get_change_status(
    conn: &mut SqliteConnection,
    proposal_id: i64,
) -> Result<ProposalStatus> {
    let status: ProposalStatus = sqlx::query_scalar(
        "SELECT status FROM spawn_change_proposals WHERE id = ?1",
    )
    .bind(proposal_id)
    .fetch_one(conn)
    .await?;
    Ok(status)
}
