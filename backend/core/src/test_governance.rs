use chrono::Duration;

use crate::errors::CoreError;
use crate::governance::{self, ChangeAttrs, SponsorOutcome, VoteOutcome};
use crate::models::{ProposalStatus, Spawn, VoteType};
use crate::registry;
use crate::test_support::*;

fn change_attrs() -> ChangeAttrs {
    ChangeAttrs {
        locking_period_secs: 1800,
        claim_time_min_secs: 7200,
        claim_time_max_secs: 14400,
        start_time: None,
        end_time: None,
    }
}

// ─────────────────────────────────────────────────────────
// Spawn proposals
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn fourth_sponsor_approves_with_forty_active_users() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    // Seed spawn so the 40 active users have something to have hunted on.
    let seed = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Seed Spawn"))
        .await
        .unwrap();
    drop(conn);

    // World defaults: sponsorship_flat = 5, sponsorship_fraction = 0.1.
    // With 40 active users: required = min(5, round(40 * 0.1)) = 4.
    let sponsors = seed_active_users(&pool, world.id, seed.id, 40, now).await;

    let proposal = governance::create_proposal(
        &pool,
        world.id,
        &spawn_attrs("Hydra Cave"),
        Some(sponsors[0]),
        now,
    )
    .await
    .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);

    for (i, user) in sponsors.iter().take(3).enumerate() {
        let outcome = governance::sponsor(&pool, *user, proposal.id, now).await.unwrap();
        assert_eq!(
            outcome,
            SponsorOutcome::Pending {
                sponsors: i as i64 + 1,
                required: 4
            }
        );
    }

    let outcome = governance::sponsor(&pool, sponsors[3], proposal.id, now)
        .await
        .unwrap();
    let spawn_id = match outcome {
        SponsorOutcome::Approved { spawn_id } => spawn_id,
        other => panic!("expected approval, got {other:?}"),
    };

    // The real spawn copies the proposed rule fields and links back.
    let spawn: Spawn = sqlx::query_as("SELECT * FROM spawns WHERE id = ?1")
        .bind(spawn_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(spawn.name, "Hydra Cave");
    assert_eq!(spawn.world_id, world.id);
    assert_eq!(spawn.locking_period_secs, 3600);
    assert_eq!(spawn.claim_time_min_secs, 3600);
    assert_eq!(spawn.claim_time_max_secs, 10800);
    assert_eq!(spawn.proposal_id, Some(proposal.id));

    let stored = governance::get_proposal(&pool, proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Approved);
    assert_eq!(stored.approved_at, Some(now));

    // A fifth sponsorship attempt hits the resolved proposal.
    let err = governance::sponsor(&pool, sponsors[4], proposal.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotPending(ProposalStatus::Approved)));
}

#[tokio::test]
async fn sponsoring_twice_never_grows_the_sponsor_set() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let seed = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Seed Spawn"))
        .await
        .unwrap();
    drop(conn);

    // 50 active users -> required = min(5, 5) = 5, so one sponsor stays pending.
    let users = seed_active_users(&pool, world.id, seed.id, 50, now).await;

    let proposal =
        governance::create_proposal(&pool, world.id, &spawn_attrs("Hydra Cave"), None, now)
            .await
            .unwrap();

    governance::sponsor(&pool, users[0], proposal.id, now).await.unwrap();
    let err = governance::sponsor(&pool, users[0], proposal.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadySponsored));

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM spawn_proposal_sponsors WHERE proposal_id = ?1")
            .bind(proposal.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn identical_proposals_keep_distinct_identities() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    drop(conn);

    let a = governance::create_proposal(&pool, world.id, &spawn_attrs("Hydra Cave"), None, now)
        .await
        .unwrap();
    let b = governance::create_proposal(&pool, world.id, &spawn_attrs("Hydra Cave"), None, now)
        .await
        .unwrap();
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn sponsoring_a_missing_proposal_is_not_found() {
    let pool = test_pool().await;
    let user = create_user(&pool, "alice").await;

    let err = governance::sponsor(&pool, user, 999, t0()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

// ─────────────────────────────────────────────────────────
// Change proposals
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn three_of_five_upvotes_rejects_and_leaves_rules_untouched() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    for i in 0..3 {
        let user = create_user(&pool, &format!("up{i}")).await;
        governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
    }
    let down1 = create_user(&pool, "down1").await;
    governance::cast_vote(&pool, down1, proposal.id, VoteType::Downvote, now)
        .await
        .unwrap();

    // Fifth vote reaches the evaluation floor: 3/5 = 60% < 75%.
    let down2 = create_user(&pool, "down2").await;
    let outcome = governance::cast_vote(&pool, down2, proposal.id, VoteType::Downvote, now)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VoteOutcome::Rejected {
            votes_for: 3,
            votes_against: 2
        }
    );

    let stored = governance::get_change_proposal(&pool, proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Rejected);

    let unchanged: Spawn = sqlx::query_as("SELECT * FROM spawns WHERE id = ?1")
        .bind(spawn.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(unchanged.locking_period_secs, 3600);
    assert_eq!(unchanged.claim_time_min_secs, 3600);
    assert_eq!(unchanged.claim_time_max_secs, 10800);
}

#[tokio::test]
async fn four_of_five_upvotes_approves_and_applies_the_rules() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    for i in 0..4 {
        let user = create_user(&pool, &format!("up{i}")).await;
        governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
    }

    // 4/5 = 80% >= 75%.
    let down = create_user(&pool, "down").await;
    let outcome = governance::cast_vote(&pool, down, proposal.id, VoteType::Downvote, now)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VoteOutcome::Approved {
            votes_for: 4,
            votes_against: 1
        }
    );

    let updated: Spawn = sqlx::query_as("SELECT * FROM spawns WHERE id = ?1")
        .bind(spawn.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(updated.locking_period_secs, 1800);
    assert_eq!(updated.claim_time_min_secs, 7200);
    assert_eq!(updated.claim_time_max_secs, 14400);
}

#[tokio::test]
async fn votes_below_the_floor_never_resolve() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    // Four unanimous upvotes: 100% favourable but below the floor of five.
    for i in 0..4 {
        let user = create_user(&pool, &format!("up{i}")).await;
        let outcome = governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
        assert!(matches!(outcome, VoteOutcome::Pending { .. }));
    }

    let stored = governance::get_change_proposal(&pool, proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Pending);
}

#[tokio::test]
async fn voting_twice_is_rejected() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    let user = create_user(&pool, "alice").await;
    governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
        .await
        .unwrap();
    let err = governance::cast_vote(&pool, user, proposal.id, VoteType::Downvote, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyVoted));

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM spawn_change_votes WHERE proposal_id = ?1")
            .bind(proposal.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn voting_on_a_resolved_proposal_is_not_pending() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    for i in 0..5 {
        let user = create_user(&pool, &format!("up{i}")).await;
        governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
    }

    let late = create_user(&pool, "late").await;
    let err = governance::cast_vote(&pool, late, proposal.id, VoteType::Upvote, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotPending(ProposalStatus::Approved)));
}

#[tokio::test]
async fn unlinked_proposal_accumulates_votes_but_stays_pending() {
    let pool = test_pool().await;
    let now = t0();

    let proposal = governance::create_change_proposal(&pool, None, &change_attrs(), now)
        .await
        .unwrap();

    for i in 0..6 {
        let user = create_user(&pool, &format!("up{i}")).await;
        let outcome = governance::cast_vote(&pool, user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
        assert!(matches!(outcome, VoteOutcome::Pending { .. }));
    }

    let stored = governance::get_change_proposal(&pool, proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Pending);
}

#[tokio::test]
async fn temporary_change_window_shape_is_validated() {
    let pool = test_pool().await;
    let now = t0();

    let mut attrs = change_attrs();
    attrs.start_time = Some(now + Duration::days(1));
    let err = governance::create_change_proposal(&pool, None, &attrs, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidWindow(_)));

    attrs.end_time = Some(now); // before start
    let err = governance::create_change_proposal(&pool, None, &attrs, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidWindow(_)));
}

#[tokio::test]
async fn overlapping_temporary_changes_conflict() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let mut first = change_attrs();
    first.start_time = Some(now + Duration::days(1));
    first.end_time = Some(now + Duration::days(3));
    governance::create_change_proposal(&pool, Some(spawn.id), &first, now)
        .await
        .unwrap();

    let mut second = change_attrs();
    second.start_time = Some(now + Duration::days(2));
    second.end_time = Some(now + Duration::days(4));
    let err = governance::create_change_proposal(&pool, Some(spawn.id), &second, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PolicyConflict(_)));

    // Disjoint windows are fine.
    let mut third = change_attrs();
    third.start_time = Some(now + Duration::days(3));
    third.end_time = Some(now + Duration::days(4));
    governance::create_change_proposal(&pool, Some(spawn.id), &third, now)
        .await
        .unwrap();
}

// ─────────────────────────────────────────────────────────
// Metrics & expiry
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn favourability_and_engagement_read_models() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let proposal =
        governance::create_change_proposal(&pool, Some(spawn.id), &change_attrs(), now)
            .await
            .unwrap();

    // Two of the voters are also active on the spawn.
    let voters = seed_active_users(&pool, world.id, spawn.id, 2, now).await;
    for user in &voters {
        governance::cast_vote(&pool, *user, proposal.id, VoteType::Upvote, now)
            .await
            .unwrap();
    }
    let outsider = create_user(&pool, "outsider").await;
    governance::cast_vote(&pool, outsider, proposal.id, VoteType::Downvote, now)
        .await
        .unwrap();

    // 2 of 3 in favour -> floor(66.6) = 66.
    assert_eq!(governance::favourability(&pool, proposal.id).await.unwrap(), 66);
    // 3 votes over 2 active users on the spawn -> floor(1.5) = 1.
    assert_eq!(governance::engagement(&pool, proposal.id, now).await.unwrap(), 1);
}

#[tokio::test]
async fn expiry_sweep_only_touches_stale_pending_proposals() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();
    let now = t0();

    let world = registry::create_world(&mut conn, "Antica", None).await.unwrap();
    let spawn = registry::create_spawn(&mut conn, world.id, &spawn_attrs("Dragon Lair"))
        .await
        .unwrap();
    drop(conn);

    let stale =
        governance::create_proposal(&pool, world.id, &spawn_attrs("Old Idea"), None, now - Duration::days(60))
            .await
            .unwrap();
    let fresh =
        governance::create_proposal(&pool, world.id, &spawn_attrs("New Idea"), None, now - Duration::days(1))
            .await
            .unwrap();
    let stale_change = governance::create_change_proposal(
        &pool,
        Some(spawn.id),
        &change_attrs(),
        now - Duration::days(60),
    )
    .await
    .unwrap();

    let swept = governance::expire_proposals(&pool, Duration::days(30), now)
        .await
        .unwrap();
    assert_eq!(swept, 2);

    assert_eq!(
        governance::get_proposal(&pool, stale.id).await.unwrap().status,
        ProposalStatus::Expired
    );
    assert_eq!(
        governance::get_proposal(&pool, fresh.id).await.unwrap().status,
        ProposalStatus::Pending
    );
    assert_eq!(
        governance::get_change_proposal(&pool, stale_change.id)
            .await
            .unwrap()
            .status,
        ProposalStatus::Expired
    );

    // Expired proposals reject further interaction.
    let user = create_user(&pool, "alice").await;
    let err = governance::sponsor(&pool, user, stale.id, now).await.unwrap_err();
    assert!(matches!(err, CoreError::NotPending(ProposalStatus::Expired)));
}
