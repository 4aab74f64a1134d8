//! # Registry
//!
//! Owns World and Spawn identity plus the world-scoped activity metric that
//! drives governance thresholds.
//!
//! Lookups by name are case-insensitive (the spawn-name uniqueness index is
//! `COLLATE NOCASE`). World policy columns carry schema-level defaults and
//! are only changed administratively, outside this crate.
//!
//! All functions take a `&mut SqliteConnection` so callers can compose them
//! into their own transactions; acquire a connection from the pool when no
//! transaction is needed.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use crate::errors::{CoreError, Result};
use crate::identity::CharacterFacts;
use crate::models::{Character, Spawn, World};

/// Attributes shared by direct spawn creation and spawn proposals.
#[derive(Debug, Clone)]
pub struct SpawnAttrs {
    pub name: String,
    pub description: Option<String>,
    pub locking_period_secs: i64,
    pub claim_time_min_secs: i64,
    pub claim_time_max_secs: i64,
    pub deprioritize_time_secs: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Worlds
// ─────────────────────────────────────────────────────────

/// Create a world with the default policy parameters.
pub async fn create_world(
    conn: &mut SqliteConnection,
    name: &str,
    location: Option<&str>,
) -> Result<World> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO worlds (name, location) VALUES (?1, ?2) RETURNING id",
    )
    .bind(name)
    .bind(location)
    .fetch_one(&mut *conn)
    .await?;

    info!("Created world '{name}' (id {id})");
    get_world_by_id(conn, id).await
}

/// Insert the world if unknown, otherwise refresh its location.
/// Used by the upstream world-list sync; policy columns are left untouched.
pub async fn upsert_world(
    conn: &mut SqliteConnection,
    name: &str,
    location: Option<&str>,
) -> Result<World> {
    sqlx::query(
        r#"
        INSERT INTO worlds (name, location) VALUES (?1, ?2)
        ON CONFLICT (name) DO UPDATE SET location = COALESCE(excluded.location, location)
        "#,
    )
    .bind(name)
    .bind(location)
    .execute(&mut *conn)
    .await?;

    get_world(conn, name).await
}

/// Fetch a world by name, case-insensitively.
pub async fn get_world(conn: &mut SqliteConnection, name: &str) -> Result<World> {
    sqlx::query_as::<_, World>("SELECT * FROM worlds WHERE name = ?1 COLLATE NOCASE")
        .bind(name)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "World",
            name: name.to_string(),
        })
}

pub async fn get_world_by_id(conn: &mut SqliteConnection, id: i64) -> Result<World> {
    sqlx::query_as::<_, World>("SELECT * FROM worlds WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "World",
            name: id.to_string(),
        })
}

// ─────────────────────────────────────────────────────────
// Spawns
// ─────────────────────────────────────────────────────────

/// Administrative direct spawn creation. Community creation goes through
/// [`crate::governance::sponsor`] instead.
pub async fn create_spawn(
    conn: &mut SqliteConnection,
    world_id: i64,
    attrs: &SpawnAttrs,
) -> Result<Spawn> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO spawns
            (name, description, locking_period_secs, claim_time_min_secs,
             claim_time_max_secs, deprioritize_time_secs, world_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(&attrs.name)
    .bind(&attrs.description)
    .bind(attrs.locking_period_secs)
    .bind(attrs.claim_time_min_secs)
    .bind(attrs.claim_time_max_secs)
    .bind(attrs.deprioritize_time_secs)
    .bind(world_id)
    .fetch_one(&mut *conn)
    .await?;

    info!("Created spawn '{}' (id {id}) in world {world_id}", attrs.name);
    get_spawn_by_id(conn, id).await
}

/// Fetch a spawn by name within a world, case-insensitively.
pub async fn get_spawn(conn: &mut SqliteConnection, world_id: i64, name: &str) -> Result<Spawn> {
    sqlx::query_as::<_, Spawn>(
        "SELECT * FROM spawns WHERE world_id = ?1 AND name = ?2 COLLATE NOCASE",
    )
    .bind(world_id)
    .bind(name)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| CoreError::NotFound {
        entity: "Spawn",
        name: name.to_string(),
    })
}

pub async fn get_spawn_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Spawn> {
    sqlx::query_as::<_, Spawn>("SELECT * FROM spawns WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Spawn",
            name: id.to_string(),
        })
}

// ─────────────────────────────────────────────────────────
// Characters
// ─────────────────────────────────────────────────────────

/// Write verified identity facts for a character, creating its world on
/// first sight. Called by the embedding layer after a successful
/// [`crate::identity::IdentityClient::fetch_character_facts`].
pub async fn upsert_character(
    conn: &mut SqliteConnection,
    facts: &CharacterFacts,
    user_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Character> {
    let world = upsert_world(conn, &facts.world, None).await?;

    sqlx::query(
        r#"
        INSERT INTO characters (name, level, vocation, user_id, world_id, last_login)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (name) DO UPDATE SET
            level      = excluded.level,
            vocation   = excluded.vocation,
            user_id    = COALESCE(excluded.user_id, user_id),
            world_id   = excluded.world_id,
            last_login = excluded.last_login
        "#,
    )
    .bind(&facts.name)
    .bind(facts.level)
    .bind(&facts.vocation)
    .bind(user_id)
    .bind(world.id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, Character>("SELECT * FROM characters WHERE name = ?1")
        .bind(&facts.name)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Character",
            name: facts.name.clone(),
        })
}

// ─────────────────────────────────────────────────────────
// Activity metrics
// ─────────────────────────────────────────────────────────

/// Count users with at least one character in the world whose most recent
/// bid or hunt activity (via any of their characters) falls within the
/// world's inactivity threshold of `now`.
pub async fn active_user_count(
    conn: &mut SqliteConnection,
    world: &World,
    now: DateTime<Utc>,
) -> Result<i64> {
    let cutoff = now - world.inactive_threshold();

    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT c.user_id)
        FROM   characters c
        WHERE  c.world_id = ?1
          AND  c.user_id IS NOT NULL
          AND (
               EXISTS (SELECT 1 FROM bids b
                       JOIN characters bc ON bc.id = b.character_id
                       WHERE bc.user_id = c.user_id
                         AND bc.world_id = ?1
                         AND b.created_at >= ?2)
            OR EXISTS (SELECT 1 FROM hunts h
                       JOIN characters hc ON hc.id = h.character_id
                       WHERE hc.user_id = c.user_id
                         AND hc.world_id = ?1
                         AND h.start_time >= ?2)
          )
        "#,
    )
    .bind(world.id)
    .bind(cutoff)
    .fetch_one(conn)
    .await?;

    Ok(count)
}

/// Same recency rule as [`active_user_count`], restricted to activity on a
/// single spawn. Feeds the governance engagement read-model.
pub async fn active_user_count_on_spawn(
    conn: &mut SqliteConnection,
    world: &World,
    spawn_id: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let cutoff = now - world.inactive_threshold();

    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT c.user_id)
        FROM   characters c
        WHERE  c.user_id IS NOT NULL
          AND (
               EXISTS (SELECT 1 FROM bids b
                       WHERE b.character_id = c.id
                         AND b.spawn_id = ?1
                         AND b.created_at >= ?2)
            OR EXISTS (SELECT 1 FROM hunts h
                       WHERE h.character_id = c.id
                         AND h.spawn_id = ?1
                         AND h.start_time >= ?2)
          )
        "#,
    )
    .bind(spawn_id)
    .bind(cutoff)
    .fetch_one(conn)
    .await?;

    Ok(count)
}
