//! # Points Ledger
//!
//! Per-(character, spawn) balances. A row is created lazily at the starting
//! grant the first time a character interacts with a spawn; the only
//! mutation is the debit taken when a bid is accepted. There is no credit
//! path in this crate.
//!
//! Functions take a `&mut SqliteConnection` because the auction composes
//! `get_or_create_balance` and `debit` into one transaction per bid —
//! two concurrent bids must never both read the same balance and both pass
//! the funds checks.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::errors::{CoreError, Result};
use crate::models::Points;
use crate::policy::STARTING_POINTS;

/// Return the existing balance row, creating it at [`STARTING_POINTS`] if
/// this is the pair's first interaction. Idempotent: a second call returns
/// the same row.
pub async fn get_or_create_balance(
    conn: &mut SqliteConnection,
    character_id: i64,
    spawn_id: i64,
) -> Result<Points> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO points (character_id, spawn_id, points)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (character_id, spawn_id) DO NOTHING
        "#,
    )
    .bind(character_id)
    .bind(spawn_id)
    .bind(STARTING_POINTS)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted > 0 {
        debug!("Granted starting points to character {character_id} on spawn {spawn_id}");
    }

    sqlx::query_as::<_, Points>(
        "SELECT * FROM points WHERE character_id = ?1 AND spawn_id = ?2",
    )
    .bind(character_id)
    .bind(spawn_id)
    .fetch_one(conn)
    .await
    .map_err(CoreError::from)
}

/// Atomically subtract `amount` from the pair's balance and return the new
/// balance. The subtraction is guarded in SQL, so a concurrent debit that
/// would overdraw the row fails with [`CoreError::InsufficientFunds`]
/// instead of going negative.
pub async fn debit(
    conn: &mut SqliteConnection,
    character_id: i64,
    spawn_id: i64,
    amount: f64,
) -> Result<f64> {
    let updated = sqlx::query(
        r#"
        UPDATE points SET points = points - ?3
        WHERE character_id = ?1 AND spawn_id = ?2 AND points >= ?3
        "#,
    )
    .bind(character_id)
    .bind(spawn_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        let row = sqlx::query_as::<_, Points>(
            "SELECT * FROM points WHERE character_id = ?1 AND spawn_id = ?2",
        )
        .bind(character_id)
        .bind(spawn_id)
        .fetch_optional(&mut *conn)
        .await?;

        return match row {
            Some(p) => Err(CoreError::InsufficientFunds {
                balance: p.points,
                bid_points: amount as i64,
            }),
            None => Err(CoreError::NotFound {
                entity: "Points",
                name: format!("character {character_id} / spawn {spawn_id}"),
            }),
        };
    }

    let balance: f64 = sqlx::query_scalar(
        "SELECT points FROM points WHERE character_id = ?1 AND spawn_id = ?2",
    )
    .bind(character_id)
    .bind(spawn_id)
    .fetch_one(conn)
    .await?;

    debug!("Debited {amount} points from character {character_id} on spawn {spawn_id}; balance now {balance}");
    Ok(balance)
}
