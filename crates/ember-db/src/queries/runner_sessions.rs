//! Database query functions for the `runner_sessions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RunnerSession;

/// Insert a fresh runner session with the given opaque token.
pub async fn insert_session(
    pool: &PgPool,
    token: &str,
    name: &str,
    working_dir: &str,
) -> Result<RunnerSession> {
    let session = sqlx::query_as::<_, RunnerSession>(
        "INSERT INTO runner_sessions (token, name, working_dir) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(token)
    .bind(name)
    .bind(working_dir)
    .fetch_one(pool)
    .await
    .context("failed to insert runner session")?;

    Ok(session)
}

/// Fetch an existing session by runner name, regardless of active state.
pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<RunnerSession>> {
    let session = sqlx::query_as::<_, RunnerSession>("SELECT * FROM runner_sessions WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch runner session by name")?;

    Ok(session)
}

/// Reactivate a previously-inactive session with a fresh token and
/// working directory.
pub async fn reactivate(pool: &PgPool, id: Uuid, token: &str, working_dir: &str) -> Result<RunnerSession> {
    let session = sqlx::query_as::<_, RunnerSession>(
        "UPDATE runner_sessions \
         SET token = $1, working_dir = $2, is_active = TRUE, last_seen_at = now() \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(token)
    .bind(working_dir)
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to reactivate runner session")?;

    Ok(session)
}

/// Validate a bearer token: returns the session only if it is active.
pub async fn get_active_by_token(pool: &PgPool, token: &str) -> Result<Option<RunnerSession>> {
    let session = sqlx::query_as::<_, RunnerSession>(
        "SELECT * FROM runner_sessions WHERE token = $1 AND is_active = TRUE",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("failed to fetch runner session by token")?;

    Ok(session)
}

/// Update `last_seen_at` to now.
pub async fn touch(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE runner_sessions SET last_seen_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to touch runner session")?;

    Ok(())
}
