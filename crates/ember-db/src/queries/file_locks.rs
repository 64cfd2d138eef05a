//! Database query functions for the `file_locks` table.
//!
//! The unique index on `file_locks(file_path)` is the linearization point
//! for lock acquisition: a second concurrent insert for the same path
//! fails with Postgres error code `23505` (unique_violation), which the
//! Coordinator distinguishes from other transient errors.

use chrono::{DateTime, Utc};
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::FileLock;

/// Postgres error code for a unique-constraint violation.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Returns true if `err` is a unique-constraint violation on `file_locks`.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .and_then(|db_err| db_err.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION_CODE)
    })
}

/// Fetch the current lock on a normalized path, if any (expired or not).
pub async fn get_by_path(pool: &PgPool, file_path: &str) -> Result<Option<FileLock>> {
    let lock = sqlx::query_as::<_, FileLock>("SELECT * FROM file_locks WHERE file_path = $1")
        .bind(file_path)
        .fetch_optional(pool)
        .await
        .context("failed to fetch file lock")?;

    Ok(lock)
}

/// Insert a new lock row. Fails with a unique-violation error (see
/// [`is_unique_violation`]) if another acquirer won the race.
pub async fn insert_lock(
    pool: &PgPool,
    file_path: &str,
    agent_id: Uuid,
    task_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<FileLock> {
    let lock = sqlx::query_as::<_, FileLock>(
        "INSERT INTO file_locks (file_path, agent_id, task_id, expires_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(file_path)
    .bind(agent_id)
    .bind(task_id)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .context("failed to insert file lock")?;

    Ok(lock)
}

/// Delete a lock by id (used when reclaiming an expired row before retrying
/// acquisition).
pub async fn delete_by_id(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM file_locks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete file lock by id")?;

    Ok(result.rows_affected())
}

/// Delete a lock by path + owning agent (no-op if missing or owned by
/// someone else).
pub async fn release(pool: &PgPool, file_path: &str, agent_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM file_locks WHERE file_path = $1 AND agent_id = $2")
        .bind(file_path)
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to release file lock")?;

    Ok(result.rows_affected())
}

/// Bulk-delete every lock owned by an agent (used on terminal transitions).
pub async fn release_all(pool: &PgPool, agent_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM file_locks WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to release all file locks for agent")?;

    Ok(result.rows_affected())
}

/// Bulk-delete every lock past its expiry. Returns the count removed.
pub async fn cleanup_expired(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM file_locks WHERE expires_at < now()")
        .execute(pool)
        .await
        .context("failed to clean up expired file locks")?;

    Ok(result.rows_affected())
}
