//! Database query functions for the `tasks` table.

use chrono::{DateTime, Utc};
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{RiskLevel, Task, TaskStatus};

/// Insert a new task row in `queued` status.
pub async fn insert_task(
    pool: &PgPool,
    title: &str,
    description: &str,
    priority: i32,
    risk_level: RiskLevel,
    files_hint: &[String],
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (title, description, priority, risk_level, files_hint) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(risk_level)
    .bind(files_hint)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Partially update a task's descriptive fields (title, description,
/// priority, risk level, files hint). Fields left `None` are left
/// unchanged. Does not touch `status` or any lifecycle column.
#[allow(clippy::too_many_arguments)]
pub async fn update_task_fields(
    pool: &PgPool,
    id: Uuid,
    title: Option<&str>,
    description: Option<&str>,
    priority: Option<i32>,
    risk_level: Option<RiskLevel>,
    files_hint: Option<&[String]>,
) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET title = COALESCE($1, title), \
             description = COALESCE($2, description), \
             priority = COALESCE($3, priority), \
             risk_level = COALESCE($4, risk_level), \
             files_hint = COALESCE($5, files_hint), \
             updated_at = now() \
         WHERE id = $6 \
         RETURNING *",
    )
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(risk_level)
    .bind(files_hint)
    .fetch_optional(pool)
    .await
    .context("failed to update task fields")?;

    Ok(task)
}

/// List tasks, most recently created first.
pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list tasks")?;

    Ok(tasks)
}

/// Count tasks currently `queued`, for the Runner Protocol Service's
/// status poll.
pub async fn count_queued_tasks(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = 'queued'")
        .fetch_one(pool)
        .await
        .context("failed to count queued tasks")?;

    Ok(count)
}

/// Select the next claimable task: lowest `priority` value (highest
/// urgency) first, `created_at` ascending as the tiebreaker. Only
/// considers `queued` tasks.
pub async fn next_queued_task(pool: &PgPool) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'queued' \
         ORDER BY priority ASC, created_at ASC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("failed to select next queued task")?;

    Ok(task)
}

/// Atomically transition a task between states using the Store's
/// conditional-claim primitive: the `WHERE` clause includes
/// `status = $from`, so the row only moves if the expected prior state
/// still holds. Returns rows affected (0 means the race was lost).
#[allow(clippy::too_many_arguments)]
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             updated_at = now(), \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at) \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Claim a queued task on behalf of a newly created agent: conditional
/// update from `queued` to `in_progress`, binding the agent and branch
/// name. Returns rows affected; 1 is proof of exclusive claim.
pub async fn claim_task(
    pool: &PgPool,
    task_id: Uuid,
    agent_id: Uuid,
    branch_name: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'in_progress', \
             assigned_agent_id = $1, \
             branch_name = $2, \
             started_at = now(), \
             updated_at = now() \
         WHERE id = $3 AND status = 'queued'",
    )
    .bind(agent_id)
    .bind(branch_name)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to claim task")?;

    Ok(result.rows_affected())
}

/// Atomically increment `verification_attempts` and return the new value.
/// Called by the Verifier before running any check.
pub async fn increment_verification_attempts(pool: &PgPool, task_id: Uuid) -> Result<i32> {
    let (attempts,): (i32,) = sqlx::query_as(
        "UPDATE tasks \
         SET verification_attempts = verification_attempts + 1, updated_at = now() \
         WHERE id = $1 \
         RETURNING verification_attempts",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to increment verification attempts")?;

    Ok(attempts)
}

/// Set `verification_status` independent of the lifecycle status column.
pub async fn set_verification_status(
    pool: &PgPool,
    task_id: Uuid,
    status: crate::models::VerificationStatus,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET verification_status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set verification status")?;

    Ok(())
}

/// Reset a task to `queued` for a retry, incrementing `retry_count` and
/// preserving `files_hint`. Rejects (returns 0 rows affected) if the
/// task is not currently in a retryable state.
pub async fn retry_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'queued', \
             retry_count = retry_count + 1, \
             assigned_agent_id = NULL, \
             branch_name = NULL, \
             started_at = NULL, \
             completed_at = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status = $2",
    )
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to retry task")?;

    Ok(result.rows_affected())
}

/// Cancel a task from one of the cancellable states.
pub async fn cancel_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', completed_at = now(), updated_at = now() \
         WHERE id = $1 AND status = $2",
    )
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(result.rows_affected())
}

/// List tasks currently `failed`, for Supervisor retry scheduling.
pub async fn list_failed_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = 'failed' ORDER BY updated_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list failed tasks")?;

    Ok(tasks)
}
