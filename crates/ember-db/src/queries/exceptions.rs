//! Database query functions for the `exceptions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Exception, ExceptionType, Severity};

/// Parameters for creating a new operator-visible exception.
#[derive(Debug, Clone)]
pub struct NewException {
    pub exception_type: ExceptionType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub agent_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

/// Insert a new exception in `open` status.
pub async fn insert_exception(pool: &PgPool, new: &NewException) -> Result<Exception> {
    let exception = sqlx::query_as::<_, Exception>(
        "INSERT INTO exceptions \
            (exception_type, severity, title, description, suggested_action, agent_id, task_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.exception_type)
    .bind(new.severity)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.suggested_action)
    .bind(new.agent_id)
    .bind(new.task_id)
    .fetch_one(pool)
    .await
    .context("failed to insert exception")?;

    Ok(exception)
}

/// List exceptions attached to a task, most recent first.
pub async fn list_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Exception>> {
    let rows = sqlx::query_as::<_, Exception>(
        "SELECT * FROM exceptions WHERE task_id = $1 ORDER BY created_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list exceptions for task {}", task_id))?;

    Ok(rows)
}

/// Returns true if an open exception of the given type already exists for
/// a task (used to make Supervisor's "ensure an Exception exists" step
/// idempotent across ticks).
pub async fn has_open_exception(
    pool: &PgPool,
    task_id: Uuid,
    exception_type: ExceptionType,
) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS( \
            SELECT 1 FROM exceptions \
            WHERE task_id = $1 AND exception_type = $2 AND status = 'open' \
         )",
    )
    .bind(task_id)
    .bind(exception_type)
    .fetch_one(pool)
    .await
    .context("failed to check for open exception")?;

    Ok(row.0)
}
