//! Database query functions for the `agents` table.

use chrono::{DateTime, Utc};
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Agent, AgentStatus};

/// Insert a newly claimed agent, bound to a runner session and a task.
pub async fn insert_agent(
    pool: &PgPool,
    name: &str,
    runner_session_id: Uuid,
    working_dir: &str,
    current_task_id: Uuid,
    branch_name: &str,
) -> Result<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (name, status, current_task_id, branch_name, runner_session_id, working_dir) \
         VALUES ($1, 'working', $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(name)
    .bind(current_task_id)
    .bind(branch_name)
    .bind(runner_session_id)
    .bind(working_dir)
    .fetch_one(pool)
    .await
    .context("failed to insert agent")?;

    Ok(agent)
}

/// Fetch a single agent by ID.
pub async fn get_agent(pool: &PgPool, id: Uuid) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;

    Ok(agent)
}

/// Update `last_activity_at` (and, optionally, `total_tokens_used`) on a
/// heartbeat from the runner.
pub async fn record_heartbeat(pool: &PgPool, agent_id: Uuid, tokens_used: Option<i64>) -> Result<()> {
    sqlx::query(
        "UPDATE agents \
         SET last_activity_at = now(), \
             total_tokens_used = total_tokens_used + COALESCE($1, 0) \
         WHERE id = $2",
    )
    .bind(tokens_used.unwrap_or(0))
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to record agent heartbeat")?;

    Ok(())
}

/// Move an agent to a terminal state at the end of its run, clearing
/// `current_task_id` and bumping the appropriate completion counter.
pub async fn finish_agent(
    pool: &PgPool,
    agent_id: Uuid,
    status: AgentStatus,
    succeeded: bool,
) -> Result<()> {
    let completed_delta = i32::from(succeeded);
    let failed_delta = i32::from(!succeeded);

    sqlx::query(
        "UPDATE agents \
         SET status = $1, \
             current_task_id = NULL, \
             completed_at = now(), \
             tasks_completed = tasks_completed + $2, \
             tasks_failed = tasks_failed + $3 \
         WHERE id = $4",
    )
    .bind(status)
    .bind(completed_delta)
    .bind(failed_delta)
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to finish agent")?;

    Ok(())
}

/// Transition an agent's status without touching its completion counters
/// (used for pause/resume/stuck transitions).
pub async fn set_agent_status(pool: &PgPool, agent_id: Uuid, status: AgentStatus) -> Result<()> {
    sqlx::query("UPDATE agents SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to set agent status")?;

    Ok(())
}

/// Find agents in `working` status whose last activity (or start time, if
/// it never heartbeat) is older than `stuck_before`.
pub async fn find_stuck_agents(pool: &PgPool, stuck_before: DateTime<Utc>) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents \
         WHERE status = 'working' \
           AND COALESCE(last_activity_at, started_at) < $1",
    )
    .bind(stuck_before)
    .fetch_all(pool)
    .await
    .context("failed to find stuck agents")?;

    Ok(agents)
}
