//! Named dispatch operations wrapping [`super::TaskStateMachine`] and the
//! Store's conditional-claim primitive with the semantics Task Service
//! callers need (create/run/retry/autoRetry/cancel).

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use ember_db::models::{RiskLevel, Task, TaskStatus};
use ember_db::queries::tasks as db;

/// Maximum number of retries (in-loop verification retries aside) before a
/// failed task is no longer retry-eligible.
pub const MAX_RETRY_COUNT: i32 = 3;

/// Create a task in `queued`.
pub async fn queue_task(
    pool: &PgPool,
    title: &str,
    description: &str,
    priority: i32,
    risk_level: RiskLevel,
    files_hint: &[String],
) -> Result<Task> {
    db::insert_task(pool, title, description, priority, risk_level, files_hint).await
}

/// Claim a queued task on behalf of a newly-created Agent.
///
/// Returns `true` if this call won the claim race (the Store's
/// conditional-claim primitive affected exactly one row).
pub async fn claim_task(
    pool: &PgPool,
    task_id: Uuid,
    agent_id: Uuid,
    branch_name: &str,
) -> Result<bool> {
    let rows = db::claim_task(pool, task_id, agent_id, branch_name).await?;
    Ok(rows == 1)
}

/// Transition a claimed task into verification: `in_progress -> verifying`.
pub async fn begin_verifying(pool: &PgPool, task_id: Uuid) -> Result<()> {
    super::TaskStateMachine::transition(pool, task_id, TaskStatus::InProgress, TaskStatus::Verifying)
        .await
}

/// Mark a task complete: `verifying -> completed`.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    super::TaskStateMachine::transition(pool, task_id, TaskStatus::Verifying, TaskStatus::Completed)
        .await
}

/// Fail a task from whichever state it is currently in
/// (`in_progress -> failed` for an outright agent failure, or
/// `verifying -> failed` for a verification failure).
pub async fn fail_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<()> {
    super::TaskStateMachine::transition(pool, task_id, from, TaskStatus::Failed).await
}

/// Retry a failed task: reset to `queued`, increment `retry_count`.
///
/// Rejects if `retry_count >= MAX_RETRY_COUNT`.
pub async fn retry_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    let task = db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    if task.status != TaskStatus::Failed {
        bail!("cannot retry task {task_id}: status is {}, expected failed", task.status);
    }
    if task.retry_count >= MAX_RETRY_COUNT {
        bail!(
            "cannot retry task {task_id}: retry_count {} >= {MAX_RETRY_COUNT}",
            task.retry_count
        );
    }

    let rows = db::retry_task(pool, task_id, TaskStatus::Failed).await?;
    if rows == 0 {
        bail!("optimistic lock failed on retry for task {task_id}");
    }
    Ok(())
}

/// Same as [`retry_task`], but driven by the Supervisor's retry policy
/// (§4.7): refuses if the prior failure's classified type is in the
/// no-retry set.
pub async fn auto_retry_task(pool: &PgPool, task_id: Uuid, should_retry: bool) -> Result<()> {
    if !should_retry {
        bail!("task {task_id} is not eligible for auto-retry under the current failure classification");
    }
    retry_task(pool, task_id).await
}

/// Cancel a task. Only valid from `queued`, `in_progress`, or `verifying`.
pub async fn cancel_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<()> {
    if !matches!(
        from,
        TaskStatus::Queued | TaskStatus::InProgress | TaskStatus::Verifying
    ) {
        bail!("cannot cancel task {task_id} from status {from}");
    }

    let rows = db::cancel_task(pool, task_id, from).await?;
    if rows == 0 {
        bail!("optimistic lock failed cancelling task {task_id} from {from}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::TaskStateMachine;
    use ember_db::models::TaskStatus;

    #[test]
    fn valid_transitions_match_the_state_diagram() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Queued,
            TaskStatus::InProgress
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::InProgress,
            TaskStatus::Verifying
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Verifying,
            TaskStatus::Completed
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Verifying,
            TaskStatus::Failed
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Failed,
            TaskStatus::Queued
        ));
    }

    #[test]
    fn completed_is_terminal() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Completed,
            TaskStatus::Queued
        ));
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Completed,
            TaskStatus::Failed
        ));
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Cancelled,
            TaskStatus::Queued
        ));
    }

    #[test]
    fn cancel_is_reachable_from_the_three_non_terminal_states() {
        for from in [
            TaskStatus::Queued,
            TaskStatus::InProgress,
            TaskStatus::Verifying,
        ] {
            assert!(TaskStateMachine::is_valid_transition(from, TaskStatus::Cancelled));
        }
    }

    #[test]
    fn completed_cannot_be_cancelled() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Completed,
            TaskStatus::Cancelled
        ));
    }
}
