//! Task state machine transitions.
//!
//! Validates and executes state transitions for tasks, enforcing the
//! allowed transition graph, optimistic locking, and timestamp management.

pub mod dispatch;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use ember_db::models::TaskStatus;
use ember_db::queries::tasks as db;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// queued      -> in_progress   (claim)
/// in_progress -> verifying     (agent completes)
/// verifying   -> completed     (verifier pass)
/// verifying   -> failed        (verifier fail)
/// in_progress -> failed        (agent fails outright)
/// queued      -> cancelled
/// in_progress -> cancelled
/// verifying   -> cancelled
/// failed      -> queued        (retry / auto-retry)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Queued, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Verifying)
                | (TaskStatus::Verifying, TaskStatus::Completed)
                | (TaskStatus::Verifying, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::InProgress, TaskStatus::Cancelled)
                | (TaskStatus::Verifying, TaskStatus::Cancelled)
                | (TaskStatus::Failed, TaskStatus::Queued)
        )
    }

    /// Execute a plain status transition (anything other than the claim and
    /// retry edges, which carry extra fields and are handled by their own
    /// Store primitives).
    ///
    /// Sets `completed_at` when transitioning to a terminal state
    /// (`completed`, `failed`, `cancelled`).
    ///
    /// Returns an error if:
    /// - The transition is not a valid edge.
    /// - The current status in the database does not match `from`
    ///   (optimistic lock failure).
    /// - The task does not exist.
    pub async fn transition(
        pool: &PgPool,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!("invalid state transition: {from} -> {to} for task {task_id}");
        }

        let completed_at = match to {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                Some(chrono::Utc::now())
            }
            _ => None,
        };

        let rows = db::transition_task_status(pool, task_id, from, to, None, completed_at)
            .await
            .with_context(|| format!("failed to transition task {task_id} from {from} to {to}"))?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            match task {
                None => bail!("task {task_id} not found"),
                Some(t) => bail!(
                    "optimistic lock failed: task {task_id} has status {}, expected {from}",
                    t.status
                ),
            }
        }

        Ok(())
    }
}
