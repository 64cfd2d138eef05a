//! Supervisor (C7): a 30-second periodic loop that keeps the fleet honest
//! when no one is watching — reaping stuck agents, sweeping expired locks,
//! and rescheduling retry-eligible failed tasks.
//!
//! Shaped after the teacher's `orchestrator::run_orchestrator` loop body:
//! a `tokio::select!` between the next tick and a `CancellationToken`,
//! graceful drain on cancellation, errors turned into an Exception rather
//! than a panic so one bad tick never ends the process.

mod retry_policy;

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use ember_db::models::{AgentStatus, ExceptionType, Severity, TaskStatus};
use ember_db::queries::agents;
use ember_db::queries::exceptions::{self, NewException};
use ember_db::queries::tasks as task_db;
use ember_db::queries::verification_results;

use crate::coordinator::Coordinator;
use crate::state::dispatch;

pub use retry_policy::{classify_failure, retry_policy_for, FailureType, RetryPolicy};

/// Agents idle this long without a heartbeat are considered stuck.
const STUCK_AFTER: chrono::Duration = chrono::Duration::minutes(10);
/// Time between Supervisor passes.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Run the Supervisor loop until `cancel` fires.
pub async fn run_supervisor(pool: PgPool, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_pass(&pool).await {
                    tracing::error!(error = %e, "supervisor pass failed");
                    record_supervisor_exception(&pool, &e.to_string()).await;
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("supervisor shutting down");
                break;
            }
        }
    }
}

/// Run the three checks once, concurrently.
async fn run_pass(pool: &PgPool) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(pool.clone());

    let (stuck_result, lock_result, retry_result) = tokio::join!(
        reap_stuck_agents(pool),
        coordinator.cleanup_expired_locks(),
        schedule_retries(pool),
    );

    if let Err(e) = stuck_result {
        tracing::warn!(error = %e, "stuck-agent detection failed");
    }
    if let Err(e) = lock_result {
        tracing::warn!(error = %e, "lock expiry cleanup failed");
    }
    if let Err(e) = retry_result {
        tracing::warn!(error = %e, "failed-task retry scheduling failed");
    }

    Ok(())
}

/// Find agents whose last activity (or start time, if they never
/// heartbeat) is older than [`STUCK_AFTER`] and fail them out.
async fn reap_stuck_agents(pool: &PgPool) -> anyhow::Result<()> {
    let stuck_before = Utc::now() - STUCK_AFTER;
    let stuck = agents::find_stuck_agents(pool, stuck_before).await?;

    for agent in stuck {
        tracing::warn!(agent_id = %agent.id, "agent appears stuck, failing it out");

        let new_exception = NewException {
            exception_type: ExceptionType::AgentStuck,
            severity: Severity::Error,
            title: format!("Agent {} is stuck", agent.id),
            description: format!(
                "Agent {} had no activity since {:?} (threshold {} minutes)",
                agent.id,
                agent.last_activity_at,
                STUCK_AFTER.num_minutes()
            ),
            suggested_action: Some("Investigate the runner process and consider retrying the task.".to_owned()),
            agent_id: Some(agent.id),
            task_id: agent.current_task_id,
        };
        if let Err(e) = exceptions::insert_exception(pool, &new_exception).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "failed to record stuck-agent exception");
        }

        if let Err(e) = agents::set_agent_status(pool, agent.id, AgentStatus::Failed).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "failed to mark stuck agent failed");
        }

        let coordinator = Coordinator::new(pool.clone());
        let _ = coordinator.release_all_locks(agent.id).await;

        if let Some(task_id) = agent.current_task_id {
            if let Some(task) = task_db::get_task(pool, task_id).await? {
                if !matches!(task.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
                    let _ = dispatch::fail_task(pool, task_id, task.status).await;
                }
            }
        }
    }

    Ok(())
}

/// For each failed task under its attempt ceiling, classify the most
/// recent verification failure and apply the retry policy table.
async fn schedule_retries(pool: &PgPool) -> anyhow::Result<()> {
    let failed_tasks = task_db::list_failed_tasks(pool).await?;

    for task in failed_tasks {
        if task.verification_attempts >= 3 {
            continue;
        }

        let latest = verification_results::latest_for_task(pool, task.id).await?;
        let failure_type = classify_failure(latest.as_ref());
        let policy = retry_policy_for(failure_type);

        let elapsed = Utc::now() - task.updated_at;
        let eligible_now = elapsed >= policy.delay;
        let under_attempt_ceiling = task.verification_attempts < policy.max_attempts;

        if policy.should_retry && eligible_now && under_attempt_ceiling {
            match dispatch::auto_retry_task(pool, task.id, true).await {
                Ok(()) => tracing::info!(task_id = %task.id, ?failure_type, "requeued failed task for retry"),
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "auto-retry failed"),
            }
        } else if policy.human_review {
            ensure_human_review_exception(pool, &task, failure_type).await;
        }
    }

    Ok(())
}

async fn ensure_human_review_exception(pool: &PgPool, task: &ember_db::models::Task, failure_type: FailureType) {
    let new_exception = NewException {
        exception_type: ExceptionType::TaskFailure,
        severity: Severity::Warning,
        title: format!("Task \"{}\" needs human review", task.title),
        description: format!(
            "Task {} failed and was classified as {failure_type:?}, which requires human review \
             before it can proceed further.",
            task.id
        ),
        suggested_action: Some("Review the task's verification history and decide whether to retry manually.".to_owned()),
        agent_id: task.assigned_agent_id,
        task_id: Some(task.id),
    };

    if let Err(e) = exceptions::insert_exception(pool, &new_exception).await {
        tracing::warn!(task_id = %task.id, error = %e, "failed to record human-review exception");
    }
}

async fn record_supervisor_exception(pool: &PgPool, message: &str) {
    let new_exception = NewException {
        exception_type: ExceptionType::Unknown,
        severity: Severity::Error,
        title: "Supervisor pass failed".to_owned(),
        description: message.to_owned(),
        suggested_action: None,
        agent_id: None,
        task_id: None,
    };
    if let Err(e) = exceptions::insert_exception(pool, &new_exception).await {
        tracing::error!(error = %e, "failed to record supervisor-failure exception");
    }
}
