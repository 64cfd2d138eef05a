//! Runner Protocol Service handlers: register/status/claim/heartbeat/logs/
//! complete. Runner identity is an opaque bearer token validated against
//! `runner_sessions` on every call; there is no shared secret to verify a
//! signature against, so "authentication" here means "resolve token to an
//! active session or reject."

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;

use ember_core::coordinator::Coordinator;
use ember_core::token::generate_session_token;
use ember_db::queries::{agent_logs, agents, runner_sessions, tasks};
use ember_db::models::{AgentLog, AgentStatus, RunnerSession, TaskStatus};

use crate::dto::{
    AckResponse, ClaimRequest, ClaimResponse, ClaimedAgentView, ClaimedTaskView, Envelope,
    HeartbeatRequest, HeartbeatResponse, LogsRequest, RegisterRequest, RegisterResponse,
    SessionView, StatusQuery, StatusResponse,
};
use crate::error::AppError;
use crate::AppState;

const MAX_CLAIM_ATTEMPTS: u32 = 5;

async fn authenticate(state: &AppState, token: &str) -> Result<RunnerSession, AppError> {
    let session = runner_sessions::get_active_by_token(&state.pool, token)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::unauthenticated("invalid or inactive runner session"))?;

    runner_sessions::touch(&state.pool, session.id)
        .await
        .map_err(AppError::internal)?;

    Ok(session)
}

/// `POST /api/runner/status` (register). A name that already belongs to an
/// inactive session is reactivated with a fresh token; a name that belongs
/// to a still-active session is refused, since handing out a new token for
/// an identity someone else currently holds would let a second caller
/// impersonate that runner.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Envelope<RegisterResponse>>, AppError> {
    let existing = runner_sessions::get_by_name(&state.pool, &req.name)
        .await
        .map_err(AppError::internal)?;

    let session = match existing {
        Some(session) if session.is_active => {
            return Err(AppError::conflict(format!(
                "runner session \"{}\" is already active",
                req.name
            )));
        }
        Some(session) => {
            let token = generate_session_token();
            runner_sessions::reactivate(&state.pool, session.id, &token, &req.working_dir)
                .await
                .map_err(AppError::internal)?
        }
        None => {
            let token = generate_session_token();
            runner_sessions::insert_session(&state.pool, &token, &req.name, &req.working_dir)
                .await
                .map_err(AppError::internal)?
        }
    };

    Ok(Json(Envelope::new(RegisterResponse {
        session: SessionView {
            id: session.id,
            token: session.token,
        },
    })))
}

/// `GET /api/runner/status`: how much work is available right now.
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Envelope<StatusResponse>>, AppError> {
    authenticate(&state, &query.runner_token).await?;

    let count = tasks::count_queued_tasks(&state.pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(Envelope::new(StatusResponse {
        available_tasks: crate::dto::AvailableTasks { count },
    })))
}

/// `POST /api/runner/claim`: claim the next queued task, lowest `priority`
/// first with `created_at` as the tiebreaker. Racing against other callers
/// for the same row is expected, so a lost claim just moves on to the next
/// candidate rather than failing outright.
pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<Envelope<ClaimResponse>>, AppError> {
    let session = authenticate(&state, &req.runner_token).await?;

    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let Some(task) = tasks::next_queued_task(&state.pool).await.map_err(AppError::internal)? else {
            return Ok(Json(Envelope::new(ClaimResponse { task: None, agent: None })));
        };

        let branch_name = format!("agent/{}", &task.id.to_string()[..8]);
        let agent = agents::insert_agent(
            &state.pool,
            &format!("runner-{}", session.name),
            session.id,
            &req.working_dir,
            task.id,
            &branch_name,
        )
        .await
        .map_err(AppError::internal)?;

        let won = ember_core::state::dispatch::claim_task(&state.pool, task.id, agent.id, &branch_name)
            .await
            .map_err(AppError::internal)?;

        if won {
            return Ok(Json(Envelope::new(ClaimResponse {
                task: Some(ClaimedTaskView {
                    id: task.id,
                    title: task.title,
                    description: task.description,
                    priority: task.priority,
                    risk_level: task.risk_level,
                    files_hint: task.files_hint,
                }),
                agent: Some(ClaimedAgentView {
                    id: agent.id,
                    branch_name: agent.branch_name,
                }),
            })));
        }

        // Lost the race: the agent row we just created never got a task, so
        // retire it immediately rather than leaving a phantom idle agent.
        agents::finish_agent(&state.pool, agent.id, AgentStatus::Idle, false)
            .await
            .map_err(AppError::internal)?;
    }

    Ok(Json(Envelope::new(ClaimResponse { task: None, agent: None })))
}

/// `POST /api/runner/heartbeat`.
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Envelope<HeartbeatResponse>>, AppError> {
    authenticate(&state, &req.runner_token).await?;

    let agent = agents::get_agent(&state.pool, req.agent_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("agent {} not found", req.agent_id)))?;

    if let Some(task_id) = req.task_id {
        if agent.current_task_id != Some(task_id) {
            return Err(AppError::ownership("agent is not assigned to this task"));
        }
    }

    agents::record_heartbeat(&state.pool, req.agent_id, req.tokens_used)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(Envelope::new(HeartbeatResponse {
        success: true,
        timestamp: Utc::now(),
    })))
}

/// `POST /api/runner/logs`: append a batch of log entries for one agent/task.
pub async fn logs(
    State(state): State<AppState>,
    Json(req): Json<LogsRequest>,
) -> Result<Json<Envelope<AckResponse>>, AppError> {
    authenticate(&state, &req.runner_token).await?;

    let agent = agents::get_agent(&state.pool, req.agent_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("agent {} not found", req.agent_id)))?;

    if agent.current_task_id != Some(req.task_id) {
        return Err(AppError::ownership("agent is not assigned to this task"));
    }

    for entry in req.logs {
        let new_log = agent_logs::NewAgentLog {
            agent_id: req.agent_id,
            task_id: Some(req.task_id),
            log_type: entry.log_type,
            content: entry.content,
            metadata: entry.metadata.unwrap_or(serde_json::Value::Null),
        };
        let _: AgentLog = agent_logs::insert_agent_log(&state.pool, &new_log)
            .await
            .map_err(AppError::internal)?;
    }

    Ok(Json(Envelope::new(AckResponse { success: true })))
}

/// `POST /api/runner/complete`: the runner reports its own task outcome
/// without asking the in-process Verifier to run again. Finalizes the
/// agent, releases its file locks, and drives the task's terminal
/// transition from whatever non-terminal state it is currently in.
pub async fn complete(
    State(state): State<AppState>,
    Json(req): Json<crate::dto::CompleteRequest>,
) -> Result<Json<Envelope<AckResponse>>, AppError> {
    authenticate(&state, &req.runner_token).await?;

    let agent = agents::get_agent(&state.pool, req.agent_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("agent {} not found", req.agent_id)))?;

    if agent.current_task_id != Some(req.task_id) {
        return Err(AppError::ownership("agent is not assigned to this task"));
    }

    let task = tasks::get_task(&state.pool, req.task_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {} not found", req.task_id)))?;

    let coordinator = Coordinator::new(state.pool.clone());
    coordinator
        .release_all_locks(req.agent_id)
        .await
        .map_err(AppError::internal)?;

    if req.success {
        ember_core::state::dispatch::complete_task(&state.pool, req.task_id)
            .await
            .map_err(AppError::internal)?;
    } else {
        let from = if task.status == TaskStatus::Verifying {
            TaskStatus::Verifying
        } else {
            TaskStatus::InProgress
        };
        ember_core::state::dispatch::fail_task(&state.pool, req.task_id, from)
            .await
            .map_err(AppError::internal)?;
    }

    agents::finish_agent(
        &state.pool,
        req.agent_id,
        if req.success { AgentStatus::Completed } else { AgentStatus::Failed },
        req.success,
    )
    .await
    .map_err(AppError::internal)?;

    if let Some(summary) = req.summary {
        let new_log = agent_logs::NewAgentLog {
            agent_id: req.agent_id,
            task_id: Some(req.task_id),
            log_type: ember_db::models::LogType::StatusChange,
            content: summary,
            metadata: serde_json::Value::Null,
        };
        agent_logs::insert_agent_log(&state.pool, &new_log)
            .await
            .map_err(AppError::internal)?;
    }
    if let Some(error) = req.error {
        let new_log = agent_logs::NewAgentLog {
            agent_id: req.agent_id,
            task_id: Some(req.task_id),
            log_type: ember_db::models::LogType::Error,
            content: error,
            metadata: serde_json::Value::Null,
        };
        agent_logs::insert_agent_log(&state.pool, &new_log)
            .await
            .map_err(AppError::internal)?;
    }

    Ok(Json(Envelope::new(AckResponse { success: true })))
}
