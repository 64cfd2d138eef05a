//! Task Service façade: CRUD plus the run/retry/auto-retry lifecycle
//! operations, each a thin wrapper over `ember_core::state::dispatch`.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use ember_core::state::dispatch;
use ember_core::supervisor;
use ember_db::models::{AgentStatus, TaskStatus};
use ember_db::queries::{agents, runner_sessions, tasks, verification_results};

use crate::dto::{CreateTaskRequest, Envelope, PatchTaskRequest, TaskView};
use crate::error::AppError;
use crate::AppState;

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Envelope<Vec<TaskView>>>, AppError> {
    let tasks = tasks::list_tasks(&state.pool).await.map_err(AppError::internal)?;
    Ok(Json(Envelope::new(tasks)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(Envelope::new(task)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }

    let task = dispatch::queue_task(
        &state.pool,
        &req.title,
        &req.description,
        req.priority,
        req.risk_level,
        &req.files_hint,
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(Envelope::new(task)))
}

pub async fn patch_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchTaskRequest>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    let task = tasks::update_task_fields(
        &state.pool,
        id,
        req.title.as_deref(),
        req.description.as_deref(),
        req.priority,
        req.risk_level,
        req.files_hint.as_deref(),
    )
    .await
    .map_err(AppError::internal)?
    .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(Envelope::new(task)))
}

/// `POST /api/tasks/:id/run`: only valid from `queued` or `failed`. For a
/// queued task this has the same effect as a runner claim targeted at this
/// specific task rather than the next one in priority order; for a failed
/// task it is a retry.
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<crate::dto::RunTaskRequest>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    match task.status {
        TaskStatus::Failed => {
            dispatch::retry_task(&state.pool, id)
                .await
                .map_err(|e| AppError::conflict(e.to_string()))?;
        }
        TaskStatus::Queued => {
            let session = runner_sessions::get_active_by_token(&state.pool, &req.runner_token)
                .await
                .map_err(AppError::internal)?
                .ok_or_else(|| AppError::unauthenticated("invalid or inactive runner session"))?;

            let branch_name = format!("agent/{}", &id.to_string()[..8]);
            let agent = agents::insert_agent(
                &state.pool,
                &format!("runner-{}", session.name),
                session.id,
                &req.working_dir,
                id,
                &branch_name,
            )
            .await
            .map_err(AppError::internal)?;

            let won = dispatch::claim_task(&state.pool, id, agent.id, &branch_name)
                .await
                .map_err(AppError::internal)?;

            if !won {
                agents::finish_agent(&state.pool, agent.id, AgentStatus::Idle, false)
                    .await
                    .map_err(AppError::internal)?;
                return Err(AppError::conflict(format!("task {id} was claimed by another runner")));
            }
        }
        other => {
            return Err(AppError::conflict(format!(
                "task {id} cannot be run from status {other}"
            )));
        }
    }

    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(Envelope::new(task)))
}

pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    dispatch::retry_task(&state.pool, id)
        .await
        .map_err(|e| AppError::conflict(e.to_string()))?;

    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(Envelope::new(task)))
}

/// `POST /api/tasks/:id/auto-retry`: the Supervisor's own retry policy
/// (§4.7), applied on demand instead of waiting for the next periodic pass.
pub async fn auto_retry_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<TaskView>>, AppError> {
    let latest = verification_results::latest_for_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let failure_type = supervisor::classify_failure(latest.as_ref());
    let policy = supervisor::retry_policy_for(failure_type);

    dispatch::auto_retry_task(&state.pool, id, policy.should_retry)
        .await
        .map_err(|e| AppError::conflict(e.to_string()))?;

    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(Envelope::new(task)))
}
