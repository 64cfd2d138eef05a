//! Verifier façade: run the check pipeline on demand and list recorded
//! results for a task.

use std::path::Path as FsPath;

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use ember_core::verifier::Verifier;
use ember_db::queries::verification_results;

use crate::dto::{Envelope, VerificationResultView, VerifyRequest, VerifyResultsQuery};
use crate::error::AppError;
use crate::AppState;

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<Envelope<VerificationResultView>>, AppError> {
    let verifier = Verifier::new(state.pool.clone());

    let result = verifier
        .run_and_record(req.task_id, FsPath::new(&req.working_dir), state.provider.as_ref())
        .await
        .map_err(AppError::internal)?;

    Ok(Json(Envelope::new(result)))
}

pub async fn list_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VerifyResultsQuery>,
) -> Result<Json<Envelope<Vec<VerificationResultView>>>, AppError> {
    let results = verification_results::list_for_task(&state.pool, id, query.limit)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(Envelope::new(results)))
}
