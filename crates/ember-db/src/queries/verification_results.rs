//! Database query functions for the `verification_results` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{VerificationFailure, VerificationResult};

/// Parameters for inserting a new verification result row.
#[derive(Debug, Clone)]
pub struct NewVerificationResult {
    pub task_id: Uuid,
    pub attempt_number: i32,
    pub passed: bool,
    pub confidence_score: f64,
    pub syntax_passed: bool,
    pub types_passed: bool,
    pub lint_passed: bool,
    pub tests_passed: bool,
    pub tests_total: i32,
    pub tests_failed: i32,
    pub semantic_score: Option<f64>,
    pub semantic_explanation: Option<String>,
    pub failures: Vec<VerificationFailure>,
    pub recommendations: Vec<String>,
}

/// Append-only insert: a verification run always produces exactly one row.
pub async fn insert_verification_result(
    pool: &PgPool,
    new: &NewVerificationResult,
) -> Result<VerificationResult> {
    let row = sqlx::query_as::<_, VerificationResult>(
        "INSERT INTO verification_results \
            (task_id, attempt_number, passed, confidence_score, \
             syntax_passed, types_passed, lint_passed, tests_passed, \
             tests_total, tests_failed, semantic_score, semantic_explanation, \
             failures, recommendations) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         RETURNING *",
    )
    .bind(new.task_id)
    .bind(new.attempt_number)
    .bind(new.passed)
    .bind(new.confidence_score)
    .bind(new.syntax_passed)
    .bind(new.types_passed)
    .bind(new.lint_passed)
    .bind(new.tests_passed)
    .bind(new.tests_total)
    .bind(new.tests_failed)
    .bind(new.semantic_score)
    .bind(&new.semantic_explanation)
    .bind(Json(&new.failures))
    .bind(Json(&new.recommendations))
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert verification result for task {}", new.task_id))?;

    Ok(row)
}

/// List verification results for a task, most recent first, capped at `limit`.
pub async fn list_for_task(pool: &PgPool, task_id: Uuid, limit: i64) -> Result<Vec<VerificationResult>> {
    let rows = sqlx::query_as::<_, VerificationResult>(
        "SELECT * FROM verification_results \
         WHERE task_id = $1 \
         ORDER BY created_at DESC \
         LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list verification results for task {}", task_id))?;

    Ok(rows)
}

/// Fetch the most recent verification result for a task, if any.
pub async fn latest_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<VerificationResult>> {
    let row = sqlx::query_as::<_, VerificationResult>(
        "SELECT * FROM verification_results \
         WHERE task_id = $1 \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch latest verification result for task {}", task_id))?;

    Ok(row)
}
