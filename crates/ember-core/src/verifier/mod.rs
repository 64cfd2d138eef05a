//! Verifier (C3): runs the five-stage check pipeline against a task's
//! working directory and records exactly one [`VerificationResult`] per run.
//!
//! Stages run in strict order (syntax, types, lint, tests, semantic) and
//! short-circuit before the semantic stage on the first mechanical failure,
//! since there is no point asking a model to judge a diff that does not even
//! compile. The semantic stage always runs when reached, regardless of its
//! own score, because `confidenceScore` needs its contribution either way.

pub mod checks;
pub mod semantic;

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use ember_db::models::{ExceptionType, Severity, Task, TaskStatus, VerificationResult, VerificationStatus};
use ember_db::queries::exceptions::{self, NewException};
use ember_db::queries::tasks as task_db;
use ember_db::queries::verification_results::{self, NewVerificationResult};

use crate::llm::LlmProvider;
use crate::state::dispatch;
use checks::{parse_test_summary, run_cargo, CheckResult};
use semantic::SemanticVerdict;

/// A task fails verification for good (rather than being retried) once its
/// attempt count reaches this many.
pub const MAX_VERIFICATION_ATTEMPTS: i32 = 3;

/// `confidenceScore` is the weighted sum of each stage's contribution; a
/// task passes only if every mechanical stage passed and the semantic score
/// clears this bar.
const SEMANTIC_PASS_THRESHOLD: f64 = 0.7;

const WEIGHT_SYNTAX: f64 = 0.2;
const WEIGHT_TYPES: f64 = 0.2;
const WEIGHT_LINT: f64 = 0.1;
const WEIGHT_TESTS: f64 = 0.3;
const WEIGHT_SEMANTIC: f64 = 0.2;

/// Runs verification checks and persists their outcome.
pub struct Verifier {
    pool: PgPool,
}

impl Verifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the full pipeline for `task_id` against `working_dir`, record the
    /// result, and drive the task's state transition.
    ///
    /// Increments `verification_attempts` atomically before running any
    /// check, so a crash mid-run still counts as an attempt and a task
    /// cannot be verified an unbounded number of times by retrying after a
    /// crash.
    pub async fn run_and_record(
        &self,
        task_id: Uuid,
        working_dir: &Path,
        provider: &dyn LlmProvider,
    ) -> Result<VerificationResult> {
        let attempt = task_db::increment_verification_attempts(&self.pool, task_id)
            .await
            .with_context(|| format!("failed to increment verification attempts for task {task_id}"))?;

        let task = task_db::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        let outcome = run_pipeline(working_dir, &task, provider).await;

        let new_result = NewVerificationResult {
            task_id,
            attempt_number: attempt,
            passed: outcome.passed,
            confidence_score: outcome.confidence_score,
            syntax_passed: outcome.syntax.passed,
            types_passed: outcome.types.passed,
            lint_passed: outcome.lint.passed,
            tests_passed: outcome.tests_passed,
            tests_total: outcome.tests_total,
            tests_failed: outcome.tests_failed,
            semantic_score: outcome.semantic.as_ref().map(SemanticVerdict::score),
            semantic_explanation: outcome.semantic.as_ref().map(SemanticVerdict::explanation),
            failures: outcome.failures,
            recommendations: outcome.recommendations,
        };

        let result = verification_results::insert_verification_result(&self.pool, &new_result)
            .await
            .with_context(|| format!("failed to record verification result for task {task_id}"))?;

        let verification_status = if outcome.passed {
            VerificationStatus::Passed
        } else {
            VerificationStatus::Failed
        };
        task_db::set_verification_status(&self.pool, task_id, verification_status).await?;

        if outcome.passed {
            dispatch::complete_task(&self.pool, task_id).await?;
        } else {
            dispatch::fail_task(&self.pool, task_id, TaskStatus::Verifying).await?;

            if attempt >= MAX_VERIFICATION_ATTEMPTS {
                self.record_verification_exception(&task, attempt).await?;
            }
        }

        Ok(result)
    }

    async fn record_verification_exception(&self, task: &Task, attempt: i32) -> Result<()> {
        let new_exception = NewException {
            exception_type: ExceptionType::VerificationFailed,
            severity: Severity::Warning,
            title: format!("Task \"{}\" failed verification after {attempt} attempts", task.title),
            description: format!(
                "Task {} exhausted its verification attempts ({attempt}/{MAX_VERIFICATION_ATTEMPTS}) \
                 without producing a passing result.",
                task.id
            ),
            suggested_action: Some("Review the task's verification results and consider manual intervention.".to_owned()),
            agent_id: task.assigned_agent_id,
            task_id: Some(task.id),
        };

        exceptions::insert_exception(&self.pool, &new_exception)
            .await
            .with_context(|| format!("failed to record verification-exhausted exception for task {}", task.id))?;

        Ok(())
    }
}

/// The outcome of running every stage, before it is turned into a
/// [`NewVerificationResult`].
struct PipelineOutcome {
    syntax: CheckResult,
    types: CheckResult,
    lint: CheckResult,
    tests_passed: bool,
    tests_total: i32,
    tests_failed: i32,
    semantic: Option<SemanticVerdict>,
    confidence_score: f64,
    passed: bool,
    failures: Vec<ember_db::models::VerificationFailure>,
    recommendations: Vec<String>,
}

async fn run_pipeline(working_dir: &Path, task: &Task, provider: &dyn LlmProvider) -> PipelineOutcome {
    let mut failures = Vec::new();
    let mut recommendations = Vec::new();

    let syntax = run_stage("syntax", &["check", "--message-format=short"], working_dir, &mut failures).await;
    let types = if syntax.passed {
        run_stage("types", &["build", "--message-format=short"], working_dir, &mut failures).await
    } else {
        recommendations.push("fix the syntax errors before rerunning type checks".to_owned());
        skipped_result()
    };
    let lint = if types.passed {
        run_stage("lint", &["clippy", "--message-format=short"], working_dir, &mut failures).await
    } else {
        skipped_result()
    };

    let (tests_passed, tests_total, tests_failed) = if lint.passed {
        let test_run = run_cargo(&["test"], working_dir).await;
        match test_run {
            Ok(result) => {
                let (total, failed) = parse_test_summary(&result.stdout);
                if !result.passed && failed == 0 {
                    // Nonzero exit with no parseable summary means the test
                    // binary itself failed to build or run.
                    failures.push(ember_db::models::VerificationFailure {
                        check: "tests".to_owned(),
                        message: truncate_for_failure(&result.stderr),
                        file: None,
                        line: None,
                    });
                    (false, total, failed)
                } else {
                    if failed > 0 {
                        failures.push(ember_db::models::VerificationFailure {
                            check: "tests".to_owned(),
                            message: format!("{failed} of {total} tests failed"),
                            file: None,
                            line: None,
                        });
                    }
                    (failed == 0, total, failed)
                }
            }
            Err(e) => {
                failures.push(ember_db::models::VerificationFailure {
                    check: "tests".to_owned(),
                    message: format!("failed to run cargo test: {e}"),
                    file: None,
                    line: None,
                });
                (false, 0, 0)
            }
        }
    } else {
        (false, 0, 0)
    };

    let semantic = if lint.passed {
        Some(semantic::judge(provider, working_dir, &task.title, &task.description).await)
    } else {
        None
    };

    let test_rate = if tests_total == 0 {
        1.0
    } else {
        (tests_total - tests_failed) as f64 / tests_total as f64
    };

    let semantic_score = semantic.as_ref().map(SemanticVerdict::score);

    let confidence_score = WEIGHT_SYNTAX * bool_weight(syntax.passed)
        + WEIGHT_TYPES * bool_weight(types.passed)
        + WEIGHT_LINT * bool_weight(lint.passed)
        + WEIGHT_TESTS * test_rate
        + WEIGHT_SEMANTIC * semantic_score.unwrap_or(0.0);

    let passed = syntax.passed
        && types.passed
        && lint.passed
        && tests_passed
        && semantic_score.is_some_and(|s| s >= SEMANTIC_PASS_THRESHOLD);

    if !passed && semantic_score.is_some_and(|s| s < SEMANTIC_PASS_THRESHOLD) {
        recommendations.push("the change does not appear to satisfy the task description".to_owned());
    }

    PipelineOutcome {
        syntax,
        types,
        lint,
        tests_passed,
        tests_total,
        tests_failed,
        semantic,
        confidence_score,
        passed,
        failures,
        recommendations,
    }
}

fn bool_weight(passed: bool) -> f64 {
    if passed {
        1.0
    } else {
        0.0
    }
}

fn skipped_result() -> CheckResult {
    CheckResult {
        passed: false,
        exit_code: None,
        stdout: String::new(),
        stderr: "skipped: prior stage failed".to_owned(),
        duration_ms: 0,
    }
}

async fn run_stage(
    name: &str,
    args: &[&str],
    working_dir: &Path,
    failures: &mut Vec<ember_db::models::VerificationFailure>,
) -> CheckResult {
    match run_cargo(args, working_dir).await {
        Ok(result) => {
            if !result.passed {
                failures.push(ember_db::models::VerificationFailure {
                    check: name.to_owned(),
                    message: truncate_for_failure(&result.stderr),
                    file: None,
                    line: None,
                });
            }
            result
        }
        Err(e) => {
            failures.push(ember_db::models::VerificationFailure {
                check: name.to_owned(),
                message: format!("failed to run cargo {}: {e}", args.join(" ")),
                file: None,
                line: None,
            });
            CheckResult {
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            }
        }
    }
}

fn truncate_for_failure(s: &str) -> String {
    ember_db::queries::agent_logs::truncate_content(s, 2048)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_score_weights_sum_to_one() {
        assert_eq!(WEIGHT_SYNTAX + WEIGHT_TYPES + WEIGHT_LINT + WEIGHT_TESTS + WEIGHT_SEMANTIC, 1.0);
    }

    #[test]
    fn all_stages_passing_with_perfect_semantic_score_is_one() {
        let score = WEIGHT_SYNTAX * bool_weight(true)
            + WEIGHT_TYPES * bool_weight(true)
            + WEIGHT_LINT * bool_weight(true)
            + WEIGHT_TESTS * 1.0
            + WEIGHT_SEMANTIC * 1.0;
        assert_eq!(score, 1.0);
    }

    #[test]
    fn no_tests_contributes_full_test_weight() {
        let test_rate = 1.0_f64;
        assert_eq!(WEIGHT_TESTS * test_rate, WEIGHT_TESTS);
    }

    #[test]
    fn partial_test_failure_scales_linearly() {
        let test_rate = (10 - 3) as f64 / 10.0;
        assert_eq!(test_rate, 0.7);
    }
}
