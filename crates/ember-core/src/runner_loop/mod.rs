//! Agent Runner Loop (C4): drives one Task to completion as a sequence of
//! tool-using LLM turns, in-process, against the claiming Agent's working
//! directory.
//!
//! Shaped after the teacher's `lifecycle::run_agent_lifecycle` (create
//! workspace → assign → drive the agent → evaluate the outcome → finalize),
//! with the "spawn a harness subprocess and stream its events" step
//! replaced by an in-process conversation loop against an [`LlmProvider`].

pub mod tools;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ember_db::models::{
    Agent, AgentStatus, ExceptionType, LogType, Severity, Task, TaskStatus, VerificationResult,
};
use ember_db::queries::agent_logs::{self, NewAgentLog};
use ember_db::queries::agents;
use ember_db::queries::exceptions::{self, NewException};
use ember_db::queries::tasks as task_db;

use crate::coordinator::Coordinator;
use crate::llm::{ContentBlock, LlmError, LlmMessage, LlmProvider, LlmRole, StopReason};
use crate::state::dispatch;
use crate::verifier::Verifier;
use tools::{execute_tool, tool_specs, Tool, ToolOutcome};

/// Default cap on per-run iterations, absent an override.
pub const DEFAULT_MAX_ITERATIONS: usize = 50;
/// Wall budget for a single run, enforced at verification decision points.
pub const MAX_RUNNING_TIME: Duration = Duration::from_secs(30 * 60);
/// In-run verification retries before giving up; tracked only in the run's
/// in-memory state, reset every run, distinct from `Task.verification_attempts`.
const RETRY_COUNT_LIMIT: i32 = 3;
/// Per-`tool_result` echo cap.
const TOOL_RESULT_ECHO_BYTES: usize = 10 * 1024;

/// Tunable limits for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_iterations: usize,
    pub max_running_time: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_running_time: MAX_RUNNING_TIME,
        }
    }
}

/// Cooperative pause/stop signaling for a live run. Pause retains locks and
/// is resumable; stop releases locks and ends the run.
#[derive(Clone)]
pub struct RunControl {
    pub stop: CancellationToken,
    pub paused: Arc<AtomicBool>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            stop: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RunControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// How the run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { summary: String },
    Failed { reason: String },
    Stopped,
}

enum CompletionIntent {
    Complete(String),
    Failed(String),
}

/// Drive `task` to completion on `agent`, whose `working_dir` this run
/// reads and writes against.
pub async fn run_agent(
    pool: &PgPool,
    agent: &Agent,
    task: &Task,
    provider: &dyn LlmProvider,
    coordinator: &Coordinator,
    verifier: &Verifier,
    config: &RunConfig,
    control: &RunControl,
) -> Result<RunOutcome> {
    let working_dir = Path::new(&agent.working_dir);
    let start = Instant::now();
    let deadline = start + config.max_running_time;

    let system_prompt = build_system_prompt(task, agent);
    let tool_catalog = tool_specs();

    let mut history: Vec<LlmMessage> = Vec::new();
    let mut retry_count: i32 = 0;
    let mut iteration = 0usize;
    let mut was_paused = false;
    let mut exception_already_recorded = false;

    let outcome = loop {
        if control.stop.is_cancelled() {
            break RunOutcome::Stopped;
        }

        if control.paused.load(Ordering::SeqCst) {
            if !was_paused {
                let _ = agents::set_agent_status(pool, agent.id, AgentStatus::Paused).await;
                was_paused = true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        if was_paused {
            let _ = agents::set_agent_status(pool, agent.id, AgentStatus::Working).await;
            was_paused = false;
        }

        if iteration >= config.max_iterations {
            break RunOutcome::Failed {
                reason: format!("exceeded {} iterations without completing", config.max_iterations),
            };
        }
        if Instant::now() >= deadline {
            break RunOutcome::Failed {
                reason: "exceeded wall time budget".to_owned(),
            };
        }
        iteration += 1;

        // 1. heartbeat.
        let _ = agents::record_heartbeat(pool, agent.id, None).await;

        // 2. invoke the LLM, with the iteration-error retry policy.
        let turn = match next_turn(provider, deadline, &system_prompt, &history, &tool_catalog).await {
            Ok(turn) => turn,
            Err(e) => break RunOutcome::Failed { reason: format!("LLM call failed: {e}") },
        };

        // 3. walk content blocks.
        let mut tool_results = Vec::new();
        let mut saw_tool_call = false;
        let mut completion_intent: Option<CompletionIntent> = None;

        for block in &turn.content {
            match block {
                ContentBlock::Text { text } => {
                    log_entry(pool, agent.id, task.id, LogType::Thinking, text.clone()).await;
                }
                ContentBlock::ToolUse { id, name, input } => {
                    saw_tool_call = true;
                    log_entry(
                        pool,
                        agent.id,
                        task.id,
                        LogType::ToolCall,
                        serde_json::json!({"tool": name, "input": input}).to_string(),
                    )
                    .await;

                    let parsed = parse_tool(name, input);
                    let result = match &parsed {
                        Ok(tool) => execute_tool(tool, working_dir, coordinator, agent.id, task.id).await,
                        Err(e) => ToolOutcome {
                            is_error: true,
                            content: format!("invalid input for tool {name:?}: {e}"),
                        },
                    };

                    log_entry(
                        pool,
                        agent.id,
                        task.id,
                        if result.is_error { LogType::Error } else { LogType::ToolResult },
                        result.content.clone(),
                    )
                    .await;

                    let echoed = agent_logs::truncate_content(&result.content, TOOL_RESULT_ECHO_BYTES);
                    tool_results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: echoed,
                        is_error: result.is_error,
                    });

                    match parsed {
                        Ok(Tool::TaskComplete { summary }) => {
                            completion_intent = Some(CompletionIntent::Complete(summary));
                        }
                        Ok(Tool::TaskFailed { reason }) => {
                            completion_intent = Some(CompletionIntent::Failed(reason));
                        }
                        _ => {}
                    }
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        // 4. append assistant turn and any tool results.
        history.push(LlmMessage {
            role: LlmRole::Assistant,
            content: turn.content.clone(),
        });
        if !tool_results.is_empty() {
            history.push(LlmMessage {
                role: LlmRole::User,
                content: tool_results,
            });
        }

        // 5. nudge on a bare end-of-turn.
        if matches!(turn.stop_reason, StopReason::EndTurn) && !saw_tool_call {
            history.push(nudge_message());
        }

        // 6. persist token totals.
        let _ = agents::record_heartbeat(pool, agent.id, Some(turn.input_tokens + turn.output_tokens)).await;

        let Some(intent) = completion_intent else {
            continue;
        };

        match intent {
            CompletionIntent::Failed(reason) => break RunOutcome::Failed { reason },
            CompletionIntent::Complete(summary) => {
                if let Err(e) = commit_on_complete(working_dir, &summary) {
                    tracing::warn!(task_id = %task.id, error = %e, "failed to commit agent work (non-fatal)");
                }

                match verifier.run_and_record(task.id, working_dir, provider).await {
                    Ok(result) if result.passed => break RunOutcome::Completed { summary },
                    Ok(result) => {
                        if retry_count >= RETRY_COUNT_LIMIT {
                            record_exception(
                                pool,
                                ExceptionType::VerificationFailed,
                                Severity::Error,
                                task,
                                &format!("verification failed after {retry_count} in-run retries"),
                            )
                            .await;
                            exception_already_recorded = true;
                            break RunOutcome::Failed {
                                reason: "verification failed after max in-run retries".to_owned(),
                            };
                        }
                        if Instant::now() >= deadline {
                            record_exception(
                                pool,
                                ExceptionType::AgentStuck,
                                Severity::Error,
                                task,
                                "wall time exhausted while retrying verification",
                            )
                            .await;
                            exception_already_recorded = true;
                            break RunOutcome::Failed {
                                reason: "exceeded wall time budget during verification retries".to_owned(),
                            };
                        }
                        retry_count += 1;
                        tracing::info!(task_id = %task.id, retry_count, "verification failed, retrying");
                        history.push(feedback_message(&result));
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, error = %e, "verifier run failed");
                        break RunOutcome::Failed { reason: format!("verifier error: {e}") };
                    }
                }
            }
        }
    };

    finalize(pool, coordinator, agent, task, &outcome, exception_already_recorded).await?;
    Ok(outcome)
}

/// Release locks, settle the Task's final status if the loop (rather than
/// the Verifier) owns it, update the Agent, and record a fallback
/// exception if the failure wasn't already explained by one.
async fn finalize(
    pool: &PgPool,
    coordinator: &Coordinator,
    agent: &Agent,
    task: &Task,
    outcome: &RunOutcome,
    exception_already_recorded: bool,
) -> Result<()> {
    let _ = coordinator.release_all_locks(agent.id).await;

    match outcome {
        RunOutcome::Completed { .. } => {
            agents::finish_agent(pool, agent.id, AgentStatus::Idle, true)
                .await
                .context("failed to finalize agent on success")?;
        }
        RunOutcome::Stopped => {
            // A cooperative stop is not a failure of the task itself.
            agents::finish_agent(pool, agent.id, AgentStatus::Idle, true)
                .await
                .context("failed to finalize agent on stop")?;
        }
        RunOutcome::Failed { reason } => {
            if let Some(current) = task_db::get_task(pool, task.id).await? {
                if !matches!(current.status, TaskStatus::Completed | TaskStatus::Failed) {
                    let _ = dispatch::fail_task(pool, task.id, current.status).await;
                }
            }

            agents::finish_agent(pool, agent.id, AgentStatus::Failed, false)
                .await
                .context("failed to finalize agent on failure")?;

            if !exception_already_recorded {
                let exception_type = if reason.contains("iterations") || reason.contains("wall time") {
                    ExceptionType::AgentStuck
                } else {
                    ExceptionType::Unknown
                };
                record_exception(pool, exception_type, Severity::Error, task, reason).await;
            }
        }
    }

    Ok(())
}

/// Apply the LLM-call retry policy: generic errors get exponential backoff
/// up to 3 retries; rate limits sleep 60s and retry without limit inside
/// the wall budget; transient/connection-reset errors retry after 5s,
/// likewise bounded only by the wall budget.
async fn next_turn(
    provider: &dyn LlmProvider,
    deadline: Instant,
    system_prompt: &str,
    history: &[LlmMessage],
    tools: &[crate::llm::ToolSpec],
) -> Result<crate::llm::LlmTurn, LlmError> {
    let mut generic_attempts = 0u32;

    loop {
        match provider.complete(system_prompt, history, tools).await {
            Ok(turn) => return Ok(turn),
            Err(LlmError::RateLimited) => {
                if Instant::now() >= deadline {
                    return Err(LlmError::RateLimited);
                }
                tracing::warn!("rate limited by provider, sleeping 60s");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Err(LlmError::Transient(msg)) => {
                if Instant::now() >= deadline {
                    return Err(LlmError::Transient(msg));
                }
                tracing::warn!(error = %msg, "transient provider error, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Err(e @ LlmError::Other(_)) => {
                generic_attempts += 1;
                if generic_attempts > 3 {
                    return Err(e);
                }
                let backoff = Duration::from_secs(2u64.pow(generic_attempts));
                tracing::warn!(error = %e, attempt = generic_attempts, "provider error, backing off");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn parse_tool(name: &str, input: &Value) -> Result<Tool, serde_json::Error> {
    let merged = match input {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("tool".to_owned(), Value::String(name.to_owned()));
            Value::Object(map)
        }
        _ => serde_json::json!({ "tool": name }),
    };
    serde_json::from_value(merged)
}

fn build_system_prompt(task: &Task, agent: &Agent) -> String {
    format!(
        "You are an autonomous coding agent working a single task to completion.\n\n\
         Task: {}\n\
         Description: {}\n\
         Branch: {}\n\
         Working directory: {}\n\
         Files hint: {}\n\n\
         Use the available tools to make the necessary changes. Call task_complete with a \
         short summary once the change is done; you will see a verification report and may be \
         asked to fix issues and retry. Call task_failed with a reason if the task cannot be \
         completed.",
        task.title,
        task.description,
        agent.branch_name.as_deref().unwrap_or("(none)"),
        agent.working_dir,
        task.files_hint.join(", "),
    )
}

fn nudge_message() -> LlmMessage {
    LlmMessage {
        role: LlmRole::User,
        content: vec![ContentBlock::Text {
            text: "Continue working the task, or call task_complete/task_failed if you are done.".to_owned(),
        }],
    }
}

/// Build the detailed per-failure feedback message appended to history
/// after a failed verification retry.
fn feedback_message(result: &VerificationResult) -> LlmMessage {
    let mut lines = vec![format!(
        "Verification attempt {} failed (confidence {:.2}).",
        result.attempt_number, result.confidence_score
    )];
    lines.push(format!("syntax: {}", pass_label(result.syntax_passed)));
    lines.push(format!("types: {}", pass_label(result.types_passed)));
    lines.push(format!("lint: {}", pass_label(result.lint_passed)));
    lines.push(format!(
        "tests: {} ({} of {} failed)",
        pass_label(result.tests_passed),
        result.tests_failed,
        result.tests_total
    ));
    if let Some(score) = result.semantic_score {
        lines.push(format!("semantic score: {score:.2}"));
    }
    if let Some(explanation) = &result.semantic_explanation {
        lines.push(format!("semantic explanation: {explanation}"));
    }
    for failure in result.failures.iter() {
        let location = match (&failure.file, failure.line) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            (Some(file), None) => file.clone(),
            _ => "unknown location".to_owned(),
        };
        lines.push(format!("- [{}] {location}: {}", failure.check, failure.message));
    }
    for recommendation in result.recommendations.iter() {
        lines.push(format!("recommendation: {recommendation}"));
    }

    LlmMessage {
        role: LlmRole::User,
        content: vec![ContentBlock::Text { text: lines.join("\n") }],
    }
}

fn pass_label(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

/// Commit all working-tree changes if any exist, with a message derived
/// from the completion summary's first 100 characters.
fn commit_on_complete(working_dir: &Path, summary: &str) -> Result<bool> {
    use std::process::Command;

    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(working_dir)
        .output()
        .context("failed to run git status")?;

    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        return Ok(false);
    }

    let add = Command::new("git")
        .args(["add", "-A"])
        .current_dir(working_dir)
        .output()
        .context("failed to run git add -A")?;
    if !add.status.success() {
        anyhow::bail!("git add -A failed: {}", String::from_utf8_lossy(&add.stderr));
    }

    let message: String = summary.chars().take(100).collect::<String>().replace('"', "'");

    let commit = Command::new("git")
        .args(["commit", "-m", &message])
        .current_dir(working_dir)
        .output()
        .context("failed to run git commit")?;
    if !commit.status.success() {
        anyhow::bail!("git commit failed: {}", String::from_utf8_lossy(&commit.stderr));
    }

    Ok(true)
}

async fn record_exception(pool: &PgPool, exception_type: ExceptionType, severity: Severity, task: &Task, description: &str) {
    let new_exception = NewException {
        exception_type,
        severity,
        title: format!("Agent run for task \"{}\" did not complete", task.title),
        description: description.to_owned(),
        suggested_action: None,
        agent_id: task.assigned_agent_id,
        task_id: Some(task.id),
    };

    if let Err(e) = exceptions::insert_exception(pool, &new_exception).await {
        tracing::warn!(task_id = %task.id, error = %e, "failed to record exception");
    }
}

async fn log_entry(pool: &PgPool, agent_id: Uuid, task_id: Uuid, log_type: LogType, content: impl Into<String>) {
    let new_log = NewAgentLog {
        agent_id,
        task_id: Some(task_id),
        log_type,
        content: content.into(),
        metadata: serde_json::Value::Null,
    };

    if let Err(e) = agent_logs::insert_agent_log(pool, &new_log).await {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to persist agent log (best-effort)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_merges_name_into_tagged_input() {
        let input = serde_json::json!({"summary": "done"});
        let tool = parse_tool("task_complete", &input).unwrap();
        assert!(matches!(tool, Tool::TaskComplete { summary } if summary == "done"));
    }

    #[test]
    fn parse_tool_rejects_missing_required_field() {
        let input = serde_json::json!({});
        assert!(parse_tool("write_file", &input).is_err());
    }

    #[test]
    fn run_control_pause_resume_round_trips() {
        let control = RunControl::default();
        assert!(!control.paused.load(Ordering::SeqCst));
        control.pause();
        assert!(control.paused.load(Ordering::SeqCst));
        control.resume();
        assert!(!control.paused.load(Ordering::SeqCst));
    }

    #[test]
    fn run_control_stop_cancels_token() {
        let control = RunControl::default();
        assert!(!control.stop.is_cancelled());
        control.stop();
        assert!(control.stop.is_cancelled());
    }
}
