//! Row types and wire enums for the control-plane data model.
//!
//! Every enum stored in Postgres is mapped as `text` and round-trips
//! through a hand-written `Display`/`FromStr` pair rather than relying on
//! `sqlx`'s derive alone, so that parse failures carry a useful message.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskStatusParseError(String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "in_progress" => Ok(TaskStatus::InProgress),
            "verifying" => Ok(TaskStatus::Verifying),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct RiskLevelParseError(String);

impl fmt::Display for RiskLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid risk level: {:?}", self.0)
    }
}

impl std::error::Error for RiskLevelParseError {}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for RiskLevel {
    type Err = RiskLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(RiskLevelParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// VerificationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Passed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct VerificationStatusParseError(String);

impl fmt::Display for VerificationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid verification status: {:?}", self.0)
    }
}

impl std::error::Error for VerificationStatusParseError {}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Passed => "passed",
            VerificationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for VerificationStatus {
    type Err = VerificationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "passed" => Ok(VerificationStatus::Passed),
            "failed" => Ok(VerificationStatus::Failed),
            other => Err(VerificationStatusParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Paused,
    Failed,
    Stuck,
    Completed,
}

#[derive(Debug, Clone)]
pub struct AgentStatusParseError(String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent status: {:?}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Paused => "paused",
            AgentStatus::Failed => "failed",
            AgentStatus::Stuck => "stuck",
            AgentStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "paused" => Ok(AgentStatus::Paused),
            "failed" => Ok(AgentStatus::Failed),
            "stuck" => Ok(AgentStatus::Stuck),
            "completed" => Ok(AgentStatus::Completed),
            other => Err(AgentStatusParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExceptionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    AgentCrash,
    AgentStuck,
    TaskFailure,
    VerificationFailed,
    FileConflict,
    ResourceLimit,
    ApiError,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ExceptionTypeParseError(String);

impl fmt::Display for ExceptionTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid exception type: {:?}", self.0)
    }
}

impl std::error::Error for ExceptionTypeParseError {}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExceptionType::AgentCrash => "agent_crash",
            ExceptionType::AgentStuck => "agent_stuck",
            ExceptionType::TaskFailure => "task_failure",
            ExceptionType::VerificationFailed => "verification_failed",
            ExceptionType::FileConflict => "file_conflict",
            ExceptionType::ResourceLimit => "resource_limit",
            ExceptionType::ApiError => "api_error",
            ExceptionType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ExceptionType {
    type Err = ExceptionTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent_crash" => Ok(ExceptionType::AgentCrash),
            "agent_stuck" => Ok(ExceptionType::AgentStuck),
            "task_failure" => Ok(ExceptionType::TaskFailure),
            "verification_failed" => Ok(ExceptionType::VerificationFailed),
            "file_conflict" => Ok(ExceptionType::FileConflict),
            "resource_limit" => Ok(ExceptionType::ResourceLimit),
            "api_error" => Ok(ExceptionType::ApiError),
            "unknown" => Ok(ExceptionType::Unknown),
            other => Err(ExceptionTypeParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SeverityParseError(String);

impl fmt::Display for SeverityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid severity: {:?}", self.0)
    }
}

impl std::error::Error for SeverityParseError {}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(SeverityParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExceptionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone)]
pub struct ExceptionStatusParseError(String);

impl fmt::Display for ExceptionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid exception status: {:?}", self.0)
    }
}

impl std::error::Error for ExceptionStatusParseError {}

impl fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExceptionStatus::Open => "open",
            ExceptionStatus::Acknowledged => "acknowledged",
            ExceptionStatus::Resolved => "resolved",
            ExceptionStatus::Dismissed => "dismissed",
        };
        f.write_str(s)
    }
}

impl FromStr for ExceptionStatus {
    type Err = ExceptionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ExceptionStatus::Open),
            "acknowledged" => Ok(ExceptionStatus::Acknowledged),
            "resolved" => Ok(ExceptionStatus::Resolved),
            "dismissed" => Ok(ExceptionStatus::Dismissed),
            other => Err(ExceptionStatusParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// LogType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Thinking,
    ToolCall,
    ToolResult,
    Error,
    Info,
    StatusChange,
}

#[derive(Debug, Clone)]
pub struct LogTypeParseError(String);

impl fmt::Display for LogTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log type: {:?}", self.0)
    }
}

impl std::error::Error for LogTypeParseError {}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogType::Thinking => "thinking",
            LogType::ToolCall => "tool_call",
            LogType::ToolResult => "tool_result",
            LogType::Error => "error",
            LogType::Info => "info",
            LogType::StatusChange => "status_change",
        };
        f.write_str(s)
    }
}

impl FromStr for LogType {
    type Err = LogTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thinking" => Ok(LogType::Thinking),
            "tool_call" => Ok(LogType::ToolCall),
            "tool_result" => Ok(LogType::ToolResult),
            "error" => Ok(LogType::Error),
            "info" => Ok(LogType::Info),
            "status_change" => Ok(LogType::StatusChange),
            other => Err(LogTypeParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureType (Supervisor retry-policy classification; not persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    SyntaxError,
    TypeError,
    LintError,
    TestFailure,
    SemanticError,
    Timeout,
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureType::SyntaxError => "syntax_error",
            FailureType::TypeError => "type_error",
            FailureType::LintError => "lint_error",
            FailureType::TestFailure => "test_failure",
            FailureType::SemanticError => "semantic_error",
            FailureType::Timeout => "timeout",
            FailureType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub risk_level: RiskLevel,
    pub files_hint: Vec<String>,
    pub assigned_agent_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub verification_status: Option<VerificationStatus>,
    pub verification_attempts: i32,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub runner_session_id: Uuid,
    pub working_dir: String,
    pub total_tokens_used: i64,
    pub tasks_completed: i32,
    pub tasks_failed: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSession {
    pub id: Uuid,
    pub token: String,
    pub name: String,
    pub working_dir: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub id: Uuid,
    pub file_path: String,
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One `{check, message, file?, line?}` entry in a [`VerificationResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationFailure {
    pub check: String,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub id: Uuid,
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
    pub failures: sqlx::types::Json<Vec<VerificationFailure>>,
    pub recommendations: sqlx::types::Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub id: Uuid,
    pub exception_type: ExceptionType,
    pub severity: Severity,
    pub status: ExceptionStatus,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub agent_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AgentLog {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Option<Uuid>,
    pub log_type: LogType,
    pub content: String,
    pub metadata: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_roundtrips() {
        for s in [
            TaskStatus::Queued,
            TaskStatus::InProgress,
            TaskStatus::Verifying,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn task_status_rejects_invalid() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn agent_status_roundtrips() {
        for s in [
            AgentStatus::Idle,
            AgentStatus::Working,
            AgentStatus::Paused,
            AgentStatus::Failed,
            AgentStatus::Stuck,
            AgentStatus::Completed,
        ] {
            let parsed: AgentStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn exception_type_roundtrips() {
        for s in [
            ExceptionType::AgentCrash,
            ExceptionType::AgentStuck,
            ExceptionType::TaskFailure,
            ExceptionType::VerificationFailed,
            ExceptionType::FileConflict,
            ExceptionType::ResourceLimit,
            ExceptionType::ApiError,
            ExceptionType::Unknown,
        ] {
            let parsed: ExceptionType = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn log_type_roundtrips() {
        for s in [
            LogType::Thinking,
            LogType::ToolCall,
            LogType::ToolResult,
            LogType::Error,
            LogType::Info,
            LogType::StatusChange,
        ] {
            let parsed: LogType = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn risk_level_rejects_invalid() {
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn severity_roundtrips() {
        for s in [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ] {
            let parsed: Severity = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
