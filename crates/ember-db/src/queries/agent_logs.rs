//! Database query functions for the `agent_logs` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AgentLog, LogType};

/// Truncate `s` to at most `max_bytes`, preserving UTF-8 character
/// boundaries, appending `"...[truncated]"` when truncation occurred.
pub fn truncate_content(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}

/// AgentLog content is capped at 50 KB per the wire contract.
pub const MAX_LOG_CONTENT_BYTES: usize = 50 * 1024;

/// Parameters for inserting a new agent log row.
#[derive(Debug, Clone)]
pub struct NewAgentLog {
    pub agent_id: Uuid,
    pub task_id: Option<Uuid>,
    pub log_type: LogType,
    pub content: String,
    pub metadata: Value,
}

/// Insert a new agent log row, truncating `content` to the 50 KB cap.
/// Returns the inserted row with server-assigned `id`/`created_at`.
pub async fn insert_agent_log(pool: &PgPool, new: &NewAgentLog) -> Result<AgentLog> {
    let content = truncate_content(&new.content, MAX_LOG_CONTENT_BYTES);

    let log = sqlx::query_as::<_, AgentLog>(
        "INSERT INTO agent_logs (agent_id, task_id, log_type, content, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.agent_id)
    .bind(new.task_id)
    .bind(new.log_type)
    .bind(content)
    .bind(&new.metadata)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert agent log for agent {}", new.agent_id))?;

    Ok(log)
}

/// List all logs for an agent in server-assigned `created_at` order.
pub async fn list_logs_for_agent(pool: &PgPool, agent_id: Uuid) -> Result<Vec<AgentLog>> {
    let logs = sqlx::query_as::<_, AgentLog>(
        "SELECT * FROM agent_logs WHERE agent_id = $1 ORDER BY created_at ASC",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list agent logs for agent {}", agent_id))?;

    Ok(logs)
}

/// List all logs for a task across every agent that has worked it.
pub async fn list_logs_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<AgentLog>> {
    let logs = sqlx::query_as::<_, AgentLog>(
        "SELECT * FROM agent_logs WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list agent logs for task {}", task_id))?;

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_untouched() {
        assert_eq!(truncate_content("hello", 50), "hello");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "a".repeat(10) + "é" + &"b".repeat(10);
        let truncated = truncate_content(&s, 11);
        assert!(truncated.starts_with(&"a".repeat(10)));
        assert!(truncated.ends_with("...[truncated]"));
    }
}
