//! `LlmProvider`: the external chat/tool-calling boundary the Agent Runner
//! Loop and the Verifier's semantic stage drive turns against.
//!
//! Object-safe by the same discipline as this crate's former harness-process
//! adapter trait: every method returns a concrete or boxed type, so
//! `Box<dyn LlmProvider>` can be stored and passed around freely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message in a conversation, either from the user/system side or the
/// assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

/// A single content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

/// The declared shape of one tool in the catalog, passed to the provider so
/// it can offer tool calls matching this schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// One completion turn returned by the provider.
#[derive(Debug, Clone)]
pub struct LlmTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Errors a provider call can fail with; the Agent Runner Loop's retry
/// helper matches on these to pick a backoff strategy.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,
    #[error("transient connection error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Other(String),
}

/// The external LLM boundary.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable identifier (e.g. the model name), used in logs.
    fn name(&self) -> &str;

    /// Request one completion turn given the full conversation history and
    /// the tool catalog available to the assistant.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[LlmMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmTurn, LlmError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn LlmProvider) {}
};

/// Concrete provider backed by an HTTP chat/tool-calling endpoint.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a [LlmMessage],
    tools: &'a [ToolSpec],
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
    stop_reason: String,
    usage: UsageResponse,
}

#[derive(Deserialize)]
struct UsageResponse {
    input_tokens: i64,
    output_tokens: i64,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[LlmMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmTurn, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            system: system_prompt,
            messages: history,
            tools,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Other(format!("status {status}: {body}")));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Other(format!("failed to parse response: {e}")))?;

        let stop_reason = match parsed.stop_reason.as_str() {
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        Ok(LlmTurn {
            content: parsed.content,
            stop_reason,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() || err.is_connect() {
        LlmError::Transient(err.to_string())
    } else {
        LlmError::Other(err.to_string())
    }
}

/// A provider double that returns a fixed turn, for tests.
pub struct NoopProvider {
    pub turn: LlmTurn,
}

#[async_trait]
impl LlmProvider for NoopProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[LlmMessage],
        _tools: &[ToolSpec],
    ) -> Result<LlmTurn, LlmError> {
        Ok(self.turn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_provider_is_object_safe() {
        let provider: Box<dyn LlmProvider> = Box::new(NoopProvider {
            turn: LlmTurn {
                content: vec![ContentBlock::Text { text: "hi".into() }],
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
            },
        });
        assert_eq!(provider.name(), "noop");
    }

    #[tokio::test]
    async fn noop_provider_returns_fixed_turn() {
        let provider = NoopProvider {
            turn: LlmTurn {
                content: vec![ContentBlock::Text { text: "done".into() }],
                stop_reason: StopReason::EndTurn,
                input_tokens: 10,
                output_tokens: 5,
            },
        };

        let turn = provider.complete("system", &[], &[]).await.unwrap();
        assert_eq!(turn.input_tokens, 10);
        assert!(matches!(turn.stop_reason, StopReason::EndTurn));
    }
}
