//! The semantic stage: asks the configured [`LlmProvider`] to judge whether
//! a task's diff plausibly satisfies its description, since no mechanical
//! check can.

use std::path::Path;

use ember_db::queries::agent_logs::truncate_content;

use crate::llm::{ContentBlock, LlmMessage, LlmProvider, LlmRole};
use crate::verifier::checks::CheckResult;

const DIFF_TRUNCATE_BYTES: usize = 10 * 1024;

/// The provider's verdict on whether a diff satisfies a task, either parsed
/// cleanly out of a JSON response or recovered from free text that didn't
/// parse.
#[derive(Debug, Clone)]
pub enum SemanticVerdict {
    Parsed { score: f64, explanation: String },
    Fallback { score: f64, raw_text: String },
}

impl SemanticVerdict {
    pub fn score(&self) -> f64 {
        match self {
            SemanticVerdict::Parsed { score, .. } => *score,
            SemanticVerdict::Fallback { score, .. } => *score,
        }
    }

    pub fn explanation(&self) -> String {
        match self {
            SemanticVerdict::Parsed { explanation, .. } => explanation.clone(),
            SemanticVerdict::Fallback { raw_text, .. } => raw_text.clone(),
        }
    }
}

/// Default score when the provider errors out entirely: neither a pass nor
/// an outright fail, so the mechanical stages still decide the outcome.
const DEFAULT_SCORE: f64 = 0.5;

/// Collect `git diff` against the working directory's last commit and ask
/// the provider to score it against the task description.
pub async fn judge(
    provider: &dyn LlmProvider,
    working_dir: &Path,
    task_title: &str,
    task_description: &str,
) -> SemanticVerdict {
    let diff = match git_diff(working_dir).await {
        Ok(diff) => diff,
        Err(e) => {
            tracing::warn!(error = %e, "failed to collect git diff for semantic review");
            return SemanticVerdict::Fallback {
                score: DEFAULT_SCORE,
                raw_text: format!("no diff available: {e}"),
            };
        }
    };

    let truncated = truncate_content(&diff, DIFF_TRUNCATE_BYTES);

    let system_prompt = "You judge whether a code change satisfies its task description. \
        Respond with strict JSON only, no prose outside the JSON object: \
        {\"score\": <0.0-1.0>, \"explanation\": \"<one paragraph>\"}.";

    let user_message = LlmMessage {
        role: LlmRole::User,
        content: vec![ContentBlock::Text {
            text: format!(
                "Task: {task_title}\n\nDescription:\n{task_description}\n\nDiff:\n{truncated}"
            ),
        }],
    };

    match provider.complete(system_prompt, std::slice::from_ref(&user_message), &[]).await {
        Ok(turn) => parse_verdict(&turn.content),
        Err(e) => {
            tracing::warn!(error = %e, "semantic review provider call failed");
            SemanticVerdict::Fallback {
                score: DEFAULT_SCORE,
                raw_text: format!("provider error: {e}"),
            }
        }
    }
}

fn parse_verdict(content: &[ContentBlock]) -> SemanticVerdict {
    let text: String = content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if let Some(verdict) = try_parse_json(&text) {
        return verdict;
    }

    SemanticVerdict::Fallback {
        score: extract_score_from_text(&text).unwrap_or(DEFAULT_SCORE),
        raw_text: text,
    }
}

fn try_parse_json(text: &str) -> Option<SemanticVerdict> {
    #[derive(serde::Deserialize)]
    struct Raw {
        score: f64,
        explanation: String,
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    let raw: Raw = serde_json::from_str(&text[start..=end]).ok()?;
    Some(SemanticVerdict::Parsed {
        score: raw.score.clamp(0.0, 1.0),
        explanation: raw.explanation,
    })
}

/// Last-resort regex-free scan for a bare decimal in `0.0`-`1.0` range,
/// for providers that ignore the JSON-only instruction.
fn extract_score_from_text(text: &str) -> Option<f64> {
    for token in text.split(|c: char| !c.is_ascii_digit() && c != '.') {
        if token.is_empty() {
            continue;
        }
        if let Ok(value) = token.parse::<f64>() {
            if (0.0..=1.0).contains(&value) {
                return Some(value);
            }
        }
    }
    None
}

async fn git_diff(working_dir: &Path) -> anyhow::Result<String> {
    let result: CheckResult = run_git_diff(working_dir).await?;
    Ok(result.stdout)
}

/// `git diff HEAD` in `working_dir`, captured the same way the cargo checks
/// capture their own child process's output.
async fn run_git_diff(working_dir: &Path) -> anyhow::Result<CheckResult> {
    use tokio::io::AsyncReadExt;
    use tokio::process::Command;

    let mut child = Command::new("git")
        .args(["diff", "HEAD"])
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let (status, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
    let status = status?;

    Ok(CheckResult {
        passed: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
        duration_ms: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let content = vec![ContentBlock::Text {
            text: r#"{"score": 0.9, "explanation": "looks correct"}"#.to_owned(),
        }];
        let verdict = parse_verdict(&content);
        assert_eq!(verdict.score(), 0.9);
        assert!(matches!(verdict, SemanticVerdict::Parsed { .. }));
    }

    #[test]
    fn parses_json_with_surrounding_prose() {
        let content = vec![ContentBlock::Text {
            text: "Sure, here's my verdict:\n{\"score\": 0.4, \"explanation\": \"partial\"}\nThanks."
                .to_owned(),
        }];
        let verdict = parse_verdict(&content);
        assert_eq!(verdict.score(), 0.4);
    }

    #[test]
    fn falls_back_to_default_score_on_unparseable_text() {
        let content = vec![ContentBlock::Text {
            text: "I cannot evaluate this.".to_owned(),
        }];
        let verdict = parse_verdict(&content);
        assert_eq!(verdict.score(), DEFAULT_SCORE);
        assert!(matches!(verdict, SemanticVerdict::Fallback { .. }));
    }

    #[test]
    fn falls_back_extracting_bare_number() {
        let content = vec![ContentBlock::Text {
            text: "I'd put this at roughly 0.75 confidence.".to_owned(),
        }];
        let verdict = parse_verdict(&content);
        assert_eq!(verdict.score(), 0.75);
    }
}
