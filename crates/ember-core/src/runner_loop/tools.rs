//! The tool catalog the Agent Runner Loop exposes to the LLM, executed
//! in-process against a sandboxed `working_dir`.
//!
//! `write_file`/`edit_file` take a Coordinator lock on the normalized path
//! before touching disk; readers do not. `run_command` reuses the
//! subprocess-with-timeout shape the verifier's cargo checks use, plus a
//! static block list of destructive shell patterns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::coordinator::{normalize_path, Coordinator};

/// Default per-call timeout for `run_command` when the caller does not
/// specify one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// `search_code` never returns more than this many matches.
pub const MAX_SEARCH_MATCHES: usize = 100;
/// Cap on `run_command` output, in bytes, across stdout+stderr combined.
pub const MAX_COMMAND_OUTPUT_BYTES: usize = 5 * 1024 * 1024;

/// One call to the tool catalog, already parsed out of the LLM's
/// `tool_use` input.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Tool {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    EditFile { path: String, old_content: String, new_content: String },
    ListFiles { path: String, #[serde(default)] recursive: bool },
    SearchCode {
        pattern: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        file_pattern: Option<String>,
    },
    RunCommand { command: String, #[serde(default)] timeout_seconds: Option<u64> },
    TaskComplete { summary: String },
    TaskFailed { reason: String },
}

/// The result of executing one tool call: always succeeds at the Rust
/// level, carrying pass/fail as data so the LLM sees errors as tool
/// output rather than the loop crashing.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub is_error: bool,
    pub content: String,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self { is_error: false, content: content.into() }
    }

    fn err(content: impl Into<String>) -> Self {
        Self { is_error: true, content: content.into() }
    }
}

/// Resolve `path` against `working_dir`, rejecting escapes.
///
/// `working_dir` itself need not exist on disk at resolution time (a
/// `write_file` into a not-yet-created subdirectory is legal), so this
/// only lexically joins and normalizes rather than canonicalizing via the
/// filesystem.
fn sanitize_path(working_dir: &Path, path: &str) -> Result<PathBuf, String> {
    let joined = working_dir.join(path);
    let normalized = lexically_normalize(&joined);

    let base = lexically_normalize(working_dir);
    if !normalized.starts_with(&base) {
        return Err(format!("path {path:?} escapes the working directory"));
    }
    Ok(normalized)
}

fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Dangerous shell patterns rejected outright by `run_command`, matched as
/// case-sensitive substrings against the trimmed command.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -fr /",
    "rm -fr ~",
    "> /dev/sd",
    "> /dev/nvme",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
];

fn is_dangerous_command(command: &str) -> bool {
    let trimmed = command.trim();
    DANGEROUS_PATTERNS.iter().any(|pattern| trimmed.contains(pattern))
}

/// Execute a single tool call.
///
/// `agent_id`/`task_id` identify the caller for lock ownership; writes
/// acquire a Coordinator lock on the normalized target path first and do
/// not release it (the Agent Runner Loop releases all of an agent's locks
/// at termination, not per write).
pub async fn execute_tool(
    tool: &Tool,
    working_dir: &Path,
    coordinator: &Coordinator,
    agent_id: Uuid,
    task_id: Uuid,
) -> ToolOutcome {
    match tool {
        Tool::ReadFile { path } => read_file(working_dir, path).await,
        Tool::WriteFile { path, content } => {
            write_file(working_dir, coordinator, agent_id, task_id, path, content).await
        }
        Tool::EditFile { path, old_content, new_content } => {
            edit_file(working_dir, coordinator, agent_id, task_id, path, old_content, new_content).await
        }
        Tool::ListFiles { path, recursive } => list_files(working_dir, path, *recursive).await,
        Tool::SearchCode { pattern, path, file_pattern } => {
            search_code(working_dir, pattern, path.as_deref(), file_pattern.as_deref()).await
        }
        Tool::RunCommand { command, timeout_seconds } => {
            run_command(working_dir, command, *timeout_seconds).await
        }
        Tool::TaskComplete { summary } => ToolOutcome::ok(format!("task marked complete: {summary}")),
        Tool::TaskFailed { reason } => ToolOutcome::ok(format!("task marked failed: {reason}")),
    }
}

async fn read_file(working_dir: &Path, path: &str) -> ToolOutcome {
    let resolved = match sanitize_path(working_dir, path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };
    match tokio::fs::read_to_string(&resolved).await {
        Ok(content) => ToolOutcome::ok(content),
        Err(e) => ToolOutcome::err(format!("failed to read {path}: {e}")),
    }
}

async fn write_file(
    working_dir: &Path,
    coordinator: &Coordinator,
    agent_id: Uuid,
    task_id: Uuid,
    path: &str,
    content: &str,
) -> ToolOutcome {
    let resolved = match sanitize_path(working_dir, path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    if !coordinator.acquire_lock(agent_id, task_id, &normalize_path(path), None).await {
        return ToolOutcome::err(format!("could not acquire a lock on {path}"));
    }

    if let Some(parent) = resolved.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolOutcome::err(format!("failed to create parent directories for {path}: {e}"));
        }
    }

    match tokio::fs::write(&resolved, content).await {
        Ok(()) => ToolOutcome::ok(format!("wrote {} bytes to {path}", content.len())),
        Err(e) => ToolOutcome::err(format!("failed to write {path}: {e}")),
    }
}

async fn edit_file(
    working_dir: &Path,
    coordinator: &Coordinator,
    agent_id: Uuid,
    task_id: Uuid,
    path: &str,
    old_content: &str,
    new_content: &str,
) -> ToolOutcome {
    let resolved = match sanitize_path(working_dir, path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    if !coordinator.acquire_lock(agent_id, task_id, &normalize_path(path), None).await {
        return ToolOutcome::err(format!("could not acquire a lock on {path}"));
    }

    let current = match tokio::fs::read_to_string(&resolved).await {
        Ok(s) => s,
        Err(e) => return ToolOutcome::err(format!("failed to read {path}: {e}")),
    };

    let occurrences = current.matches(old_content).count();
    if occurrences == 0 {
        return ToolOutcome::err(format!("old_content not found in {path}"));
    }
    if occurrences > 1 {
        return ToolOutcome::err(format!(
            "old_content occurs {occurrences} times in {path}; must match exactly once"
        ));
    }

    let updated = current.replacen(old_content, new_content, 1);
    match tokio::fs::write(&resolved, updated).await {
        Ok(()) => ToolOutcome::ok(format!("edited {path}")),
        Err(e) => ToolOutcome::err(format!("failed to write {path}: {e}")),
    }
}

async fn list_files(working_dir: &Path, path: &str, recursive: bool) -> ToolOutcome {
    let resolved = match sanitize_path(working_dir, path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    let mut entries = Vec::new();
    if recursive {
        collect_recursive(&resolved, &resolved, &mut entries);
    } else {
        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutcome::err(format!("failed to list {path}: {e}")),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
    }

    ToolOutcome::ok(entries.join("\n"))
}

fn collect_recursive(base: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    let mut children: Vec<_> = read_dir.flatten().collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let entry_path = entry.path();
        if is_excluded(&entry_path) {
            continue;
        }
        if let Ok(relative) = entry_path.strip_prefix(base) {
            out.push(relative.to_string_lossy().into_owned());
        }
        if entry_path.is_dir() {
            collect_recursive(base, &entry_path, out);
        }
    }
}

const EXCLUDED_DIR_NAMES: &[&str] = &[".git", "target", "node_modules", ".cargo"];

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| EXCLUDED_DIR_NAMES.contains(&n))
}

async fn search_code(
    working_dir: &Path,
    pattern: &str,
    path: Option<&str>,
    file_pattern: Option<&str>,
) -> ToolOutcome {
    let search_root = match sanitize_path(working_dir, path.unwrap_or(".")) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    let mut matches = Vec::new();
    walk_for_search(&search_root, pattern, file_pattern, &mut matches);

    let truncated = matches.len() > MAX_SEARCH_MATCHES;
    matches.truncate(MAX_SEARCH_MATCHES);

    let mut output = matches.join("\n");
    if truncated {
        output.push_str(&format!("\n...[truncated at {MAX_SEARCH_MATCHES} matches]"));
    }
    ToolOutcome::ok(output)
}

fn walk_for_search(dir: &Path, pattern: &str, file_pattern: Option<&str>, out: &mut Vec<String>) {
    if out.len() >= MAX_SEARCH_MATCHES {
        return;
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    let mut children: Vec<_> = read_dir.flatten().collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        if out.len() >= MAX_SEARCH_MATCHES {
            return;
        }
        let entry_path = entry.path();
        if is_excluded(&entry_path) {
            continue;
        }
        if entry_path.is_dir() {
            walk_for_search(&entry_path, pattern, file_pattern, out);
            continue;
        }
        if let Some(glob) = file_pattern {
            if !glob_matches(glob, &entry_path) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&entry_path) else { continue };
        for (line_no, line) in content.lines().enumerate() {
            if line.contains(pattern) {
                out.push(format!("{}:{}: {}", entry_path.display(), line_no + 1, line.trim()));
                if out.len() >= MAX_SEARCH_MATCHES {
                    break;
                }
            }
        }
    }
}

/// A minimal `*.ext` glob matcher; `file_pattern` is only ever used this way
/// by the loop's system prompt guidance.
fn glob_matches(glob: &str, path: &Path) -> bool {
    let Some(suffix) = glob.strip_prefix('*') else {
        return path.file_name().and_then(|n| n.to_str()) == Some(glob);
    };
    path.to_string_lossy().ends_with(suffix)
}

async fn run_command(working_dir: &Path, command: &str, timeout_seconds: Option<u64>) -> ToolOutcome {
    if is_dangerous_command(command) {
        return ToolOutcome::err("command rejected: matches a blocked destructive pattern");
    }

    let timeout = timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT);

    use tokio::io::AsyncReadExt;
    use tokio::process::Command as TokioCommand;

    let spawn_result = TokioCommand::new("sh")
        .args(["-c", command])
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn();

    let mut child = match spawn_result {
        Ok(c) => c,
        Err(e) => return ToolOutcome::err(format!("failed to spawn command: {e}")),
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.take(MAX_COMMAND_OUTPUT_BYTES as u64).read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.take(MAX_COMMAND_OUTPUT_BYTES as u64).read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(timeout, async {
        tokio::join!(child.wait(), read_stdout, read_stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => {
            let combined = format!("{stdout}{stderr}");
            if status.success() {
                ToolOutcome::ok(combined)
            } else {
                ToolOutcome::err(format!("exit code {:?}\n{combined}", status.code()))
            }
        }
        Ok((Err(e), _, _)) => ToolOutcome::err(format!("failed to wait on command: {e}")),
        Err(_) => {
            let _ = child.kill().await;
            ToolOutcome::err(format!("command timed out after {}s", timeout.as_secs()))
        }
    }
}

/// A tool's JSON-schema specs for the completion's `tools` parameter,
/// listed in catalog order.
pub fn tool_specs() -> Vec<crate::llm::ToolSpec> {
    use crate::llm::ToolSpec;

    fn spec(name: &str, description: &str, schema: Value) -> ToolSpec {
        ToolSpec { name: name.to_owned(), description: description.to_owned(), input_schema: schema }
    }

    vec![
        spec(
            "read_file",
            "Read the contents of a file.",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        ),
        spec(
            "write_file",
            "Create or overwrite a file with the given content.",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
        ),
        spec(
            "edit_file",
            "Replace a single exact occurrence of old_content with new_content in a file.",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "old_content": {"type": "string"}, "new_content": {"type": "string"}}, "required": ["path", "old_content", "new_content"]}),
        ),
        spec(
            "list_files",
            "List files in a directory, optionally recursively.",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "recursive": {"type": "boolean"}}, "required": ["path"]}),
        ),
        spec(
            "search_code",
            "Search for a literal pattern across files, optionally scoped to a path or file glob.",
            serde_json::json!({"type": "object", "properties": {"pattern": {"type": "string"}, "path": {"type": "string"}, "file_pattern": {"type": "string"}}, "required": ["pattern"]}),
        ),
        spec(
            "run_command",
            "Run a shell command in the working directory.",
            serde_json::json!({"type": "object", "properties": {"command": {"type": "string"}, "timeout_seconds": {"type": "integer"}}, "required": ["command"]}),
        ),
        spec(
            "task_complete",
            "Declare the task complete with a one-paragraph summary.",
            serde_json::json!({"type": "object", "properties": {"summary": {"type": "string"}}, "required": ["summary"]}),
        ),
        spec(
            "task_failed",
            "Declare the task unfixable with a reason.",
            serde_json::json!({"type": "object", "properties": {"reason": {"type": "string"}}, "required": ["reason"]}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_parent_dir_escape() {
        let working_dir = Path::new("/workspace/task-1");
        assert!(sanitize_path(working_dir, "../../etc/passwd").is_err());
    }

    #[test]
    fn sanitize_accepts_relative_subpath() {
        let working_dir = Path::new("/workspace/task-1");
        let resolved = sanitize_path(working_dir, "src/main.rs").unwrap();
        assert_eq!(resolved, Path::new("/workspace/task-1/src/main.rs"));
    }

    #[test]
    fn sanitize_rejects_absolute_escape() {
        let working_dir = Path::new("/workspace/task-1");
        // Joining an absolute path onto another path replaces it entirely on
        // Unix, which is exactly the escape this check exists to catch.
        assert!(sanitize_path(working_dir, "/etc/passwd").is_err());
    }

    #[test]
    fn dangerous_patterns_are_blocked() {
        assert!(is_dangerous_command("rm -rf /"));
        assert!(is_dangerous_command("sudo rm -rf ~"));
        assert!(is_dangerous_command("dd if=/dev/zero of=/dev/sda"));
        assert!(is_dangerous_command(":(){ :|:& };:"));
    }

    #[test]
    fn ordinary_commands_are_not_blocked() {
        assert!(!is_dangerous_command("cargo test"));
        assert!(!is_dangerous_command("rm -rf target"));
    }

    #[test]
    fn glob_matches_suffix() {
        assert!(glob_matches("*.rs", Path::new("/a/b/main.rs")));
        assert!(!glob_matches("*.rs", Path::new("/a/b/main.py")));
    }
}
