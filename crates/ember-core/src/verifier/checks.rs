//! Runs a single cargo subcommand as a child process and captures its
//! outcome, the way the invariant runner captures an arbitrary command's.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Outcome of one `cargo <subcommand>` invocation.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

const CHECK_TIMEOUT: Duration = Duration::from_secs(300);

/// Run `cargo <args>` in `working_dir`, capturing stdout/stderr concurrently
/// with waiting on the child so a full pipe buffer cannot deadlock the wait.
/// A timeout kills the child and is reported as a failed, non-erroring run.
pub async fn run_cargo(args: &[&str], working_dir: &Path) -> Result<CheckResult> {
    let start = Instant::now();

    let mut child = Command::new("cargo")
        .args(args)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute cargo {}", args.join(" ")))?;

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

    match tokio::time::timeout(CHECK_TIMEOUT, async {
        tokio::join!(child.wait(), read_stdout, read_stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => {
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            Ok(CheckResult {
                passed: status.success(),
                exit_code: status.code(),
                stdout,
                stderr,
                duration_ms,
            })
        }
        Ok((Err(e), _, _)) => {
            Err(e).with_context(|| format!("failed to wait on cargo {}", args.join(" ")))
        }
        Err(_) => {
            let _ = child.kill().await;
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            Ok(CheckResult {
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!("cargo {} timed out after {}s", args.join(" "), CHECK_TIMEOUT.as_secs()),
                duration_ms,
            })
        }
    }
}

/// Parse the failed-test count out of `cargo test`'s summary line
/// (`test result: FAILED. 3 passed; 2 failed; ...`), returning
/// `(total, failed)`. Falls back to `(0, 0)` if no summary line is found,
/// which callers treat as "no tests exist".
pub fn parse_test_summary(stdout: &str) -> (i32, i32) {
    let mut total = 0;
    let mut failed = 0;
    let mut saw_summary = false;

    for line in stdout.lines() {
        let Some(rest) = line.trim_start().strip_prefix("test result:") else {
            continue;
        };
        saw_summary = true;
        let passed = extract_count(rest, "passed");
        let this_failed = extract_count(rest, "failed");
        total += passed + this_failed;
        failed += this_failed;
    }

    if !saw_summary {
        return (0, 0);
    }
    (total, failed)
}

fn extract_count(summary: &str, label: &str) -> i32 {
    for part in summary.split(';') {
        let part = part.trim();
        if let Some(count_str) = part.strip_suffix(label) {
            if let Ok(n) = count_str.trim().parse::<i32>() {
                return n;
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_passed_summary() {
        let stdout = "running 3 tests\n...\ntest result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n";
        assert_eq!(parse_test_summary(stdout), (3, 0));
    }

    #[test]
    fn parses_some_failed_summary() {
        let stdout = "test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out\n";
        assert_eq!(parse_test_summary(stdout), (3, 1));
    }

    #[test]
    fn sums_multiple_binaries() {
        let stdout = "test result: ok. 2 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n\
                      test result: ok. 1 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n";
        assert_eq!(parse_test_summary(stdout), (3, 0));
    }

    #[test]
    fn no_summary_line_means_no_tests() {
        assert_eq!(parse_test_summary("warning: unused variable\n"), (0, 0));
    }
}
