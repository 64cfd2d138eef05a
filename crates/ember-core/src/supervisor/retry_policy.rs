//! Failure classification and the retry policy table driving the
//! Supervisor's failed-task rescheduling pass.

use chrono::Duration;

use ember_db::models::VerificationResult;

/// The classified cause of a task's most recent verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    SyntaxError,
    TypeError,
    LintError,
    TestFailure,
    SemanticError,
    Timeout,
    Unknown,
}

/// One row of the retry policy table.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub should_retry: bool,
    pub delay: Duration,
    pub max_attempts: i32,
    pub human_review: bool,
}

/// Classify a task's most recent verification result into a [`FailureType`]
/// by which per-check flag is false, falling back to a substring scan over
/// recorded failure messages, then [`FailureType::Unknown`] absent a result
/// at all (a task can fail outright without ever reaching verification).
pub fn classify_failure(result: Option<&VerificationResult>) -> FailureType {
    let Some(result) = result else {
        return FailureType::Unknown;
    };

    if !result.syntax_passed {
        return FailureType::SyntaxError;
    }
    if !result.types_passed {
        return FailureType::TypeError;
    }
    if !result.lint_passed {
        return FailureType::LintError;
    }
    if !result.tests_passed {
        return FailureType::TestFailure;
    }
    if result.semantic_score.is_some_and(|s| s < 0.7) {
        return FailureType::SemanticError;
    }

    for failure in result.failures.iter() {
        let message = failure.message.to_lowercase();
        if message.contains("timed out") || message.contains("timeout") {
            return FailureType::Timeout;
        }
    }

    FailureType::Unknown
}

/// The retry policy table from the Supervisor's spec, keyed by
/// [`FailureType`].
pub fn retry_policy_for(failure_type: FailureType) -> RetryPolicy {
    match failure_type {
        FailureType::SyntaxError => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(5),
            max_attempts: 3,
            human_review: false,
        },
        FailureType::TypeError => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(10),
            max_attempts: 3,
            human_review: false,
        },
        FailureType::LintError => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(5),
            max_attempts: 2,
            human_review: false,
        },
        FailureType::TestFailure => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(30),
            max_attempts: 2,
            human_review: true,
        },
        FailureType::SemanticError => RetryPolicy {
            should_retry: false,
            delay: Duration::zero(),
            max_attempts: 1,
            human_review: true,
        },
        FailureType::Timeout => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(60),
            max_attempts: 2,
            human_review: false,
        },
        FailureType::Unknown => RetryPolicy {
            should_retry: true,
            delay: Duration::seconds(30),
            max_attempts: 1,
            human_review: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_db::models::VerificationFailure;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn base_result() -> VerificationResult {
        VerificationResult {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            attempt_number: 1,
            passed: false,
            confidence_score: 0.0,
            syntax_passed: true,
            types_passed: true,
            lint_passed: true,
            tests_passed: true,
            tests_total: 0,
            tests_failed: 0,
            semantic_score: None,
            semantic_explanation: None,
            failures: Json(Vec::new()),
            recommendations: Json(Vec::new()),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_result_classifies_as_unknown() {
        assert_eq!(classify_failure(None), FailureType::Unknown);
    }

    #[test]
    fn syntax_failure_takes_precedence() {
        let mut result = base_result();
        result.syntax_passed = false;
        result.types_passed = false;
        assert_eq!(classify_failure(Some(&result)), FailureType::SyntaxError);
    }

    #[test]
    fn low_semantic_score_classifies_as_semantic_error() {
        let mut result = base_result();
        result.semantic_score = Some(0.3);
        assert_eq!(classify_failure(Some(&result)), FailureType::SemanticError);
    }

    #[test]
    fn timeout_message_is_detected_after_mechanical_checks_pass() {
        let mut result = base_result();
        result.semantic_score = Some(0.9);
        result.failures = Json(vec![VerificationFailure {
            check: "tests".to_owned(),
            message: "command timed out after 300s".to_owned(),
            file: None,
            line: None,
        }]);
        assert_eq!(classify_failure(Some(&result)), FailureType::Timeout);
    }

    #[test]
    fn semantic_error_policy_refuses_retry() {
        let policy = retry_policy_for(FailureType::SemanticError);
        assert!(!policy.should_retry);
        assert!(policy.human_review);
    }

    #[test]
    fn syntax_error_policy_allows_three_attempts() {
        let policy = retry_policy_for(FailureType::SyntaxError);
        assert!(policy.should_retry);
        assert_eq!(policy.max_attempts, 3);
        assert!(!policy.human_review);
    }
}
