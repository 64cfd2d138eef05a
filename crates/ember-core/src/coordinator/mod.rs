//! Coordinator (C2): grants and releases expiring exclusive locks on
//! normalized file paths, mediating concurrent write access between agents.
//!
//! `file_locks(file_path)`'s unique index is the linearization point for
//! acquisition; a lost race surfaces as a Postgres unique-violation, which
//! this module treats as "someone else got there first" rather than an
//! error to propagate.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ember_db::queries::file_locks;

/// Default lock duration when the caller does not specify one.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::hours(1);

/// Outcome of an all-or-nothing multi-path lock acquisition.
#[derive(Debug, Clone)]
pub struct AcquireLocksResult {
    pub acquired: Vec<String>,
    pub failed: Vec<String>,
}

/// Grants/releases expiring exclusive locks on file paths.
pub struct Coordinator {
    pool: PgPool,
}

impl Coordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Acquire an exclusive lock on `file_path` for `agent_id`/`task_id`.
    ///
    /// Idempotent: re-acquiring a lock you already hold returns `true`
    /// without creating a second row. An expired lock on the path is
    /// reclaimed transparently. Any transient Store error is treated as
    /// non-acquisition (the caller is expected to retry).
    pub async fn acquire_lock(
        &self,
        agent_id: Uuid,
        task_id: Uuid,
        file_path: &str,
        duration: Option<Duration>,
    ) -> bool {
        let normalized = normalize_path(file_path);
        let expires_at = Utc::now() + duration.unwrap_or(DEFAULT_LOCK_DURATION);

        // Bounded retry: one reclaim-expired-and-retry cycle is enough in
        // practice (another reclaimer winning the same race twice in a row
        // would indicate sustained contention, not a logic bug here).
        for _ in 0..2 {
            match file_locks::get_by_path(&self.pool, &normalized).await {
                Ok(Some(existing)) => {
                    if existing.agent_id == agent_id {
                        return true;
                    }
                    if existing.expires_at < Utc::now() {
                        if let Err(e) = file_locks::delete_by_id(&self.pool, existing.id).await {
                            tracing::warn!(file_path = %normalized, error = %e, "failed to reclaim expired lock");
                            return false;
                        }
                        continue;
                    }
                    return false;
                }
                Ok(None) => {
                    match file_locks::insert_lock(&self.pool, &normalized, agent_id, task_id, expires_at)
                        .await
                    {
                        Ok(_) => return true,
                        Err(e) if file_locks::is_unique_violation(&e) => return false,
                        Err(e) => {
                            tracing::warn!(file_path = %normalized, error = %e, "transient error acquiring lock");
                            return false;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(file_path = %normalized, error = %e, "transient error reading lock");
                    return false;
                }
            }
        }

        false
    }

    /// Acquire locks on every path, all-or-nothing: on any failure, release
    /// every lock this call acquired and return the full path list as
    /// `failed`.
    pub async fn acquire_locks(
        &self,
        agent_id: Uuid,
        task_id: Uuid,
        paths: &[String],
    ) -> AcquireLocksResult {
        let mut acquired = Vec::with_capacity(paths.len());

        for path in paths {
            if self.acquire_lock(agent_id, task_id, path, None).await {
                acquired.push(path.clone());
            } else {
                for held in &acquired {
                    self.release_lock(agent_id, held).await;
                }
                return AcquireLocksResult {
                    acquired: Vec::new(),
                    failed: paths.to_vec(),
                };
            }
        }

        AcquireLocksResult {
            acquired,
            failed: Vec::new(),
        }
    }

    /// Release a single lock. No-op if `agent_id` does not own it.
    pub async fn release_lock(&self, agent_id: Uuid, file_path: &str) {
        let normalized = normalize_path(file_path);
        if let Err(e) = file_locks::release(&self.pool, &normalized, agent_id).await {
            tracing::warn!(file_path = %normalized, error = %e, "failed to release lock");
        }
    }

    /// Release every lock owned by `agent_id`.
    pub async fn release_all_locks(&self, agent_id: Uuid) -> anyhow::Result<u64> {
        file_locks::release_all(&self.pool, agent_id).await
    }

    /// Bulk-delete every expired lock, returning the count removed.
    pub async fn cleanup_expired_locks(&self) -> anyhow::Result<u64> {
        file_locks::cleanup_expired(&self.pool).await
    }

    /// True iff an unexpired lock on `file_path` exists and is not owned by
    /// `exclude_agent_id`.
    pub async fn is_file_locked(&self, file_path: &str, exclude_agent_id: Option<Uuid>) -> bool {
        let normalized = normalize_path(file_path);
        match file_locks::get_by_path(&self.pool, &normalized).await {
            Ok(Some(lock)) => {
                lock.expires_at > Utc::now() && Some(lock.agent_id) != exclude_agent_id
            }
            _ => false,
        }
    }
}

/// Normalize a file path for use as a lock key: forward slashes, collapsed
/// repeated separators, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let mut collapsed = String::with_capacity(forward.len());
    let mut prev_was_slash = false;
    for c in forward.chars() {
        if c == '/' {
            if prev_was_slash {
                continue;
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_repeated_slashes() {
        assert_eq!(normalize_path("a//b///c"), "a/b/c");
    }

    #[test]
    fn normalize_converts_backslashes() {
        assert_eq!(normalize_path("a\\b\\c"), "a/b/c");
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_path("a/b/"), "a/b");
    }

    #[test]
    fn normalize_keeps_root_slash() {
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_path("a//b\\c/");
        let twice = normalize_path(&once);
        assert_eq!(once, twice);
    }
}
