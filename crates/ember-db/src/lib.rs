//! Typed Postgres access layer for the control plane (Store, C1).
//!
//! Exposes a connection pool, runtime migrations, and one query module per
//! entity in the data model. No component outside this crate constructs
//! SQL directly; callers see only typed rows and `anyhow::Result`.

pub mod config;
pub mod models;
pub mod pool;

pub mod queries {
    pub mod agent_logs;
    pub mod agents;
    pub mod exceptions;
    pub mod file_locks;
    pub mod runner_sessions;
    pub mod tasks;
    pub mod verification_results;
}
