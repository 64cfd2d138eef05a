//! Integration tests for the `file_locks` unique-path invariant.

use chrono::{Duration, Utc};

use ember_db::models::RiskLevel;
use ember_db::queries::{agents, file_locks, runner_sessions, tasks};
use ember_test_utils::{create_test_db, drop_test_db};

async fn seed_agent(pool: &sqlx::PgPool) -> (uuid::Uuid, uuid::Uuid) {
    let task = tasks::insert_task(pool, "t", "d", 1, RiskLevel::Low, &[])
        .await
        .unwrap();
    let session = runner_sessions::insert_session(pool, "tok", "runner-1", "/work")
        .await
        .unwrap();
    let agent = agents::insert_agent(pool, "agent-1", session.id, "/work", task.id, "agent/abc")
        .await
        .unwrap();
    (agent.id, task.id)
}

#[tokio::test]
async fn second_insert_on_same_path_is_a_unique_violation() {
    let (pool, db_name) = create_test_db().await;
    let (agent_id, task_id) = seed_agent(&pool).await;

    let expires = Utc::now() + Duration::hours(1);
    file_locks::insert_lock(&pool, "src/main.rs", agent_id, task_id, expires)
        .await
        .expect("first insert should succeed");

    let err = file_locks::insert_lock(&pool, "src/main.rs", agent_id, task_id, expires)
        .await
        .expect_err("second insert on the same path should fail");
    assert!(file_locks::is_unique_violation(&err));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn release_is_scoped_to_owner() {
    let (pool, db_name) = create_test_db().await;
    let (agent_id, task_id) = seed_agent(&pool).await;
    let other_agent = uuid::Uuid::new_v4();

    let expires = Utc::now() + Duration::hours(1);
    file_locks::insert_lock(&pool, "src/lib.rs", agent_id, task_id, expires)
        .await
        .unwrap();

    let rows = file_locks::release(&pool, "src/lib.rs", other_agent)
        .await
        .unwrap();
    assert_eq!(rows, 0, "release by a non-owner must be a no-op");

    let rows = file_locks::release(&pool, "src/lib.rs", agent_id).await.unwrap();
    assert_eq!(rows, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cleanup_expired_removes_only_expired_rows() {
    let (pool, db_name) = create_test_db().await;
    let (agent_id, task_id) = seed_agent(&pool).await;

    let expired = Utc::now() - Duration::seconds(1);
    let active = Utc::now() + Duration::hours(1);
    file_locks::insert_lock(&pool, "expired.rs", agent_id, task_id, expired)
        .await
        .unwrap();
    file_locks::insert_lock(&pool, "active.rs", agent_id, task_id, active)
        .await
        .unwrap();

    let removed = file_locks::cleanup_expired(&pool).await.unwrap();
    assert_eq!(removed, 1);

    assert!(file_locks::get_by_path(&pool, "expired.rs").await.unwrap().is_none());
    assert!(file_locks::get_by_path(&pool, "active.rs").await.unwrap().is_some());

    drop_test_db(&db_name).await;
}
