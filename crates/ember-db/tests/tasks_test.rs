//! Integration tests for the `tasks` query module and its conditional
//! claim/transition primitives.

use ember_db::models::{RiskLevel, TaskStatus};
use ember_db::queries::tasks;
use ember_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn insert_and_fetch_task() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(
        &pool,
        "Add README",
        "write a project README",
        2,
        RiskLevel::Low,
        &[],
    )
    .await
    .expect("insert should succeed");

    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.verification_attempts, 0);
    assert_eq!(task.retry_count, 0);
    assert!(task.assigned_agent_id.is_none());

    let fetched = tasks::get_task(&pool, task.id)
        .await
        .expect("fetch should succeed")
        .expect("task should exist");
    assert_eq!(fetched.id, task.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn next_queued_task_orders_by_priority_then_created_at() {
    let (pool, db_name) = create_test_db().await;

    let low_priority = tasks::insert_task(&pool, "low", "d", 3, RiskLevel::Low, &[])
        .await
        .unwrap();
    let high_priority = tasks::insert_task(&pool, "high", "d", 0, RiskLevel::Low, &[])
        .await
        .unwrap();

    let next = tasks::next_queued_task(&pool)
        .await
        .unwrap()
        .expect("should find a queued task");
    assert_eq!(next.id, high_priority.id);
    assert_ne!(next.id, low_priority.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_task_is_exclusive() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "t", "d", 1, RiskLevel::Low, &[])
        .await
        .unwrap();

    let agent_id = uuid::Uuid::new_v4();
    let rows = tasks::claim_task(&pool, task.id, agent_id, "agent/abc")
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // A second claim against the same (now non-queued) task loses the race.
    let second_agent = uuid::Uuid::new_v4();
    let rows = tasks::claim_task(&pool, task.id, second_agent, "agent/def")
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::InProgress);
    assert_eq!(refreshed.assigned_agent_id, Some(agent_id));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn increment_verification_attempts_is_monotonic() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "t", "d", 1, RiskLevel::Low, &[])
        .await
        .unwrap();

    let first = tasks::increment_verification_attempts(&pool, task.id)
        .await
        .unwrap();
    let second = tasks::increment_verification_attempts(&pool, task.id)
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 2);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_resets_to_queued_and_increments_retry_count() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "t", "d", 1, RiskLevel::Low, &[])
        .await
        .unwrap();
    let agent_id = uuid::Uuid::new_v4();
    tasks::claim_task(&pool, task.id, agent_id, "agent/abc")
        .await
        .unwrap();
    tasks::transition_task_status(
        &pool,
        task.id,
        TaskStatus::InProgress,
        TaskStatus::Failed,
        None,
        Some(chrono::Utc::now()),
    )
    .await
    .unwrap();

    let rows = tasks::retry_task(&pool, task.id, TaskStatus::Failed)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::Queued);
    assert_eq!(refreshed.retry_count, 1);
    assert!(refreshed.assigned_agent_id.is_none());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_only_succeeds_from_cancellable_states() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "t", "d", 1, RiskLevel::Low, &[])
        .await
        .unwrap();

    let rows = tasks::cancel_task(&pool, task.id, TaskStatus::Queued)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // Already cancelled: a second cancel from `queued` loses the race.
    let rows = tasks::cancel_task(&pool, task.id, TaskStatus::Queued)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    drop_test_db(&db_name).await;
}
