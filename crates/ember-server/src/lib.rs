//! HTTP façade (Runner Protocol Service + Task Service + Verifier façade),
//! grounded on the teacher's `serve_cmd` router/handler/`AppError` shape:
//! a state-carrying `Router`, JSON envelopes, and status codes derived
//! from a shared error taxonomy rather than scattered per-handler matches.

pub mod dto;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use ember_core::llm::LlmProvider;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub provider: Arc<dyn LlmProvider>,
}

pub fn build_router(pool: PgPool, provider: Arc<dyn LlmProvider>) -> Router {
    let state = AppState { pool, provider };

    Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/runner/status",
            post(handlers::runner::register).get(handlers::runner::status),
        )
        .route("/api/runner/claim", post(handlers::runner::claim))
        .route("/api/runner/heartbeat", post(handlers::runner::heartbeat))
        .route("/api/runner/logs", post(handlers::runner::logs))
        .route("/api/runner/complete", post(handlers::runner::complete))
        .route(
            "/api/tasks",
            get(handlers::tasks::list_tasks).post(handlers::tasks::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(handlers::tasks::get_task).patch(handlers::tasks::patch_task),
        )
        .route("/api/tasks/{id}/run", post(handlers::tasks::run_task))
        .route("/api/tasks/{id}/retry", post(handlers::tasks::retry_task))
        .route("/api/tasks/{id}/auto-retry", post(handlers::tasks::auto_retry_task))
        .route("/api/verify", post(handlers::verify::verify))
        .route("/api/verify/{id}", get(handlers::verify::list_results))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_serve(
    pool: PgPool,
    provider: Arc<dyn LlmProvider>,
    bind: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(pool, provider);
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;

    tracing::info!("ember serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    tracing::info!("ember serve shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use ember_core::llm::{LlmTurn, NoopProvider, StopReason};
    use ember_test_utils::{create_test_db, drop_test_db};

    use super::*;

    fn noop_provider() -> Arc<dyn LlmProvider> {
        Arc::new(NoopProvider {
            turn: LlmTurn {
                content: Vec::new(),
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
            },
        })
    }

    async fn send_json(pool: PgPool, method: &str, uri: &str, body: serde_json::Value) -> axum::response::Response {
        let app = build_router(pool, noop_provider());
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn send_request(pool: PgPool, method: &str, uri: &str) -> axum::response::Response {
        let app = build_router(pool, noop_provider());
        app.oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/api/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn register_then_reregister_active_session_conflicts() {
        let (pool, db_name) = create_test_db().await;

        let body = serde_json::json!({ "name": "runner-1", "workingDir": "/work" });
        let resp = send_json(pool.clone(), "POST", "/api/runner/status", body.clone()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["data"]["session"]["token"].as_str().is_some());

        let resp = send_json(pool.clone(), "POST", "/api/runner/status", body).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn status_rejects_unknown_token() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/api/runner/status?runnerToken=bogus").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_and_list_tasks_round_trips() {
        let (pool, db_name) = create_test_db().await;

        let body = serde_json::json!({
            "title": "fix the thing",
            "description": "there is a bug",
            "priority": 3,
            "riskLevel": "medium",
            "filesHint": ["src/lib.rs"],
        });
        let resp = send_json(pool.clone(), "POST", "/api/tasks", body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        assert_eq!(created["data"]["title"], "fix the thing");

        let resp = send_request(pool.clone(), "GET", "/api/tasks").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let listed = body_json(resp).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_missing_task_is_404() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", &format!("/api/tasks/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn claim_with_no_queued_tasks_returns_null_task() {
        let (pool, db_name) = create_test_db().await;

        let register = serde_json::json!({ "name": "runner-2", "workingDir": "/work" });
        let resp = send_json(pool.clone(), "POST", "/api/runner/status", register).await;
        let registered = body_json(resp).await;
        let token = registered["data"]["session"]["token"].as_str().unwrap().to_owned();

        let claim = serde_json::json!({ "runnerToken": token, "workingDir": "/work" });
        let resp = send_json(pool.clone(), "POST", "/api/runner/claim", claim).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let claimed = body_json(resp).await;
        assert!(claimed["data"]["task"].is_null());

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
