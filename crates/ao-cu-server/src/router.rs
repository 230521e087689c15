//! HTTP router configuration.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{health_check, post_message, readiness_check};
use crate::state::AppState;

/// Build the application router.
///
/// Routes:
/// - `POST /message` - Accept a raw signed data item
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/message", post(post_message))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    use ao_cu_common::{CuConfig, CuError};
    use ao_cu_core::MemoryStore;
    use ao_cu_core::types::Message;
    use async_trait::async_trait;

    use crate::scheduler::{PostedMessage, ProcessInfo, SchedulerClient};

    /// Accepts every post and serves empty message logs, so the crank task
    /// completes without effect.
    struct AcceptingScheduler;

    #[async_trait]
    impl SchedulerClient for AcceptingScheduler {
        async fn post_message(&self, _raw: Vec<u8>) -> Result<PostedMessage, CuError> {
            Ok(PostedMessage {
                id: "tx-42".into(),
                process_id: "p-1".into(),
            })
        }

        async fn fetch_process(&self, process_id: &str) -> Result<ProcessInfo, CuError> {
            Ok(ProcessInfo {
                process_id: process_id.to_string(),
                module_id: "module-1".into(),
                owner: None,
                tags: Vec::new(),
                compute_limit: 1_000,
                memory_limit: 1_000,
            })
        }

        async fn fetch_messages(
            &self,
            _process_id: &str,
            _from: Option<&str>,
        ) -> Result<Vec<Message>, CuError> {
            Ok(Vec::new())
        }
    }

    async fn setup_router() -> Router {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CuConfig::default();
        config.wasm.binary_file_directory = dir.path().display().to_string();

        let state = AppState::new(
            &config,
            Arc::new(AcceptingScheduler),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();
        build_router(state, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_message_empty_body_is_rejected() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/message")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_message_accepted() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/message")
                    .body(Body::from("signed-data-item-bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Processing message");
        assert_eq!(json["id"], "tx-42");
    }
}
