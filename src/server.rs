//! HTTP transport
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /health` | `{"status":"healthy"}` |
//! | `POST /api/generate` | `{"generatedCode", "success":true}` or `{"error", "success":false}` |
//! | `GET /api/metrics` | Per-operation timing summaries in seconds |
//! | `DELETE /api/cache` | `{"success":true}` |
//!
//! Bad input answers 400, execution failures 500.

use crate::error::{ErrorCategory, KilnError, KilnResult};
use crate::request::GenerateResponse;
use crate::service::GenerationService;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for handlers
#[derive(Clone)]
struct ServerState {
    service: Arc<GenerationService>,
    /// Fired on shutdown; in-flight generations are cancelled with it
    shutdown: CancellationToken,
}

/// Build the router for a service
pub fn router(service: Arc<GenerationService>, max_body_bytes: usize) -> Router {
    build_router(service, max_body_bytes, CancellationToken::new())
}

fn build_router(
    service: Arc<GenerationService>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Router {
    let state = ServerState { service, shutdown };

    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/metrics", get(metrics))
        .route("/api/cache", delete(clear_cache))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c
///
/// With `warm` set the template is built in the background right away so
/// the first request does not pay for it.
pub async fn serve(
    service: Arc<GenerationService>,
    bind: &str,
    max_body_bytes: usize,
    warm: bool,
) -> KilnResult<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| KilnError::io(format!("binding {}", bind), e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| KilnError::io("reading listener address", e))?;
    info!("Listening on http://{}", addr);

    let shutdown = CancellationToken::new();

    if warm {
        let service = Arc::clone(&service);
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            match service.warm_template(&cancel).await {
                Ok(true) => info!("Dependency template warmed"),
                Ok(false) => debug!("Dependency template already warm"),
                Err(e) => warn!("Failed to warm dependency template: {}", e),
            }
        });
    }

    let app = build_router(service, max_body_bytes, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| KilnError::io("serving HTTP", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    shutdown.cancel();
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn generate(
    State(state): State<ServerState>,
    body: Bytes,
) -> (StatusCode, Json<GenerateResponse>) {
    let request = match state.service.validator().validate_json(&body) {
        Ok(request) => request,
        Err(e) => return failure(&e),
    };

    let cancel = state.shutdown.child_token();
    match state.service.generate_request(&request, &cancel).await {
        Ok(generated) => (
            StatusCode::OK,
            Json(GenerateResponse::success(generated.output)),
        ),
        Err(e) => failure(&e),
    }
}

async fn metrics(State(state): State<ServerState>) -> Json<Value> {
    Json(json!(state.service.metrics().summarize()))
}

async fn clear_cache(State(state): State<ServerState>) -> (StatusCode, Json<Value>) {
    match state.service.clear_cache().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "success": false })),
        ),
    }
}

fn failure(e: &KilnError) -> (StatusCode, Json<GenerateResponse>) {
    let status = match e.category() {
        ErrorCategory::BadInput => StatusCode::BAD_REQUEST,
        ErrorCategory::Execution => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(GenerateResponse::failure(e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::sh_config;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let service = GenerationService::from_config(&sh_config(dir.path()));
        router(Arc::new(service), 64 * 1024)
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_check() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(&dir), Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn generate_success() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(
            app(&dir),
            Method::POST,
            "/api/generate",
            r#"{"sourceText": "print the value 42", "timeoutSeconds": 30}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "generatedCode": "Generated: 42", "success": true }));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(&dir), Method::POST, "/api/generate", "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn invalid_input_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(
            app(&dir),
            Method::POST,
            "/api/generate",
            r#"{"sourceText": "   ", "timeoutSeconds": 30}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            app(&dir),
            Method::POST,
            "/api/generate",
            r#"{"sourceText": "print 1", "timeoutSeconds": 500}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn execution_failure_is_server_error() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(
            app(&dir),
            Method::POST,
            "/api/generate",
            r#"{"sourceText": "exit 4"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("code 4"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = "#".repeat(80 * 1024);
        let payload = json!({ "sourceText": source }).to_string();
        let (status, _) = send(app(&dir), Method::POST, "/api/generate", &payload).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn metrics_and_cache_clear() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(GenerationService::from_config(&sh_config(dir.path())));
        service.generate("print the value 1", None).await.unwrap();
        let app = router(Arc::clone(&service), 64 * 1024);

        let (status, body) = send(app.clone(), Method::GET, "/api/metrics", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generate"]["count"], 1);
        assert!(body["run"]["average"].as_f64().is_some());

        let (status, body) = send(app, Method::DELETE, "/api/cache", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert_eq!(service.cache().stats().await.unwrap().entries, 0);
    }
}
