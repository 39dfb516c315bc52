use axum::{Router, middleware, routing::get};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::health;
use super::middleware::{logging_middleware, metrics_middleware};
use super::state::AppState;
use super::tools;
use crate::infrastructure::observability::{PrometheusMetrics, create_metrics_router};

/// Create a minimal router without state
/// Note: /ready is not available without state
pub fn create_router() -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/live", get(health::live_check))
        .layer(TraceLayer::new_for_http())
}

/// Create the full router with application state and, when enabled, the metrics endpoint
pub fn create_router_with_state(
    state: AppState,
    metrics: Option<(PrometheusMetrics, &str)>,
) -> Router {
    let router = Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        // Tool endpoints
        .nest("/tools", tools::create_tools_router())
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    match metrics {
        Some((handle, path)) => router.merge(create_metrics_router(handle, path)),
        None => router,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::testing::seeded_state;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_without_state() {
        let response = create_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_checks_components() {
        let app = create_router_with_state(seeded_state().await, None);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_request_id_is_assigned_and_echoed() {
        let app = create_router_with_state(seeded_state().await, None);

        let response = app
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_prompt_engine_round_trip() {
        let app = create_router_with_state(seeded_state().await, None);

        let response = app
            .clone()
            .oneshot(post("/tools/prompt_engine", json!({ "command": ">>analyze" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let started = body_json(response).await;
        assert_eq!(started["status"], "paused");

        let response = app
            .oneshot(post(
                "/tools/prompt_engine",
                json!({ "chain_id": started["chain_id"], "user_response": "analysis" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let finished = body_json(response).await;
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["context"][0]["key"], "analyze");
    }

    #[tokio::test]
    async fn test_errors_use_api_error_body() {
        let app = create_router_with_state(seeded_state().await, None);

        let response = app
            .clone()
            .oneshot(post(
                "/tools/resource_manager",
                json!({ "resource_type": "prompt", "action": "get", "id": "missing" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "not_found_error");

        let response = app
            .oneshot(post("/tools/prompt_engine", json!({ "command": ">>a -->" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "parse_error");
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let app = create_router_with_state(seeded_state().await, None);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/system_control")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_json");
    }
}
