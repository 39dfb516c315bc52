//! Request/response logging middleware

use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, info, warn};

/// Header carrying the request id set by the router's request-id layer
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log each request once on arrival and once on completion.
/// `TraceLayer` owns the span; this only emits events inside it.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = extract_path(&request);
    let request_id = extract_request_id(&request);

    debug!(
        method = %method,
        path = %path,
        request_id = %request_id,
        content_type = header_value(&request, "content-type"),
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status();

    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            request_id = %request_id,
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            request_id = %request_id,
            outcome = outcome(status),
            "Request completed"
        );
    }

    response
}

fn extract_path(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

fn extract_request_id(request: &Request<Body>) -> String {
    header_value(request, REQUEST_ID_HEADER).unwrap_or("-").to_string()
}

fn header_value<'a>(request: &'a Request<Body>, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

fn outcome(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200..=299 => "ok",
        404 => "not_found",
        409 => "conflict",
        422 => "gate_blocked",
        400..=499 => "rejected",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(StatusCode::OK), "ok");
        assert_eq!(outcome(StatusCode::CONFLICT), "conflict");
        assert_eq!(outcome(StatusCode::UNPROCESSABLE_ENTITY), "gate_blocked");
        assert_eq!(outcome(StatusCode::BAD_REQUEST), "rejected");
    }

    #[test]
    fn test_request_id_falls_back_to_dash() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(extract_request_id(&request), "-");

        let request = Request::builder()
            .uri("/health")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_request_id(&request), "abc-123");
    }

    #[test]
    fn test_extract_path_without_match_uses_uri() {
        let request = Request::builder()
            .uri("/tools/prompt_engine?x=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_path(&request), "/tools/prompt_engine");
    }
}
