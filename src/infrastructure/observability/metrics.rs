//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use regex::Regex;

use super::config::MetricsConfig;

static CHAIN_ID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"chain-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Prometheus metrics handle for serving the metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder, None when disabled or already installed
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("prompt_engine_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!("Prometheus metrics initialized at {}", config.path());

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());

    if status >= 500 {
        counter!("http_server_errors_total", &labels).increment(1);
    }
}

/// A step output was accepted; `kind` is `prompt` or `inline`
pub fn record_chain_step(kind: &str) {
    counter!("chain_steps_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_gate_verdict(severity: &str, passed: bool, source: &str) {
    let labels = [
        ("severity", severity.to_string()),
        ("outcome", if passed { "pass" } else { "fail" }.to_string()),
        ("source", source.to_string()),
    ];

    counter!("gate_verdicts_total", &labels).increment(1);
}

/// A chain reached `completed` or `aborted`; a failed chain can still be resumed
pub fn record_chain_finished(status: &str, steps: usize) {
    counter!("chains_finished_total", "status" => status.to_string()).increment(1);
    histogram!("chain_length_steps", "status" => status.to_string()).record(steps as f64);
}

/// A chain stopped in `failed`; `cause` is `gate` or `step`
pub fn record_chain_blocked(cause: &str) {
    counter!("chain_blocks_total", "cause" => cause.to_string()).increment(1);
}

/// Keep label cardinality bounded
fn sanitize_path(path: &str) -> String {
    let path = CHAIN_ID_SEGMENT.replace_all(path, "{chain_id}");
    let path = NUMERIC_SEGMENT.replace_all(&path, "/{id}$1");

    path.chars().take(50).collect()
}
