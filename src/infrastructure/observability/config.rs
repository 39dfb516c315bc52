//! Observability settings: OTLP span export and the Prometheus endpoint

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
}

/// OpenTelemetry span export; off unless enabled
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// OTLP gRPC collector, e.g. `http://localhost:4317`
    pub otlp_endpoint: String,
    pub service_name: String,
    /// Fraction of traces kept; values outside 0..=1 are clamped
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: env!("CARGO_PKG_NAME").to_string(),
            sampling_ratio: 1.0,
        }
    }
}

/// How many traces to keep
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    All,
    None,
    Ratio(f64),
}

impl TracingConfig {
    pub fn sampling(&self) -> Sampling {
        match self.sampling_ratio {
            r if r.is_nan() || r <= 0.0 => Sampling::None,
            r if r >= 1.0 => Sampling::All,
            r => Sampling::Ratio(r),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Scrape path, always with a leading slash
    pub fn path(&self) -> String {
        let trimmed = self.path.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            "/metrics".to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}
