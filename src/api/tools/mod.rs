//! Tool endpoints: registry management, system control and the chain engine

mod prompt_engine;
mod resource_manager;
mod system_control;

use axum::{Router, routing::post};
use serde::Serialize;
use serde_json::Value;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};

pub use prompt_engine::{EngineOptions, PromptEngineRequest, prompt_engine};
pub use resource_manager::{ResourceManagerRequest, resource_manager};
pub use system_control::{SystemControlRequest, system_control};

/// Create the tools router
pub fn create_tools_router() -> Router<AppState> {
    Router::new()
        .route("/system_control", post(system_control))
        .route("/resource_manager", post(resource_manager))
        .route("/prompt_engine", post(prompt_engine))
}

/// Non-empty value of an optional request field
fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("'{}' is required", field)).with_param(field))
}

fn unsupported(field: &str, value: &str, allowed: &[&str]) -> ApiError {
    ApiError::bad_request(format!(
        "Unsupported {} '{}', expected one of: {}",
        field,
        value,
        allowed.join(", ")
    ))
    .with_param(field)
}

fn respond<T: Serialize>(value: T) -> Result<Json<Value>, ApiError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Failed to serialize response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_required_rejects_missing_and_blank() {
        assert_eq!(required(&Some(" id ".to_string()), "id").unwrap(), "id");

        let err = required(&None, "chain_id").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.response.error.param.as_deref(), Some("chain_id"));

        assert!(required(&Some("   ".to_string()), "id").is_err());
    }

    #[test]
    fn test_unsupported_lists_allowed_values() {
        let err = unsupported("action", "explode", &["list", "get"]);
        assert!(err.response.error.message.contains("list, get"));
        assert_eq!(err.response.error.param.as_deref(), Some("action"));
    }
}
