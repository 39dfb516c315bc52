//! System control tool - gate inspection and chain supervision

use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{required, respond, unsupported};
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::chain::ChainRunId;

const ACTIONS: &[&str] = &["gates", "chains"];
const GATE_OPERATIONS: &[&str] = &["list", "get", "suggest", "evaluate"];
const CHAIN_OPERATIONS: &[&str] = &["list", "status", "abort"];

/// Request body for `POST /tools/system_control`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemControlRequest {
    pub action: String,
    pub operation: String,
    pub id: Option<String>,
    #[serde(default)]
    pub work_types: Vec<String>,
    pub limit: Option<usize>,
    pub output: Option<String>,
    pub chain_id: Option<String>,
    pub reason: Option<String>,
}

/// POST /tools/system_control
pub async fn system_control(
    State(state): State<AppState>,
    Json(request): Json<SystemControlRequest>,
) -> Result<Json<Value>, ApiError> {
    debug!(action = %request.action, operation = %request.operation, "System control");

    match request.action.as_str() {
        "gates" => gates(&state, &request).await,
        "chains" => chains(&state, &request).await,
        other => Err(unsupported("action", other, ACTIONS)),
    }
}

async fn gates(state: &AppState, request: &SystemControlRequest) -> Result<Json<Value>, ApiError> {
    match request.operation.as_str() {
        "list" => {
            let gates = state.gate_service.list().await?;
            let total = gates.len();
            respond(json!({ "gates": gates, "total": total }))
        }
        "get" => {
            let gate = state.gate_service.get(required(&request.id, "id")?).await?;
            respond(gate)
        }
        "suggest" => {
            if request.work_types.is_empty() {
                return Err(ApiError::bad_request("'work_types' must not be empty")
                    .with_param("work_types"));
            }
            let suggestions = state
                .gate_service
                .suggest(&request.work_types, request.limit)
                .await?;
            respond(json!({ "suggestions": suggestions }))
        }
        "evaluate" => {
            let id = required(&request.id, "id")?;
            let output = required(&request.output, "output")?;
            let verdict = state.gate_service.evaluate(id, output).await?;
            respond(verdict)
        }
        other => Err(unsupported("operation", other, GATE_OPERATIONS)),
    }
}

async fn chains(state: &AppState, request: &SystemControlRequest) -> Result<Json<Value>, ApiError> {
    match request.operation.as_str() {
        "list" => {
            let chains = state.chain_executor.list().await?;
            let total = chains.len();
            respond(json!({ "chains": chains, "total": total }))
        }
        "status" => {
            let id = ChainRunId::new(required(&request.chain_id, "chain_id")?)?;
            respond(state.chain_executor.status(&id).await?)
        }
        "abort" => {
            let id = ChainRunId::new(required(&request.chain_id, "chain_id")?)?;
            let reason = request.reason.as_deref().unwrap_or_default();
            respond(state.chain_executor.abort(&id, reason).await?)
        }
        other => Err(unsupported("operation", other, CHAIN_OPERATIONS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::testing::seeded_state;
    use axum::http::StatusCode;

    fn request(action: &str, operation: &str) -> SystemControlRequest {
        SystemControlRequest {
            action: action.to_string(),
            operation: operation.to_string(),
            id: None,
            work_types: Vec::new(),
            limit: None,
            output: None,
            chain_id: None,
            reason: None,
        }
    }

    async fn call(state: &AppState, request: SystemControlRequest) -> Result<Value, ApiError> {
        system_control(State(state.clone()), Json(request))
            .await
            .map(Json::into_inner)
    }

    #[tokio::test]
    async fn test_list_and_get_gates() {
        let state = seeded_state().await;

        let listed = call(&state, request("gates", "list")).await.unwrap();
        assert_eq!(listed["total"], 1);

        let mut get = request("gates", "get");
        get.id = Some("has_tests".to_string());
        let gate = call(&state, get).await.unwrap();
        assert_eq!(gate["id"], "has_tests");
    }

    #[tokio::test]
    async fn test_get_unknown_gate_is_not_found() {
        let state = seeded_state().await;
        let mut get = request("gates", "get");
        get.id = Some("missing".to_string());

        let err = call(&state, get).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_suggest_requires_work_types() {
        let state = seeded_state().await;

        let err = call(&state, request("gates", "suggest")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let mut suggest = request("gates", "suggest");
        suggest.work_types = vec!["code".to_string()];
        let result = call(&state, suggest).await.unwrap();
        assert!(result["suggestions"].is_array());
    }

    #[tokio::test]
    async fn test_evaluate_gate() {
        let state = seeded_state().await;
        let mut evaluate = request("gates", "evaluate");
        evaluate.id = Some("has_tests".to_string());
        evaluate.output = Some("This change includes unit tests for the parser".to_string());

        let verdict = call(&state, evaluate).await.unwrap();
        assert_eq!(verdict["gate_id"], "has_tests");
        assert_eq!(verdict["passed"], true);
    }

    #[tokio::test]
    async fn test_chain_status_and_abort() {
        let state = seeded_state().await;
        let report = state.chain_executor.execute(">>analyze").await.unwrap();

        let mut status = request("chains", "status");
        status.chain_id = Some(report.chain_id.clone());
        let current = call(&state, status).await.unwrap();
        assert_eq!(current["status"], "paused");

        let mut abort = request("chains", "abort");
        abort.chain_id = Some(report.chain_id.clone());
        let aborted = call(&state, abort).await.unwrap();
        assert_eq!(aborted["status"], "aborted");

        let listed = call(&state, request("chains", "list")).await.unwrap();
        assert_eq!(listed["total"], 1);
    }

    #[tokio::test]
    async fn test_unknown_action_and_operation() {
        let state = seeded_state().await;

        let err = call(&state, request("reboot", "now")).await.unwrap_err();
        assert_eq!(err.response.error.param.as_deref(), Some("action"));

        let err = call(&state, request("chains", "explode")).await.unwrap_err();
        assert_eq!(err.response.error.param.as_deref(), Some("operation"));
    }

    #[tokio::test]
    async fn test_status_requires_chain_id() {
        let state = seeded_state().await;
        let err = call(&state, request("chains", "status")).await.unwrap_err();
        assert_eq!(err.response.error.param.as_deref(), Some("chain_id"));
    }
}
