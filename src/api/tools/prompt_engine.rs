//! Prompt engine tool - start, resume and inspect chain runs

use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{required, respond};
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::chain::{ChainRunId, ResumeInput, looks_like_invocation};

/// Request body for `POST /tools/prompt_engine`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptEngineRequest {
    pub command: Option<String>,
    pub chain_id: Option<String>,
    pub user_response: Option<String>,
    pub gate_verdict: Option<String>,
    #[serde(default)]
    pub gate_override: bool,
    #[serde(default)]
    pub options: EngineOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineOptions {
    /// Return the parsed chain without starting it
    #[serde(default)]
    pub parse_only: bool,
}

impl PromptEngineRequest {
    fn resume_input(&self) -> ResumeInput {
        ResumeInput {
            user_response: self.user_response.clone(),
            gate_verdict: self.gate_verdict.clone(),
            gate_override: self.gate_override,
        }
    }
}

/// POST /tools/prompt_engine
///
/// With `chain_id` the stored chain is resumed and `command` is ignored.
/// Otherwise `command` starts a new chain.
pub async fn prompt_engine(
    State(state): State<AppState>,
    Json(request): Json<PromptEngineRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(chain_id) = &request.chain_id {
        if request.options.parse_only {
            return Err(ApiError::bad_request("'parse_only' cannot be combined with 'chain_id'")
                .with_param("options.parse_only"));
        }

        let id = ChainRunId::new(chain_id)?;
        let input = request.resume_input();
        debug!(chain_id = %id, has_response = input.user_response.is_some(), "Resuming chain");

        return respond(state.chain_executor.resume(&id, input).await?);
    }

    let command = required(&request.command, "command")?;

    if !request.resume_input().is_empty() {
        return Err(ApiError::bad_request(
            "'user_response', 'gate_verdict' and 'gate_override' require 'chain_id'",
        )
        .with_param("chain_id"));
    }

    if request.options.parse_only {
        let expression = state.chain_executor.parse(command)?;
        let total_steps = expression.len();
        return respond(json!({
            "expression": expression,
            "total_steps": total_steps,
            "invocation": looks_like_invocation(command),
        }));
    }

    respond(state.chain_executor.execute(command).await?)
}
