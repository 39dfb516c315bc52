//! Resource manager tool - prompt and gate registry CRUD

use std::collections::HashMap;

use axum::extract::State;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{required, respond, unsupported};
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::infrastructure::services::{
    CreateGateRequest, CreatePromptRequest, DEFAULT_SUGGESTION_LIMIT, UpdateGateRequest,
    UpdatePromptRequest,
};

const RESOURCE_TYPES: &[&str] = &["prompt", "gate"];
const PROMPT_ACTIONS: &[&str] = &["list", "get", "create", "update", "delete", "suggest", "render"];
const GATE_ACTIONS: &[&str] = &["list", "get", "create", "update", "delete", "suggest"];

/// Request body for `POST /tools/resource_manager`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceManagerRequest {
    pub resource_type: String,
    pub action: String,
    pub id: Option<String>,
    pub data: Option<Value>,
    pub query: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub work_types: Vec<String>,
    /// Named arguments for `render`; non-string values are stringified
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// POST /tools/resource_manager
pub async fn resource_manager(
    State(state): State<AppState>,
    Json(request): Json<ResourceManagerRequest>,
) -> Result<Json<Value>, ApiError> {
    debug!(
        resource_type = %request.resource_type,
        action = %request.action,
        "Resource manager"
    );

    match request.resource_type.as_str() {
        "prompt" => prompts(&state, request).await,
        "gate" => gates(&state, request).await,
        other => Err(unsupported("resource_type", other, RESOURCE_TYPES)),
    }
}

async fn prompts(state: &AppState, request: ResourceManagerRequest) -> Result<Json<Value>, ApiError> {
    let service = &state.prompt_service;

    match request.action.as_str() {
        "list" => {
            let prompts = service.list().await?;
            let total = prompts.len();
            respond(json!({ "prompts": prompts, "total": total }))
        }
        "get" => respond(service.get(required(&request.id, "id")?).await?),
        "create" => {
            let create: CreatePromptRequest = creation_data(&request)?;
            respond(service.create(create).await?)
        }
        "update" => {
            let id = required(&request.id, "id")?;
            let update: UpdatePromptRequest = update_data(&request)?;
            respond(service.update(id, update).await?)
        }
        "delete" => {
            let id = required(&request.id, "id")?;
            service.delete(id).await?;
            respond(json!({ "id": id, "deleted": true }))
        }
        "suggest" => {
            let query = required(&request.query, "query")?;
            let limit = request.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT);
            respond(json!({ "matches": service.suggest(query, limit).await? }))
        }
        "render" => {
            let id = required(&request.id, "id")?;
            let arguments = string_arguments(&request.arguments);
            respond(service.render(id, &arguments).await?)
        }
        other => Err(unsupported("action", other, PROMPT_ACTIONS)),
    }
}

async fn gates(state: &AppState, request: ResourceManagerRequest) -> Result<Json<Value>, ApiError> {
    let service = &state.gate_service;

    match request.action.as_str() {
        "list" => {
            let gates = service.list().await?;
            let total = gates.len();
            respond(json!({ "gates": gates, "total": total }))
        }
        "get" => respond(service.get(required(&request.id, "id")?).await?),
        "create" => {
            let create: CreateGateRequest = creation_data(&request)?;
            respond(service.create(create).await?)
        }
        "update" => {
            let id = required(&request.id, "id")?;
            let update: UpdateGateRequest = update_data(&request)?;
            respond(service.update(id, update).await?)
        }
        "delete" => {
            let id = required(&request.id, "id")?;
            service.delete(id).await?;
            respond(json!({ "id": id, "deleted": true }))
        }
        "suggest" => {
            // A bare query counts as a single work type
            let work_types = match (&request.query, request.work_types.is_empty()) {
                (Some(query), true) => vec![query.clone()],
                _ => request.work_types.clone(),
            };
            if work_types.is_empty() {
                return Err(ApiError::bad_request("'work_types' or 'query' is required")
                    .with_param("work_types"));
            }
            respond(json!({ "suggestions": service.suggest(&work_types, request.limit).await? }))
        }
        other => Err(unsupported("action", other, GATE_ACTIONS)),
    }
}

/// `data` as a create request, taking the id from the request when `data` omits it
fn creation_data<T: DeserializeOwned>(request: &ResourceManagerRequest) -> Result<T, ApiError> {
    let mut data = match &request.data {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(ApiError::bad_request("'data' must be an object").with_param("data"));
        }
        None => return Err(ApiError::bad_request("'data' is required").with_param("data")),
    };

    if let Some(id) = &request.id {
        data.entry("id").or_insert_with(|| Value::String(id.clone()));
    }

    parse_data(Value::Object(data))
}

fn update_data<T: DeserializeOwned>(request: &ResourceManagerRequest) -> Result<T, ApiError> {
    match &request.data {
        Some(data @ Value::Object(_)) => parse_data(data.clone()),
        Some(_) => Err(ApiError::bad_request("'data' must be an object").with_param("data")),
        None => Err(ApiError::bad_request("'data' is required").with_param("data")),
    }
}

fn parse_data<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| {
        ApiError::bad_request(format!("Invalid 'data': {}", e))
            .with_param("data")
            .with_code("invalid_data")
    })
}

fn string_arguments(arguments: &Map<String, Value>) -> HashMap<String, String> {
    arguments
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}
