//! Infrastructure services

mod gate_service;
mod prompt_service;

pub use gate_service::{CreateGateRequest, GateService, UpdateGateRequest};
pub use prompt_service::{
    CreatePromptRequest, DEFAULT_SUGGESTION_LIMIT, ImportOutcome, PromptService,
    UpdatePromptRequest,
};
