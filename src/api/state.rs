//! Application state for shared services

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::chain::ChainExecutor;
use crate::domain::gate::{Gate, GateRepository, GateSuggestion, GateVerdict};
use crate::domain::prompt::{
    PromptMatch, PromptRepository, PromptSummary, PromptTemplate, RenderedPrompt,
};
use crate::domain::DomainError;
use crate::infrastructure::services::{
    CreateGateRequest, CreatePromptRequest, GateService, PromptService, UpdateGateRequest,
    UpdatePromptRequest,
};

/// Application state containing shared services using dynamic dispatch
#[derive(Clone)]
pub struct AppState {
    pub prompt_service: Arc<dyn PromptServiceTrait>,
    pub gate_service: Arc<dyn GateServiceTrait>,
    pub chain_executor: Arc<dyn ChainExecutor>,
}

/// Trait for prompt registry operations
#[async_trait::async_trait]
pub trait PromptServiceTrait: Send + Sync {
    async fn get(&self, id: &str) -> Result<PromptTemplate, DomainError>;
    async fn list(&self) -> Result<Vec<PromptSummary>, DomainError>;
    async fn create(&self, request: CreatePromptRequest) -> Result<PromptTemplate, DomainError>;
    async fn update(
        &self,
        id: &str,
        request: UpdatePromptRequest,
    ) -> Result<PromptTemplate, DomainError>;
    async fn delete(&self, id: &str) -> Result<(), DomainError>;
    async fn render(
        &self,
        id: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<RenderedPrompt, DomainError>;
    async fn suggest(&self, query: &str, limit: usize) -> Result<Vec<PromptMatch>, DomainError>;
}

/// Trait for gate registry operations
#[async_trait::async_trait]
pub trait GateServiceTrait: Send + Sync {
    async fn get(&self, id: &str) -> Result<Gate, DomainError>;
    async fn list(&self) -> Result<Vec<Gate>, DomainError>;
    async fn create(&self, request: CreateGateRequest) -> Result<Gate, DomainError>;
    async fn update(&self, id: &str, request: UpdateGateRequest) -> Result<Gate, DomainError>;
    async fn delete(&self, id: &str) -> Result<(), DomainError>;
    async fn suggest(
        &self,
        work_types: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<GateSuggestion>, DomainError>;
    async fn evaluate(&self, id: &str, output: &str) -> Result<GateVerdict, DomainError>;
}

#[async_trait::async_trait]
impl<R: PromptRepository + 'static> PromptServiceTrait for PromptService<R> {
    async fn get(&self, id: &str) -> Result<PromptTemplate, DomainError> {
        PromptService::get_required(self, id).await
    }

    async fn list(&self) -> Result<Vec<PromptSummary>, DomainError> {
        PromptService::list(self).await
    }

    async fn create(&self, request: CreatePromptRequest) -> Result<PromptTemplate, DomainError> {
        PromptService::create(self, request).await
    }

    async fn update(
        &self,
        id: &str,
        request: UpdatePromptRequest,
    ) -> Result<PromptTemplate, DomainError> {
        PromptService::update(self, id, request).await
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        PromptService::delete(self, id).await
    }

    async fn render(
        &self,
        id: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<RenderedPrompt, DomainError> {
        PromptService::render(self, id, arguments, &[]).await
    }

    async fn suggest(&self, query: &str, limit: usize) -> Result<Vec<PromptMatch>, DomainError> {
        PromptService::suggest(self, query, limit).await
    }
}

#[async_trait::async_trait]
impl<R: GateRepository + 'static> GateServiceTrait for GateService<R> {
    async fn get(&self, id: &str) -> Result<Gate, DomainError> {
        GateService::get_required(self, id).await
    }

    async fn list(&self) -> Result<Vec<Gate>, DomainError> {
        GateService::list(self).await
    }

    async fn create(&self, request: CreateGateRequest) -> Result<Gate, DomainError> {
        GateService::create(self, request).await
    }

    async fn update(&self, id: &str, request: UpdateGateRequest) -> Result<Gate, DomainError> {
        GateService::update(self, id, request).await
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        GateService::delete(self, id).await
    }

    async fn suggest(
        &self,
        work_types: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<GateSuggestion>, DomainError> {
        GateService::suggest(self, work_types, limit).await
    }

    async fn evaluate(&self, id: &str, output: &str) -> Result<GateVerdict, DomainError> {
        GateService::evaluate(self, id, output).await
    }
}
