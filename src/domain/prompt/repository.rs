//! Prompt persistence and lookup capabilities

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::{PromptId, PromptTemplate};
use crate::domain::DomainError;

/// Repository trait for prompt template persistence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PromptRepository: Send + Sync + std::fmt::Debug {
    async fn get(&self, id: &PromptId) -> Result<Option<PromptTemplate>, DomainError>;

    async fn list(&self) -> Result<Vec<PromptTemplate>, DomainError>;

    /// Conflict if the id is already registered
    async fn create(&self, prompt: PromptTemplate) -> Result<PromptTemplate, DomainError>;

    async fn update(&self, prompt: PromptTemplate) -> Result<PromptTemplate, DomainError>;

    async fn delete(&self, id: &PromptId) -> Result<bool, DomainError>;

    async fn exists(&self, id: &PromptId) -> Result<bool, DomainError>;
}

/// What the chain executor needs from the prompt registry
#[async_trait]
pub trait PromptStore: Send + Sync + std::fmt::Debug {
    /// Fetch a template, NotFound if unknown
    async fn resolve(&self, id: &PromptId) -> Result<PromptTemplate, DomainError>;

    /// Mark templates as referenced and held by a chain
    async fn acquire(&self, ids: &[PromptId], chain_id: &str) -> Result<(), DomainError>;

    /// Drop a chain's hold on templates
    async fn release(&self, ids: &[PromptId], chain_id: &str) -> Result<(), DomainError>;
}
