//! Storage-backed prompt repository

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::prompt::{PromptId, PromptRepository, PromptTemplate};
use crate::domain::storage::Storage;

#[derive(Debug)]
pub struct StoragePromptRepository {
    storage: Arc<dyn Storage<PromptTemplate>>,
}

impl StoragePromptRepository {
    pub fn new(storage: Arc<dyn Storage<PromptTemplate>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PromptRepository for StoragePromptRepository {
    async fn get(&self, id: &PromptId) -> Result<Option<PromptTemplate>, DomainError> {
        self.storage.get(id).await
    }

    async fn list(&self) -> Result<Vec<PromptTemplate>, DomainError> {
        let mut prompts = self.storage.list().await?;
        prompts.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(prompts)
    }

    async fn create(&self, prompt: PromptTemplate) -> Result<PromptTemplate, DomainError> {
        if self.storage.exists(prompt.id()).await? {
            return Err(DomainError::conflict(format!(
                "Prompt '{}' already exists",
                prompt.id()
            )));
        }

        self.storage.create(prompt).await
    }

    async fn update(&self, prompt: PromptTemplate) -> Result<PromptTemplate, DomainError> {
        if !self.storage.exists(prompt.id()).await? {
            return Err(DomainError::not_found(format!(
                "Prompt '{}' not found",
                prompt.id()
            )));
        }

        self.storage.update(prompt).await
    }

    async fn delete(&self, id: &PromptId) -> Result<bool, DomainError> {
        self.storage.delete(id).await
    }

    async fn exists(&self, id: &PromptId) -> Result<bool, DomainError> {
        self.storage.exists(id).await
    }
}
