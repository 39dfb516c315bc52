//! Storage-backed gate repository

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::gate::{Gate, GateId, GateRepository};
use crate::domain::storage::Storage;

#[derive(Debug)]
pub struct StorageGateRepository {
    storage: Arc<dyn Storage<Gate>>,
}

impl StorageGateRepository {
    pub fn new(storage: Arc<dyn Storage<Gate>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl GateRepository for StorageGateRepository {
    async fn get(&self, id: &GateId) -> Result<Option<Gate>, DomainError> {
        self.storage.get(id).await
    }

    async fn list(&self) -> Result<Vec<Gate>, DomainError> {
        let mut gates = self.storage.list().await?;
        gates.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(gates)
    }

    async fn create(&self, gate: Gate) -> Result<Gate, DomainError> {
        if self.storage.exists(gate.id()).await? {
            return Err(DomainError::conflict(format!(
                "Gate '{}' already exists",
                gate.id()
            )));
        }

        self.storage.create(gate).await
    }

    async fn update(&self, gate: Gate) -> Result<Gate, DomainError> {
        if !self.storage.exists(gate.id()).await? {
            return Err(DomainError::not_found(format!("Gate '{}' not found", gate.id())));
        }

        self.storage.update(gate).await
    }

    async fn delete(&self, id: &GateId) -> Result<bool, DomainError> {
        self.storage.delete(id).await
    }
}
