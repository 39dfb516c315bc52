//! Gate persistence

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::{Gate, GateId};
use crate::domain::DomainError;

/// Repository trait for gate persistence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GateRepository: Send + Sync + std::fmt::Debug {
    async fn get(&self, id: &GateId) -> Result<Option<Gate>, DomainError>;

    async fn list(&self) -> Result<Vec<Gate>, DomainError>;

    /// Conflict if the id is already registered
    async fn create(&self, gate: Gate) -> Result<Gate, DomainError>;

    async fn update(&self, gate: Gate) -> Result<Gate, DomainError>;

    async fn delete(&self, id: &GateId) -> Result<bool, DomainError>;
}
