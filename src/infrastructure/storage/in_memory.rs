//! In-memory storage implementation

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity, StorageKey};

/// Thread-safe in-memory storage, listed in key order
///
/// Data is lost when the process terminates.
#[derive(Debug)]
pub struct InMemoryStorage<E>
where
    E: StorageEntity,
{
    entities: RwLock<BTreeMap<String, E>>,
}

impl<E> Default for InMemoryStorage<E>
where
    E: StorageEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryStorage<E>
where
    E: StorageEntity,
{
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates storage pre-populated with entities, later duplicates win
    pub fn with_entities(entities: Vec<E>) -> Self {
        let map = entities
            .into_iter()
            .map(|e| (e.key().as_str().to_string(), e))
            .collect();

        Self {
            entities: RwLock::new(map),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, E>>, DomainError> {
        self.entities
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, E>>, DomainError> {
        self.entities
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }
}

#[async_trait]
impl<E> Storage<E> for InMemoryStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        Ok(self.read()?.get(key.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.write()?;

        if entities.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "Entity with key '{}' already exists",
                key
            )));
        }

        entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.write()?;

        match entities.get_mut(&key) {
            Some(slot) => {
                *slot = entity.clone();
                Ok(entity)
            }
            None => Err(DomainError::not_found(format!(
                "Entity with key '{}' not found",
                key
            ))),
        }
    }

    async fn save(&self, entity: E) -> Result<E, DomainError> {
        self.write()?
            .insert(entity.key().as_str().to_string(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.write()?.remove(key.as_str()).is_some())
    }

    async fn count(&self) -> Result<usize, DomainError> {
        Ok(self.read()?.len())
    }

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.read()?.contains_key(key.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gate::{Gate, GateId, Severity};

    fn gate(id: &str, name: &str) -> Gate {
        Gate::new(GateId::new(id).unwrap(), name, Severity::High)
            .with_criteria(vec!["has tests".to_string()])
    }

    fn key(id: &str) -> GateId {
        GateId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let storage: InMemoryStorage<Gate> = InMemoryStorage::new();
        let g = gate("code-quality", "Code Quality");

        storage.create(g.clone()).await.unwrap();

        let result = storage.get(&key("code-quality")).await.unwrap();
        assert_eq!(result, Some(g));
    }

    #[tokio::test]
    async fn test_create_conflict_keeps_original() {
        let storage: InMemoryStorage<Gate> = InMemoryStorage::new();
        storage.create(gate("g", "Original")).await.unwrap();

        let result = storage.create(gate("g", "Other")).await;

        assert!(matches!(result, Err(DomainError::Conflict { .. })));
        let stored = storage.get(&key("g")).await.unwrap().unwrap();
        assert_eq!(stored.name(), "Original");
    }

    #[tokio::test]
    async fn test_update_not_found() {
        let storage: InMemoryStorage<Gate> = InMemoryStorage::new();

        let result = storage.update(gate("g", "G")).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let storage: InMemoryStorage<Gate> = InMemoryStorage::new();

        storage.save(gate("g", "First")).await.unwrap();
        storage.save(gate("g", "Second")).await.unwrap();

        assert_eq!(storage.count().await.unwrap(), 1);
        assert_eq!(
            storage.get(&key("g")).await.unwrap().unwrap().name(),
            "Second"
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = InMemoryStorage::with_entities(vec![gate("g", "G")]);

        assert!(storage.delete(&key("g")).await.unwrap());
        assert!(!storage.delete(&key("g")).await.unwrap());
        assert!(!storage.exists(&key("g")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_in_key_order() {
        let storage =
            InMemoryStorage::with_entities(vec![gate("b", "B"), gate("c", "C"), gate("a", "A")]);

        let ids: Vec<String> = storage
            .list()
            .await
            .unwrap()
            .iter()
            .map(|g| g.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
