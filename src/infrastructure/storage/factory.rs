//! Storage factory for runtime backend selection

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::postgres::PgPool;
use tracing::debug;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity};

use super::file::FileStorage;
use super::in_memory::InMemoryStorage;
use super::postgres::{PostgresConfig, PostgresStorage, connect_pool, ensure_schema};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    InMemory,
    File,
    Postgres,
}

impl StorageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "file" | "files" | "fs" | "filesystem" => Some(Self::File),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    InMemory,
    /// Root directory; each collection gets a subdirectory
    File(PathBuf),
    Postgres(PostgresConfig),
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    pub fn file(root: impl Into<PathBuf>) -> Self {
        Self::File(root.into())
    }

    pub fn postgres(config: PostgresConfig) -> Self {
        Self::Postgres(config)
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::InMemory => StorageType::InMemory,
            Self::File(_) => StorageType::File,
            Self::Postgres(_) => StorageType::Postgres,
        }
    }
}

/// Connected backend, shared by every collection the factory hands out
#[derive(Debug, Clone)]
enum Backend {
    InMemory,
    File(PathBuf),
    Postgres(PgPool),
}

/// Creates per-collection storages over one connected backend
#[derive(Debug, Clone)]
pub struct StorageFactory {
    backend: Backend,
}

impl StorageFactory {
    /// Connects the backend once; PostgreSQL gets its pool and schema here
    pub async fn connect(config: &StorageConfig) -> Result<Self, DomainError> {
        let backend = match config {
            StorageConfig::InMemory => Backend::InMemory,
            StorageConfig::File(root) => Backend::File(root.clone()),
            StorageConfig::Postgres(pg_config) => {
                let pool = connect_pool(pg_config).await?;
                ensure_schema(&pool).await?;
                Backend::Postgres(pool)
            }
        };

        debug!(backend = ?config.storage_type(), "Storage backend connected");
        Ok(Self { backend })
    }

    pub fn storage_type(&self) -> StorageType {
        match self.backend {
            Backend::InMemory => StorageType::InMemory,
            Backend::File(_) => StorageType::File,
            Backend::Postgres(_) => StorageType::Postgres,
        }
    }

    /// Creates the storage for one collection (`prompts`, `gates`, `chain_states`)
    pub async fn create<E>(&self, collection: &str) -> Result<Arc<dyn Storage<E>>, DomainError>
    where
        E: StorageEntity + 'static,
    {
        debug!(collection = %collection, "Creating storage");

        match &self.backend {
            Backend::InMemory => Ok(Arc::new(InMemoryStorage::<E>::new())),
            Backend::File(root) => {
                let storage = FileStorage::<E>::open(root.join(collection)).await?;
                Ok(Arc::new(storage))
            }
            Backend::Postgres(pool) => Ok(Arc::new(PostgresStorage::<E>::new(
                pool.clone(),
                collection,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::ChainExecutionState;

    #[test]
    fn test_storage_type_parse() {
        assert_eq!(StorageType::parse("memory"), Some(StorageType::InMemory));
        assert_eq!(StorageType::parse("In-Memory"), Some(StorageType::InMemory));
        assert_eq!(StorageType::parse("file"), Some(StorageType::File));
        assert_eq!(StorageType::parse("postgresql"), Some(StorageType::Postgres));
        assert_eq!(StorageType::parse("pg"), Some(StorageType::Postgres));
        assert_eq!(StorageType::parse("redis"), None);
    }

    #[test]
    fn test_storage_config_types() {
        assert_eq!(StorageConfig::in_memory().storage_type(), StorageType::InMemory);
        assert_eq!(StorageConfig::file("/tmp/x").storage_type(), StorageType::File);
        assert_eq!(
            StorageConfig::postgres(PostgresConfig::new("postgres://localhost/test"))
                .storage_type(),
            StorageType::Postgres
        );
    }

    #[tokio::test]
    async fn test_create_file_storage_uses_collection_dir() {
        let root = std::env::temp_dir().join(format!("prompt-engine-factory-{}", uuid::Uuid::new_v4()));
        let factory = StorageFactory::connect(&StorageConfig::file(&root))
            .await
            .unwrap();
        assert_eq!(factory.storage_type(), StorageType::File);

        let storage = factory
            .create::<ChainExecutionState>("chain_states")
            .await
            .unwrap();

        assert_eq!(storage.count().await.unwrap(), 0);
        assert!(root.join("chain_states").is_dir());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_in_memory_collections_are_independent() {
        let factory = StorageFactory::connect(&StorageConfig::in_memory())
            .await
            .unwrap();

        let first = factory.create::<ChainExecutionState>("a").await.unwrap();
        let second = factory.create::<ChainExecutionState>("b").await.unwrap();

        assert_eq!(first.count().await.unwrap(), 0);
        assert_eq!(second.count().await.unwrap(), 0);
        assert_eq!(factory.storage_type(), StorageType::InMemory);
    }
}
