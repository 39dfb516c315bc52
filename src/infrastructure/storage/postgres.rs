//! PostgreSQL storage: one JSONB table shared by all collections

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity, StorageKey};

/// PostgreSQL storage configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/prompt_engine".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }
}

/// Table shared by every collection; rows are keyed by `(collection, key)`
pub const ENTITY_TABLE: &str = "prompt_engine_entities";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS prompt_engine_entities (
        collection VARCHAR(64) NOT NULL,
        key VARCHAR(255) NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (collection, key)
    )
"#;

const SELECT_ONE: &str =
    "SELECT data FROM prompt_engine_entities WHERE collection = $1 AND key = $2";
const SELECT_ALL: &str =
    "SELECT data FROM prompt_engine_entities WHERE collection = $1 ORDER BY key";
const INSERT: &str = "INSERT INTO prompt_engine_entities (collection, key, data) VALUES ($1, $2, $3) \
     ON CONFLICT (collection, key) DO NOTHING";
const UPDATE: &str = "UPDATE prompt_engine_entities SET data = $3, updated_at = NOW() \
     WHERE collection = $1 AND key = $2";
const UPSERT: &str = "INSERT INTO prompt_engine_entities (collection, key, data) VALUES ($1, $2, $3) \
     ON CONFLICT (collection, key) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()";
const DELETE: &str = "DELETE FROM prompt_engine_entities WHERE collection = $1 AND key = $2";
const COUNT: &str = "SELECT COUNT(*) AS count FROM prompt_engine_entities WHERE collection = $1";

/// Entities stored as JSONB rows of one collection in the shared entity table
pub struct PostgresStorage<E>
where
    E: StorageEntity,
{
    pool: PgPool,
    collection: String,
    _phantom: PhantomData<E>,
}

impl<E> Debug for PostgresStorage<E>
where
    E: StorageEntity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("collection", &self.collection)
            .finish()
    }
}

/// Open a pool that every collection shares
pub async fn connect_pool(config: &PostgresConfig) -> Result<PgPool, DomainError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))
}

/// Create the entity table if it does not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::query(CREATE_TABLE)
        .execute(pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create {}: {}", ENTITY_TABLE, e)))?;
    Ok(())
}

impl<E> PostgresStorage<E>
where
    E: StorageEntity,
{
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
            _phantom: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn encode(entity: &E) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(entity)
            .map_err(|e| DomainError::storage(format!("Failed to serialize entity: {}", e)))
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<E, DomainError> {
        let data: serde_json::Value = row.get("data");
        serde_json::from_value(data)
            .map_err(|e| DomainError::storage(format!("Failed to deserialize entity: {}", e)))
    }

    fn query_error(&self, action: &str, e: sqlx::Error) -> DomainError {
        DomainError::storage(format!("Failed to {} in '{}': {}", action, self.collection, e))
    }
}

#[async_trait]
impl<E> Storage<E> for PostgresStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        let row = sqlx::query(SELECT_ONE)
            .bind(&self.collection)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.query_error("get entity", e))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        let rows = sqlx::query(SELECT_ALL)
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.query_error("list entities", e))?;

        rows.iter().map(Self::decode).collect()
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();

        let result = sqlx::query(INSERT)
            .bind(&self.collection)
            .bind(&key)
            .bind(Self::encode(&entity)?)
            .execute(&self.pool)
            .await
            .map_err(|e| self.query_error("create entity", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::conflict(format!(
                "'{}' already exists in {}",
                key, self.collection
            )));
        }

        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();

        let result = sqlx::query(UPDATE)
            .bind(&self.collection)
            .bind(&key)
            .bind(Self::encode(&entity)?)
            .execute(&self.pool)
            .await
            .map_err(|e| self.query_error("update entity", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!(
                "'{}' not found in {}",
                key, self.collection
            )));
        }

        Ok(entity)
    }

    async fn save(&self, entity: E) -> Result<E, DomainError> {
        sqlx::query(UPSERT)
            .bind(&self.collection)
            .bind(entity.key().as_str())
            .bind(Self::encode(&entity)?)
            .execute(&self.pool)
            .await
            .map_err(|e| self.query_error("save entity", e))?;

        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        let result = sqlx::query(DELETE)
            .bind(&self.collection)
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| self.query_error("delete entity", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize, DomainError> {
        let row = sqlx::query(COUNT)
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.query_error("count entities", e))?;

        let count: i64 = row.get("count");
        Ok(count as usize)
    }
}
