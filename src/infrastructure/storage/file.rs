//! File storage - one pretty-printed JSON document per entity

use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity, StorageKey};

const EXTENSION: &str = "json";
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Stores entities as `<dir>/<key>.json`
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written document behind. Writers inside one
/// process are serialized.
pub struct FileStorage<E>
where
    E: StorageEntity,
{
    dir: PathBuf,
    write_lock: Mutex<()>,
    _phantom: PhantomData<E>,
}

impl<E> Debug for FileStorage<E>
where
    E: StorageEntity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .finish()
    }
}

impl<E> FileStorage<E>
where
    E: StorageEntity,
{
    /// Opens (and creates if needed) the storage directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let dir = dir.into();

        fs::create_dir_all(&dir).await.map_err(|e| {
            DomainError::storage(format!(
                "Failed to create storage directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            _phantom: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_safe_filename(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 255
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DomainError> {
        if !Self::is_safe_filename(key) {
            return Err(DomainError::storage(format!(
                "Key '{}' cannot be used as a file name",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.{}", key, EXTENSION)))
    }

    async fn read_path(path: &Path) -> Result<Option<E>, DomainError> {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DomainError::storage(format!(
                    "Failed to stat {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if metadata.len() > MAX_FILE_SIZE {
            return Err(DomainError::storage(format!(
                "{} exceeds {} bytes",
                path.display(),
                MAX_FILE_SIZE
            )));
        }

        let bytes = fs::read(path).await.map_err(|e| {
            DomainError::storage(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            DomainError::storage(format!("Failed to deserialize {}: {}", path.display(), e))
        })
    }

    async fn write_path(&self, path: &Path, entity: &E) -> Result<(), DomainError> {
        let json = serde_json::to_vec_pretty(entity)
            .map_err(|e| DomainError::storage(format!("Failed to serialize entity: {}", e)))?;

        let tmp = path.with_extension(format!("{}.{}.tmp", EXTENSION, Uuid::new_v4().simple()));

        fs::write(&tmp, &json).await.map_err(|e| {
            DomainError::storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(DomainError::storage(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl<E> Storage<E> for FileStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        let path = self.path_for(key.as_str())?;
        Self::read_path(&path).await
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            DomainError::storage(format!("Failed to read {}: {}", self.dir.display(), e))
        })?;

        let mut paths = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entities = Vec::with_capacity(paths.len());
        for path in paths {
            // a concurrent delete may have removed it
            if let Some(entity) = Self::read_path(&path).await? {
                entities.push(entity);
            }
        }

        Ok(entities)
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let path = self.path_for(&key)?;
        let _guard = self.write_lock.lock().await;

        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DomainError::conflict(format!(
                "Entity with key '{}' already exists",
                key
            )));
        }

        self.write_path(&path, &entity).await?;
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let path = self.path_for(&key)?;
        let _guard = self.write_lock.lock().await;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DomainError::not_found(format!(
                "Entity with key '{}' not found",
                key
            )));
        }

        self.write_path(&path, &entity).await?;
        Ok(entity)
    }

    async fn save(&self, entity: E) -> Result<E, DomainError> {
        let path = self.path_for(entity.key().as_str())?;
        let _guard = self.write_lock.lock().await;

        self.write_path(&path, &entity).await?;
        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        let path = self.path_for(key.as_str())?;
        let _guard = self.write_lock.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        let path = self.path_for(key.as_str())?;
        fs::try_exists(&path)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to stat {}: {}", path.display(), e)))
    }
}
