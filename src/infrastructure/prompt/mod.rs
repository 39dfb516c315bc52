//! Prompt infrastructure

mod storage_repository;

pub use storage_repository::StoragePromptRepository;
