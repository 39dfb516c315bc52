//! Prompt Engine
//!
//! Orchestrates reusable prompt templates:
//! - A registry of named, parameterized prompt templates
//! - Chains of templates run step by step with accumulated context
//! - Quality gates that validate each step's output before the chain advances

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use domain::chain::ChainExecutionState;
use domain::gate::Gate;
use domain::prompt::PromptTemplate;
use infrastructure::chain::{ChainExecutorImpl, DeferredStepRunner};
use infrastructure::gate::{KeywordEvaluator, StorageGateRepository};
use infrastructure::library::LibraryLoader;
use infrastructure::prompt::StoragePromptRepository;
use infrastructure::services::{GateService, PromptService};
use infrastructure::storage::StorageFactory;
use tracing::info;

/// Create the application state with default configuration
pub async fn create_app_state() -> anyhow::Result<AppState> {
    create_app_state_with_config(&AppConfig::default()).await
}

/// Create the application state: storage, registries seeded from the library, executor
pub async fn create_app_state_with_config(config: &AppConfig) -> anyhow::Result<AppState> {
    let storage_config = config.storage.to_storage_config()?;
    let executor_config = config.engine.to_executor_config()?;

    let storage = StorageFactory::connect(&storage_config).await?;
    info!("Storage backend: {:?}", storage.storage_type());

    let prompt_storage = storage.create::<PromptTemplate>("prompts").await?;
    let gate_storage = storage.create::<Gate>("gates").await?;
    let chain_storage = storage.create::<ChainExecutionState>("chain_states").await?;

    let prompt_service = Arc::new(PromptService::new(Arc::new(StoragePromptRepository::new(
        prompt_storage,
    ))));
    let gate_service = Arc::new(GateService::new(
        Arc::new(StorageGateRepository::new(gate_storage)),
        Arc::new(KeywordEvaluator::new(config.gates.keyword_threshold)),
    ));

    let loader = LibraryLoader::new(&config.library);
    let summary = loader.import(&prompt_service, &gate_service).await?;
    info!(
        prompts_dir = %loader.prompts_dir().display(),
        gates_dir = %loader.gates_dir().display(),
        prompts_created = summary.prompts_created,
        prompts_kept = summary.prompts_kept,
        gates_changed = summary.gates_changed,
        "Prompt library ready"
    );

    let chain_executor = Arc::new(ChainExecutorImpl::with_config(
        prompt_service.clone(),
        gate_service.clone(),
        Arc::new(DeferredStepRunner),
        chain_storage,
        executor_config,
    ));

    Ok(AppState {
        prompt_service,
        gate_service,
        chain_executor,
    })
}
