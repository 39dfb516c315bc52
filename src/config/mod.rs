//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, EngineConfig, GatesConfig, LibraryConfig, LogFormat, LoggingConfig, ServerConfig,
    StorageBackend, StorageSettings,
};
