use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::gate::Severity;
use crate::infrastructure::chain::ChainExecutorConfig;
use crate::infrastructure::gate::DEFAULT_KEYWORD_THRESHOLD;
use crate::infrastructure::observability::ObservabilityConfig;
use crate::infrastructure::storage::{PostgresConfig, StorageConfig};

/// Environment variable that relocates the prompt and gate library
pub const WORKSPACE_ENV: &str = "MCP_WORKSPACE";

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

/// Where chains, prompts and gates are persisted
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory of the file backend
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Prompt and gate definition files loaded at startup
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_gates_dir")]
    pub gates_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_chain_steps")]
    pub max_chain_steps: usize,
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    #[serde(default)]
    pub require_gate_review: bool,
    #[serde(default = "default_inline_gate_severity")]
    pub inline_gate_severity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatesConfig {
    /// Fraction of a criterion's significant words the output must contain
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f64,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_connections() -> u32 {
    10
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("library/prompts")
}

fn default_gates_dir() -> PathBuf {
    PathBuf::from("library/gates")
}

fn default_max_chain_steps() -> usize {
    20
}

fn default_max_context_bytes() -> usize {
    64 * 1024
}

fn default_inline_gate_severity() -> String {
    "high".to_string()
}

fn default_keyword_threshold() -> f64 {
    DEFAULT_KEYWORD_THRESHOLD
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            postgres_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            gates_dir: default_gates_dir(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_steps: default_max_chain_steps(),
            max_context_bytes: default_max_context_bytes(),
            require_gate_review: false,
            inline_gate_severity: default_inline_gate_severity(),
        }
    }
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            keyword_threshold: default_keyword_threshold(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: Self = config.try_deserialize()?;

        if let Ok(workspace) = std::env::var(WORKSPACE_ENV) {
            app.library = app.library.rooted_at(workspace);
        }

        Ok(app)
    }
}

impl StorageSettings {
    pub fn to_storage_config(&self) -> Result<StorageConfig, config::ConfigError> {
        Ok(match self.backend {
            StorageBackend::Memory => StorageConfig::in_memory(),
            StorageBackend::File => StorageConfig::file(self.path.clone()),
            StorageBackend::Postgres => {
                let url = self.postgres_url.clone().ok_or_else(|| {
                    config::ConfigError::Message(
                        "storage.postgres_url is required for the postgres backend".to_string(),
                    )
                })?;
                StorageConfig::postgres(
                    PostgresConfig::new(url).with_max_connections(self.max_connections),
                )
            }
        })
    }
}

impl LibraryConfig {
    /// Relative directories resolve against `root`
    pub fn rooted_at(self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let rebase = |dir: PathBuf| if dir.is_absolute() { dir } else { root.join(dir) };

        Self {
            prompts_dir: rebase(self.prompts_dir),
            gates_dir: rebase(self.gates_dir),
        }
    }
}

impl EngineConfig {
    pub fn to_executor_config(&self) -> Result<ChainExecutorConfig, config::ConfigError> {
        let inline_gate_severity: Severity = self
            .inline_gate_severity
            .parse()
            .map_err(|e| config::ConfigError::Message(format!("engine.inline_gate_severity: {}", e)))?;

        if self.max_chain_steps == 0 {
            return Err(config::ConfigError::Message(
                "engine.max_chain_steps must be at least 1".to_string(),
            ));
        }

        Ok(ChainExecutorConfig {
            max_steps: self.max_chain_steps,
            max_context_bytes: self.max_context_bytes,
            require_gate_review: self.require_gate_review,
            inline_gate_severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.engine.max_chain_steps, 20);
        assert_eq!(config.engine.max_context_bytes, 65536);
        assert!(!config.engine.require_gate_review);
        assert_eq!(config.gates.keyword_threshold, 0.5);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [storage]
            backend = "file"
            path = "/var/lib/prompt-engine"

            [engine]
            require_gate_review = true
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.max_connections, 10);
        assert!(config.engine.require_gate_review);
        assert_eq!(config.engine.max_chain_steps, 20);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_executor_config() {
        let engine = EngineConfig {
            inline_gate_severity: "critical".to_string(),
            ..Default::default()
        };
        let executor = engine.to_executor_config().unwrap();
        assert_eq!(executor.inline_gate_severity, Severity::Critical);

        let invalid = EngineConfig {
            inline_gate_severity: "urgent".to_string(),
            ..Default::default()
        };
        assert!(invalid.to_executor_config().is_err());
    }

    #[test]
    fn test_postgres_requires_url() {
        let settings = StorageSettings {
            backend: StorageBackend::Postgres,
            ..Default::default()
        };
        assert!(settings.to_storage_config().is_err());
    }

    #[test]
    fn test_library_rooted_at_workspace() {
        let library = LibraryConfig {
            prompts_dir: PathBuf::from("prompts"),
            gates_dir: PathBuf::from("/etc/gates"),
        }
        .rooted_at("/work");

        assert_eq!(library.prompts_dir, PathBuf::from("/work/prompts"));
        assert_eq!(library.gates_dir, PathBuf::from("/etc/gates"));
    }
}
