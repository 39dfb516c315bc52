//! Loads prompt and gate definitions from `*.toml` / `*.json` files

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::LibraryConfig;
use crate::domain::gate::{Gate, GateRepository};
use crate::domain::prompt::{PromptRepository, PromptTemplate};
use crate::domain::DomainError;
use crate::infrastructure::services::{
    CreateGateRequest, CreatePromptRequest, GateService, ImportOutcome, PromptService,
};

/// Definition files are small; anything larger is rejected
const MAX_DEFINITION_SIZE: u64 = 1024 * 1024;

/// Parsed library contents
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub prompts: Vec<PromptTemplate>,
    pub gates: Vec<Gate>,
}

impl Library {
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty() && self.gates.is_empty()
    }
}

/// Counts reported after importing a library into the registries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub prompts_created: usize,
    pub prompts_updated: usize,
    pub prompts_unchanged: usize,
    pub prompts_kept: usize,
    pub gates_changed: usize,
    pub gates_unchanged: usize,
}

#[derive(Debug, Clone)]
pub struct LibraryLoader {
    prompts_dir: PathBuf,
    gates_dir: PathBuf,
}

impl LibraryLoader {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            prompts_dir: config.prompts_dir.clone(),
            gates_dir: config.gates_dir.clone(),
        }
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    pub fn gates_dir(&self) -> &Path {
        &self.gates_dir
    }

    /// Read and validate every definition file.
    ///
    /// Missing directories are treated as empty. All problems are collected
    /// into a single Configuration error.
    pub async fn load(&self) -> Result<Library, DomainError> {
        let mut issues = Vec::new();

        let prompts = load_dir(&self.prompts_dir, &mut issues, |r: CreatePromptRequest| {
            r.into_template()
        })
        .await;
        let gates =
            load_dir(&self.gates_dir, &mut issues, |r: CreateGateRequest| r.into_gate()).await;

        check_unique(prompts.iter().map(|(p, t)| (p, t.id().to_string())), "prompt", &mut issues);
        check_unique(gates.iter().map(|(p, g)| (p, g.id().to_string())), "gate", &mut issues);

        if !issues.is_empty() {
            return Err(DomainError::configuration(format!(
                "Invalid library definitions:\n  {}",
                issues.join("\n  ")
            )));
        }

        let library = Library {
            prompts: prompts.into_iter().map(|(_, t)| t).collect(),
            gates: gates.into_iter().map(|(_, g)| g).collect(),
        };

        let gate_ids: HashSet<String> = library.gates.iter().map(|g| g.id().to_string()).collect();
        for prompt in &library.prompts {
            for gate_id in prompt.gates() {
                if !gate_ids.contains(gate_id.as_str()) {
                    warn!(
                        prompt_id = %prompt.id(),
                        gate_id = %gate_id,
                        "Prompt references a gate that is not in the library"
                    );
                }
            }
        }

        debug!(
            prompts = library.prompts.len(),
            gates = library.gates.len(),
            "Library loaded"
        );
        Ok(library)
    }

    /// Load the library and register it; gates go first so prompts can reference them
    pub async fn import<P, G>(
        &self,
        prompts: &PromptService<P>,
        gates: &GateService<G>,
    ) -> Result<ImportSummary, DomainError>
    where
        P: PromptRepository,
        G: GateRepository,
    {
        let library = self.load().await?;
        let mut summary = ImportSummary::default();

        for gate in library.gates {
            if gates.import(gate).await? {
                summary.gates_changed += 1;
            } else {
                summary.gates_unchanged += 1;
            }
        }

        for prompt in library.prompts {
            match prompts.import(prompt).await? {
                ImportOutcome::Created => summary.prompts_created += 1,
                ImportOutcome::Updated => summary.prompts_updated += 1,
                ImportOutcome::Unchanged => summary.prompts_unchanged += 1,
                ImportOutcome::Kept => summary.prompts_kept += 1,
            }
        }

        info!(
            prompts_created = summary.prompts_created,
            prompts_updated = summary.prompts_updated,
            gates_changed = summary.gates_changed,
            "Library imported"
        );
        Ok(summary)
    }
}

async fn load_dir<R, T>(
    dir: &Path,
    issues: &mut Vec<String>,
    build: impl Fn(R) -> Result<T, DomainError>,
) -> Vec<(PathBuf, T)>
where
    R: DeserializeOwned,
{
    let files = match definition_files(dir).await {
        Ok(files) => files,
        Err(e) => {
            issues.push(format!("{}: {}", dir.display(), e));
            return Vec::new();
        }
    };

    let mut loaded = Vec::with_capacity(files.len());
    for path in files {
        match read_definition::<R>(&path).await.and_then(&build) {
            Ok(item) => loaded.push((path, item)),
            Err(e) => issues.push(format!("{}: {}", path.display(), e)),
        }
    }
    loaded
}

/// `*.toml` and `*.json` files directly inside `dir`, sorted by name
async fn definition_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Library directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && format_of(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Option<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Some(Format::Toml),
        Some("json") => Some(Format::Json),
        _ => None,
    }
}

async fn read_definition<R: DeserializeOwned>(path: &Path) -> Result<R, DomainError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| DomainError::configuration(e.to_string()))?;
    if metadata.len() > MAX_DEFINITION_SIZE {
        return Err(DomainError::configuration(format!(
            "file is larger than {} bytes",
            MAX_DEFINITION_SIZE
        )));
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DomainError::configuration(e.to_string()))?;

    match format_of(path) {
        Some(Format::Toml) => toml::from_str(&content).map_err(|e| DomainError::parse(e.to_string())),
        Some(Format::Json) => {
            serde_json::from_str(&content).map_err(|e| DomainError::parse(e.to_string()))
        }
        None => Err(DomainError::configuration("unsupported file extension")),
    }
}

fn check_unique<'a>(
    ids: impl Iterator<Item = (&'a PathBuf, String)>,
    kind: &str,
    issues: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for (path, id) in ids {
        if !seen.insert(id.clone()) {
            issues.push(format!("{}: duplicate {} id '{}'", path.display(), kind, id));
        }
    }
}
