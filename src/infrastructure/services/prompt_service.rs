//! Prompt registry service - CRUD, rendering, intent matching and reference tracking

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::gate::GateId;
use crate::domain::prompt::{
    PromptArgument, PromptId, PromptMatch, PromptRepository, PromptStore, PromptSummary,
    PromptTemplate, RenderedPrompt, StepOutput, rank_prompts,
};
use crate::domain::DomainError;

/// Default number of prompts returned by `suggest`
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;

/// Request to register a prompt template
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePromptRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub user_message_template: String,
    #[serde(default)]
    pub gates: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CreatePromptRequest {
    /// Build and validate the template this request describes
    pub fn into_template(self) -> Result<PromptTemplate, DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::validation("Prompt 'id' is required"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "Prompt '{}' is missing 'name'",
                self.id
            )));
        }
        if self.user_message_template.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "Prompt '{}' is missing 'user_message_template'",
                self.id
            )));
        }

        let id = PromptId::new(self.id)?;
        let gates = parse_gate_ids(self.gates)?;

        let mut template = PromptTemplate::new(id, self.name, self.user_message_template)
            .with_description(self.description)
            .with_category(self.category)
            .with_arguments(self.arguments)
            .with_gates(gates)
            .with_keywords(self.keywords);

        if let Some(system_message) = self.system_message {
            template = template.with_system_message(system_message);
        }

        template.validate()?;
        Ok(template)
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePromptRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub arguments: Option<Vec<PromptArgument>>,
    pub system_message: Option<String>,
    pub user_message_template: Option<String>,
    pub gates: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
}

/// What happened to a library definition on import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    Updated,
    Unchanged,
    /// Stored copy is frozen by a recorded execution
    Kept,
}

/// Prompt registry over a prompt repository
#[derive(Debug)]
pub struct PromptService<R: PromptRepository> {
    repository: Arc<R>,
    // serializes read-modify-write sequences
    write_lock: Mutex<()>,
}

impl<R: PromptRepository> PromptService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<PromptTemplate>, DomainError> {
        let prompt_id = PromptId::new(id)?;
        self.repository.get(&prompt_id).await
    }

    /// Get a prompt, NotFound if absent
    pub async fn get_required(&self, id: &str) -> Result<PromptTemplate, DomainError> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Prompt '{}' not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<PromptSummary>, DomainError> {
        Ok(self
            .repository
            .list()
            .await?
            .iter()
            .map(PromptTemplate::summary)
            .collect())
    }

    pub async fn create(&self, request: CreatePromptRequest) -> Result<PromptTemplate, DomainError> {
        let template = request.into_template()?;
        let created = self.repository.create(template).await?;

        info!(prompt_id = %created.id(), "Prompt registered");
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &str,
        request: UpdatePromptRequest,
    ) -> Result<PromptTemplate, DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut prompt = self.get_required(id).await?;
        prompt.ensure_mutable()?;

        if let Some(name) = request.name {
            prompt.set_name(name);
        }
        if let Some(description) = request.description {
            prompt.set_description(description);
        }
        if let Some(category) = request.category {
            prompt.set_category(category);
        }
        if let Some(arguments) = request.arguments {
            prompt.set_arguments(arguments);
        }
        if let Some(system_message) = request.system_message {
            prompt.set_system_message((!system_message.is_empty()).then_some(system_message));
        }
        if let Some(template) = request.user_message_template {
            prompt.set_user_message_template(template);
        }
        if let Some(gates) = request.gates {
            prompt.set_gates(parse_gate_ids(gates)?);
        }
        if let Some(keywords) = request.keywords {
            prompt.set_keywords(keywords);
        }

        prompt.validate()?;
        let updated = self.repository.update(prompt).await?;

        debug!(prompt_id = %updated.id(), hash = %updated.content_hash(), "Prompt updated");
        Ok(updated)
    }

    /// Delete a prompt, Conflict while any active chain holds it
    pub async fn delete(&self, id: &str) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;
        let prompt = self.get_required(id).await?;
        prompt.ensure_deletable()?;

        self.repository.delete(prompt.id()).await?;
        info!(prompt_id = %id, "Prompt deleted");
        Ok(())
    }

    /// Render a template outside of a chain
    pub async fn render(
        &self,
        id: &str,
        arguments: &HashMap<String, String>,
        context: &[StepOutput],
    ) -> Result<RenderedPrompt, DomainError> {
        let prompt = self.get_required(id).await?;
        let named: BTreeMap<String, String> = arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let bound = prompt.bind_arguments(&[], &named)?;
        prompt.render(&bound, context, None)
    }

    /// Rank prompts against a free-text intent
    pub async fn suggest(&self, query: &str, limit: usize) -> Result<Vec<PromptMatch>, DomainError> {
        let prompts = self.repository.list().await?;
        Ok(rank_prompts(&prompts, query, limit))
    }

    /// Create or refresh a definition loaded from the prompt library
    pub async fn import(&self, template: PromptTemplate) -> Result<ImportOutcome, DomainError> {
        let _guard = self.write_lock.lock().await;

        let Some(existing) = self.repository.get(template.id()).await? else {
            self.repository.create(template).await?;
            return Ok(ImportOutcome::Created);
        };

        if same_definition(&existing, &template) {
            return Ok(ImportOutcome::Unchanged);
        }

        if existing.ensure_mutable().is_err() {
            warn!(
                prompt_id = %existing.id(),
                "Library definition changed but the stored prompt is referenced, keeping it"
            );
            return Ok(ImportOutcome::Kept);
        }

        let mut refreshed = existing;
        refreshed.set_name(template.name());
        refreshed.set_description(template.description());
        refreshed.set_category(template.category());
        refreshed.set_arguments(template.arguments().to_vec());
        refreshed.set_system_message(template.system_message().map(String::from));
        refreshed.set_user_message_template(template.user_message_template());
        refreshed.set_gates(template.gates().to_vec());
        refreshed.set_keywords(template.keywords().to_vec());

        self.repository.update(refreshed).await?;
        Ok(ImportOutcome::Updated)
    }
}

#[async_trait]
impl<R: PromptRepository> PromptStore for PromptService<R> {
    async fn resolve(&self, id: &PromptId) -> Result<PromptTemplate, DomainError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Prompt '{}' not found", id)))
    }

    async fn acquire(&self, ids: &[PromptId], chain_id: &str) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;

        for id in ids {
            let mut prompt = self
                .repository
                .get(id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("Prompt '{}' not found", id)))?;

            prompt.acquire(chain_id);
            self.repository.update(prompt).await?;
        }

        debug!(chain_id = %chain_id, prompts = ids.len(), "Prompts acquired");
        Ok(())
    }

    async fn release(&self, ids: &[PromptId], chain_id: &str) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;

        for id in ids {
            let Some(mut prompt) = self.repository.get(id).await? else {
                continue;
            };

            if prompt.release(chain_id) {
                self.repository.update(prompt).await?;
            }
        }

        debug!(chain_id = %chain_id, prompts = ids.len(), "Prompts released");
        Ok(())
    }
}

fn same_definition(a: &PromptTemplate, b: &PromptTemplate) -> bool {
    a.content_hash() == b.content_hash()
        && a.name() == b.name()
        && a.description() == b.description()
        && a.category() == b.category()
        && a.arguments() == b.arguments()
        && a.gates() == b.gates()
        && a.keywords() == b.keywords()
}

fn parse_gate_ids(ids: Vec<String>) -> Result<Vec<GateId>, DomainError> {
    ids.into_iter()
        .map(|id| GateId::new(id).map_err(DomainError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::{ArgumentType, MockPromptRepository};
    use crate::infrastructure::prompt::StoragePromptRepository;
    use crate::infrastructure::storage::InMemoryStorage;

    fn create_service() -> PromptService<StoragePromptRepository> {
        let storage = Arc::new(InMemoryStorage::<PromptTemplate>::new());
        PromptService::new(Arc::new(StoragePromptRepository::new(storage)))
    }

    fn analyze_request() -> CreatePromptRequest {
        CreatePromptRequest {
            id: "analyze".to_string(),
            name: "Analyze".to_string(),
            category: "analysis".to_string(),
            arguments: vec![PromptArgument::new("topic", ArgumentType::String).required()],
            user_message_template: "Analyze {{topic}}".to_string(),
            keywords: vec!["analyze".to_string(), "review".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();

        let list = service.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "analyze");
        assert_eq!(list[0].argument_count, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_leaves_original() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();

        let mut second = analyze_request();
        second.user_message_template = "Something else".to_string();
        let result = service.create(second).await;

        assert!(matches!(result, Err(DomainError::Conflict { .. })));
        let stored = service.get_required("analyze").await.unwrap();
        assert_eq!(stored.user_message_template(), "Analyze {{topic}}");
    }

    #[tokio::test]
    async fn test_create_missing_fields() {
        let service = create_service();

        let mut request = analyze_request();
        request.user_message_template = String::new();
        assert!(matches!(
            service.create(request).await,
            Err(DomainError::Validation { .. })
        ));

        let mut request = analyze_request();
        request.id = String::new();
        assert!(matches!(
            service.create(request).await,
            Err(DomainError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_request_from_json_rejects_unknown_fields() {
        let result: Result<CreatePromptRequest, _> =
            serde_json::from_str(r#"{"id": "a", "name": "A", "template": "x"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_blocked_once_referenced() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();

        let id = PromptId::new("analyze").unwrap();
        service.acquire(&[id.clone()], "chain-1").await.unwrap();
        service.release(&[id], "chain-1").await.unwrap();

        let result = service
            .update(
                "analyze",
                UpdatePromptRequest {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_update_unreferenced() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();
        let before = service.get_required("analyze").await.unwrap();

        let updated = service
            .update(
                "analyze",
                UpdatePromptRequest {
                    user_message_template: Some("Deeply analyze {{topic}}".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_ne!(updated.content_hash(), before.content_hash());
    }

    #[tokio::test]
    async fn test_delete_blocked_while_held() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();
        let id = PromptId::new("analyze").unwrap();

        service.acquire(&[id.clone()], "chain-1").await.unwrap();
        assert!(matches!(
            service.delete("analyze").await,
            Err(DomainError::Conflict { .. })
        ));

        service.release(&[id], "chain-1").await.unwrap();
        service.delete("analyze").await.unwrap();
        assert!(matches!(
            service.delete("analyze").await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_render_applies_arguments() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();

        let mut args = HashMap::new();
        args.insert("topic".to_string(), "caching".to_string());

        let rendered = service.render("analyze", &args, &[]).await.unwrap();
        assert_eq!(rendered.user_message, "Analyze caching");

        let missing = service.render("analyze", &HashMap::new(), &[]).await;
        assert!(matches!(missing, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_suggest() {
        let service = create_service();
        service.create(analyze_request()).await.unwrap();

        let matches = service.suggest("please review this", 5).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "analyze");

        assert!(service.suggest("deploy", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let mut repo = MockPromptRepository::new();
        repo.expect_get().returning(|_| Ok(None));
        let service = PromptService::new(Arc::new(repo));

        let result = service.resolve(&PromptId::new("ghost").unwrap()).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_import_outcomes() {
        let service = create_service();
        let template = analyze_request().into_template().unwrap();

        assert_eq!(service.import(template.clone()).await.unwrap(), ImportOutcome::Created);
        assert_eq!(service.import(template).await.unwrap(), ImportOutcome::Unchanged);

        let mut changed = analyze_request();
        changed.user_message_template = "Review {{topic}}".to_string();
        assert_eq!(
            service.import(changed.into_template().unwrap()).await.unwrap(),
            ImportOutcome::Updated
        );

        service
            .acquire(&[PromptId::new("analyze").unwrap()], "chain-9")
            .await
            .unwrap();
        let mut again = analyze_request();
        again.user_message_template = "Summarize {{topic}}".to_string();
        assert_eq!(
            service.import(again.into_template().unwrap()).await.unwrap(),
            ImportOutcome::Kept
        );
    }
}
