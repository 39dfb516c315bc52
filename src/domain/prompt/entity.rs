//! Prompt template entity and argument schema

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::template::{MessageTemplate, RenderScope, StepOutput};
use crate::domain::DomainError;
use crate::domain::gate::GateId;
use crate::domain::storage::StorageEntity;
use crate::domain::validation::resource_id;

resource_id!(
    /// Prompt identifier
    PromptId
);

/// Argument type tags accepted in a prompt's schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ArgumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Check that a raw textual value fits this type
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::String => true,
            Self::Number => value.trim().parse::<f64>().is_ok(),
            Self::Boolean => matches!(value.trim(), "true" | "false"),
            Self::Array => matches!(
                serde_json::from_str::<serde_json::Value>(value),
                Ok(serde_json::Value::Array(_))
            ),
            Self::Object => matches!(
                serde_json::from_str::<serde_json::Value>(value),
                Ok(serde_json::Value::Object(_))
            ),
        }
    }
}

impl FromStr for ArgumentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(DomainError::validation(format!(
                "Unknown argument type '{}' (expected string, number, boolean, array or object)",
                other
            ))),
        }
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a prompt's ordered argument schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(rename = "type", default)]
    pub arg_type: ArgumentType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl PromptArgument {
    pub fn new(name: impl Into<String>, arg_type: ArgumentType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            description: String::new(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Fully rendered messages for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub prompt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    pub user_message: String,
}

/// Lightweight listing entry, message bodies excluded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub argument_count: usize,
    pub gates: Vec<String>,
}

/// A named prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    id: PromptId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    arguments: Vec<PromptArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_message: Option<String>,
    user_message_template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    gates: Vec<GateId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    keywords: Vec<String>,
    content_hash: String,
    /// Set once any chain execution referenced this template
    #[serde(default)]
    referenced: bool,
    /// Non-terminal chains currently holding this template
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    active_chains: BTreeSet<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StorageEntity for PromptTemplate {
    type Key = PromptId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

impl PromptTemplate {
    pub fn new(
        id: PromptId,
        name: impl Into<String>,
        user_message_template: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let user_message_template = user_message_template.into();
        let content_hash = content_hash(None, &user_message_template);

        Self {
            id,
            name: name.into(),
            description: String::new(),
            category: String::new(),
            arguments: Vec::new(),
            system_message: None,
            user_message_template,
            gates: Vec::new(),
            keywords: Vec::new(),
            content_hash,
            referenced: false,
            active_chains: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<PromptArgument>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self.rehash();
        self
    }

    pub fn with_gates(mut self, gates: Vec<GateId>) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    // Getters

    pub fn id(&self) -> &PromptId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn arguments(&self) -> &[PromptArgument] {
        &self.arguments
    }

    pub fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    pub fn user_message_template(&self) -> &str {
        &self.user_message_template
    }

    pub fn gates(&self) -> &[GateId] {
        &self.gates
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn active_chains(&self) -> &BTreeSet<String> {
        &self.active_chains
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn summary(&self) -> PromptSummary {
        PromptSummary {
            id: self.id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            argument_count: self.arguments.len(),
            gates: self.gates.iter().map(ToString::to_string).collect(),
        }
    }

    // Lifecycle

    /// Templates referenced by a recorded execution are frozen
    pub fn ensure_mutable(&self) -> Result<(), DomainError> {
        if self.referenced {
            return Err(DomainError::conflict(format!(
                "Prompt '{}' is referenced by a recorded execution and cannot be modified",
                self.id
            )));
        }
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if let Some(chain) = self.active_chains.iter().next() {
            return Err(DomainError::conflict(format!(
                "Prompt '{}' is held by active chain '{}' ({} total)",
                self.id,
                chain,
                self.active_chains.len()
            )));
        }
        Ok(())
    }

    pub fn acquire(&mut self, chain_id: &str) {
        self.referenced = true;
        self.active_chains.insert(chain_id.to_string());
    }

    /// Returns true if the chain was holding this template
    pub fn release(&mut self, chain_id: &str) -> bool {
        self.active_chains.remove(chain_id)
    }

    // Mutators, callers check `ensure_mutable` first

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = category.into();
        self.touch();
    }

    pub fn set_arguments(&mut self, arguments: Vec<PromptArgument>) {
        self.arguments = arguments;
        self.touch();
    }

    pub fn set_system_message(&mut self, system_message: Option<String>) {
        self.system_message = system_message;
        self.rehash();
        self.touch();
    }

    pub fn set_user_message_template(&mut self, template: impl Into<String>) {
        self.user_message_template = template.into();
        self.rehash();
        self.touch();
    }

    pub fn set_gates(&mut self, gates: Vec<GateId>) {
        self.gates = gates;
        self.touch();
    }

    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        self.keywords = keywords;
        self.touch();
    }

    fn rehash(&mut self) {
        self.content_hash = content_hash(
            self.system_message.as_deref(),
            &self.user_message_template,
        );
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // Validation

    /// Check required fields, the argument schema and placeholder syntax
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "Prompt '{}' is missing a name",
                self.id
            )));
        }

        if self.user_message_template.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "Prompt '{}' is missing a user message template",
                self.id
            )));
        }

        let mut seen = HashSet::new();

        for argument in &self.arguments {
            if argument.name.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "Prompt '{}' has an argument without a name",
                    self.id
                )));
            }

            if !seen.insert(argument.name.as_str()) {
                return Err(DomainError::validation(format!(
                    "Prompt '{}' declares argument '{}' more than once",
                    self.id, argument.name
                )));
            }

            if argument.required && argument.default.is_some() {
                return Err(DomainError::validation(format!(
                    "Argument '{}' cannot be both required and defaulted",
                    argument.name
                )));
            }

            if let Some(default) = &argument.default {
                if !argument.arg_type.accepts(default) {
                    return Err(DomainError::validation(format!(
                        "Default for argument '{}' is not a valid {}",
                        argument.name, argument.arg_type
                    )));
                }
            }
        }

        let user = MessageTemplate::parse(&self.user_message_template)?;
        let system = match &self.system_message {
            Some(text) => Some(MessageTemplate::parse(text)?),
            None => None,
        };

        let undeclared = user
            .argument_names()
            .into_iter()
            .chain(system.iter().flat_map(|s| s.argument_names()))
            .find(|name| !seen.contains(name));

        if let Some(name) = undeclared {
            return Err(DomainError::validation(format!(
                "Prompt '{}' uses placeholder '{{{{{}}}}}' that is not a declared argument",
                self.id, name
            )));
        }

        Ok(())
    }

    // Execution

    /// Bind positional and named invocation arguments against the schema.
    ///
    /// Positional values fill arguments in declaration order; surplus
    /// positional words are joined into the last argument so free text
    /// after `>>id` works without quoting.
    pub fn bind_arguments(
        &self,
        positional: &[String],
        named: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, String>, DomainError> {
        let mut bound: HashMap<String, String> = HashMap::new();

        if !positional.is_empty() && self.arguments.is_empty() {
            return Err(DomainError::validation(format!(
                "Prompt '{}' takes no arguments but {} were given",
                self.id,
                positional.len()
            )));
        }

        let slots = self.arguments.len().min(positional.len());

        for (index, argument) in self.arguments.iter().take(slots).enumerate() {
            let value = if index + 1 == slots && positional.len() > slots {
                positional[index..].join(" ")
            } else {
                positional[index].clone()
            };
            bound.insert(argument.name.clone(), value);
        }

        for (name, value) in named {
            if !self.arguments.iter().any(|a| &a.name == name) {
                return Err(DomainError::validation(format!(
                    "Prompt '{}' has no argument named '{}'",
                    self.id, name
                )));
            }
            bound.insert(name.clone(), value.clone());
        }

        for argument in &self.arguments {
            match bound.get(&argument.name) {
                Some(value) => {
                    if !argument.arg_type.accepts(value) {
                        return Err(DomainError::validation(format!(
                            "Argument '{}' expects a {} but got '{}'",
                            argument.name, argument.arg_type, value
                        )));
                    }
                }
                None => {
                    if let Some(default) = &argument.default {
                        bound.insert(argument.name.clone(), default.clone());
                    } else if argument.required {
                        return Err(DomainError::validation(format!(
                            "Missing required argument '{}' for prompt '{}'",
                            argument.name, self.id
                        )));
                    }
                }
            }
        }

        Ok(bound)
    }

    /// Render system and user messages for one step
    pub fn render(
        &self,
        arguments: &HashMap<String, String>,
        outputs: &[StepOutput],
        max_context_bytes: Option<usize>,
    ) -> Result<RenderedPrompt, DomainError> {
        let declared: Vec<String> = self.arguments.iter().map(|a| a.name.clone()).collect();

        let scope = RenderScope {
            arguments,
            declared: &declared,
            outputs,
            max_context_bytes,
        };

        let system_message = match &self.system_message {
            Some(text) => Some(MessageTemplate::parse(text)?.render(&scope)?),
            None => None,
        };
        let user_message = MessageTemplate::parse(&self.user_message_template)?.render(&scope)?;

        Ok(RenderedPrompt {
            prompt_id: self.id.to_string(),
            system_message,
            user_message,
        })
    }
}

fn content_hash(system_message: Option<&str>, user_message_template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system_message.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(user_message_template.as_bytes());
    hex::encode(hasher.finalize())
}
