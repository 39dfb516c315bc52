//! Message template parsing and rendering
//!
//! Placeholder syntax:
//! - `{{name}}` - argument value, error if not bound
//! - `{{name|fallback}}` - argument value with inline fallback
//! - `{{previous_message}}` - output of the preceding chain step
//! - `{{step.key}}` - output of an earlier step by context key
//! - `{{context}}` - every prior output, oldest first

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DomainError;

static PLACEHOLDER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.-]*)\s*(?:\|([^}]*))?\}\}").unwrap()
});

const PREVIOUS_MESSAGE: &str = "previous_message";
const CONTEXT: &str = "context";
const STEP_PREFIX: &str = "step.";

/// Template processing errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("Missing required argument: {name}")]
    MissingArgument { name: String },

    #[error("Unknown step reference: {key}")]
    UnknownStep { key: String },

    #[error("Malformed placeholder at byte {position}: {message}")]
    Malformed { position: usize, message: String },
}

impl From<TemplateError> for DomainError {
    fn from(err: TemplateError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// Output of one accepted chain step, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub key: String,
    pub output: String,
}

impl StepOutput {
    pub fn new(key: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            output: output.into(),
        }
    }
}

/// A placeholder found in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Argument {
        name: String,
        fallback: Option<String>,
    },
    PreviousMessage,
    Context,
    Step {
        key: String,
    },
}

/// Values available while rendering
#[derive(Debug, Clone, Copy)]
pub struct RenderScope<'a> {
    pub arguments: &'a HashMap<String, String>,
    /// Declared argument names; unbound ones without a fallback render empty
    pub declared: &'a [String],
    pub outputs: &'a [StepOutput],
    pub max_context_bytes: Option<usize>,
}

/// A parsed message template
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    content: String,
    placeholders: Vec<Placeholder>,
}

impl MessageTemplate {
    /// Parse a template and collect its placeholders
    pub fn parse(content: impl Into<String>) -> Result<Self, TemplateError> {
        let content = content.into();
        let mut placeholders = Vec::new();
        let mut covered = Vec::new();

        for cap in PLACEHOLDER_PATTERN.captures_iter(&content) {
            let whole = cap.get(0).unwrap();
            covered.push((whole.start(), whole.end()));

            let name = cap.get(1).unwrap().as_str();
            let fallback = cap.get(2).map(|m| m.as_str().trim().to_string());

            let placeholder = match name {
                PREVIOUS_MESSAGE => Placeholder::PreviousMessage,
                CONTEXT => Placeholder::Context,
                _ if name.starts_with(STEP_PREFIX) => {
                    let key = &name[STEP_PREFIX.len()..];

                    if key.is_empty() {
                        return Err(TemplateError::Malformed {
                            position: whole.start(),
                            message: "step reference without a key".to_string(),
                        });
                    }
                    Placeholder::Step {
                        key: key.to_string(),
                    }
                }
                _ if name.contains('.') => {
                    return Err(TemplateError::Malformed {
                        position: whole.start(),
                        message: format!("'{}' is not an argument name", name),
                    });
                }
                _ => Placeholder::Argument {
                    name: name.to_string(),
                    fallback,
                },
            };

            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }

        // Any "{{" outside a recognised placeholder is an authoring mistake
        for (position, _) in content.match_indices("{{") {
            let inside = covered
                .iter()
                .any(|(start, end)| position >= *start && position < *end);

            if !inside {
                return Err(TemplateError::Malformed {
                    position,
                    message: "unterminated or invalid placeholder".to_string(),
                });
            }
        }

        Ok(Self {
            content,
            placeholders,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Argument names referenced by the template
    pub fn argument_names(&self) -> Vec<&str> {
        self.placeholders
            .iter()
            .filter_map(|p| match p {
                Placeholder::Argument { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when the template pulls in earlier chain outputs
    pub fn uses_context(&self) -> bool {
        self.placeholders.iter().any(|p| {
            matches!(
                p,
                Placeholder::PreviousMessage | Placeholder::Context | Placeholder::Step { .. }
            )
        })
    }

    pub fn render(&self, scope: &RenderScope<'_>) -> Result<String, TemplateError> {
        let mut failure = None;

        let rendered = PLACEHOLDER_PATTERN.replace_all(&self.content, |cap: &regex::Captures| {
            let name = &cap[1];
            let fallback = cap.get(2).map(|m| m.as_str().trim());

            match resolve(name, fallback, scope) {
                Ok(value) => value,
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(rendered.into_owned()),
        }
    }
}

fn resolve(
    name: &str,
    fallback: Option<&str>,
    scope: &RenderScope<'_>,
) -> Result<String, TemplateError> {
    match name {
        PREVIOUS_MESSAGE => Ok(scope
            .outputs
            .last()
            .map(|o| o.output.clone())
            .unwrap_or_default()),
        CONTEXT => Ok(render_context(scope.outputs, scope.max_context_bytes)),
        _ if name.starts_with(STEP_PREFIX) => {
            let key = &name[STEP_PREFIX.len()..];
            scope
                .outputs
                .iter()
                .find(|o| o.key == key)
                .map(|o| o.output.clone())
                .ok_or_else(|| TemplateError::UnknownStep {
                    key: key.to_string(),
                })
        }
        _ => scope
            .arguments
            .get(name)
            .cloned()
            .or_else(|| fallback.map(String::from))
            .or_else(|| {
                scope
                    .declared
                    .iter()
                    .any(|declared| declared == name)
                    .then(String::new)
            })
            .ok_or_else(|| TemplateError::MissingArgument {
                name: name.to_string(),
            }),
    }
}

/// Render accumulated outputs as `## key` sections, dropping the oldest
/// entries first when a byte limit is set. The newest entry is always kept.
pub fn render_context(outputs: &[StepOutput], max_bytes: Option<usize>) -> String {
    let sections: Vec<String> = outputs
        .iter()
        .map(|o| format!("## {}\n{}", o.key, o.output))
        .collect();

    let Some(limit) = max_bytes else {
        return sections.join("\n\n");
    };

    let mut kept: Vec<&String> = Vec::new();
    let mut used = 0;

    for section in sections.iter().rev() {
        let cost = section.len() + 2;

        if !kept.is_empty() && used + cost > limit {
            break;
        }
        used += cost;
        kept.push(section);
    }
    kept.reverse();

    let omitted = sections.len() - kept.len();
    let body = kept
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");

    if omitted == 0 {
        body
    } else {
        format!("[{} earlier step(s) omitted]\n\n{}", omitted, body)
    }
}
