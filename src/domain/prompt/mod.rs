//! Prompt registry domain - templates, argument schemas and rendering

mod entity;
mod matching;
mod repository;
mod template;

pub use entity::{
    ArgumentType, PromptArgument, PromptId, PromptSummary, PromptTemplate, RenderedPrompt,
};
pub use matching::{PromptMatch, rank_prompts, score_prompt};
pub use repository::{PromptRepository, PromptStore};
pub use template::{
    MessageTemplate, Placeholder, RenderScope, StepOutput, TemplateError, render_context,
};

#[cfg(test)]
pub use repository::MockPromptRepository;
