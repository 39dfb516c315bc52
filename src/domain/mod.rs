//! Domain layer - Core business logic and entities

pub mod chain;
pub mod error;
pub mod gate;
pub mod prompt;
pub mod storage;
pub mod validation;

pub use chain::{
    ChainExecutionState, ChainExecutor, ChainExpression, ChainPhase, ChainReport, ChainRunId,
    ChainStatus, ChainStepSpec, ChainSummary, ResumeInput, StepInvocation, StepOutcome, StepRunner,
};
pub use error::DomainError;
pub use gate::{
    CriterionEvidence, Gate, GateEvaluator, GateId, GateRepository, GateReview, GateValidator,
    GateVerdict, PassCriteria, Severity, VerdictSource,
};
pub use prompt::{
    ArgumentType, PromptArgument, PromptId, PromptRepository, PromptStore, PromptSummary,
    PromptTemplate, RenderedPrompt, StepOutput,
};
pub use storage::{Storage, StorageEntity, StorageKey};
pub use validation::{IdValidationError, validate_resource_id};
