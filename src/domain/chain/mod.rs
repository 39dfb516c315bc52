//! Chain domain - expression parsing, execution state and executor seams

mod executor;
mod expression;
mod state;

pub use executor::{
    ChainExecutor, ChainReport, GateRequirement, ResumeInput, StepInvocation, StepOutcome,
    StepRunner,
};
pub use expression::{
    ChainExpression, ChainStepSpec, InlineGateSpec, InlineStep, PromptStep, looks_like_invocation,
};
pub use state::{
    ChainExecutionState, ChainPhase, ChainRunId, ChainStatus, ChainSummary, StepAttempt, StepKind,
    StepPlan, StepRecord,
};

#[cfg(test)]
pub use executor::MockStepRunner;
