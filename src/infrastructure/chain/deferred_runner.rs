//! Step runner for callers that produce outputs themselves

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::chain::{StepInvocation, StepOutcome, StepRunner};

/// Hands every rendered step back to the caller; outputs arrive through resume
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredStepRunner;

#[async_trait]
impl StepRunner for DeferredStepRunner {
    async fn run(&self, _invocation: &StepInvocation) -> Result<StepOutcome, DomainError> {
        Ok(StepOutcome::Deferred)
    }
}
