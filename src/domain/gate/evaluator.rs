//! Pluggable criterion evaluation

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::entity::{Gate, GateId};
use super::review::GateReview;
use super::verdict::{CriterionEvidence, GateVerdict};
use crate::domain::DomainError;

/// Judges textual criteria against a candidate output.
///
/// Implementations return exactly one entry per criterion, in order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GateEvaluator: Send + Sync + std::fmt::Debug {
    async fn evaluate(
        &self,
        criteria: &[String],
        output: &str,
    ) -> Result<Vec<CriterionEvidence>, DomainError>;
}

/// What the chain executor needs from the gate registry
#[async_trait]
pub trait GateValidator: Send + Sync + std::fmt::Debug {
    /// Fetch a registered gate, NotFound if unknown
    async fn resolve(&self, id: &GateId) -> Result<Gate, DomainError>;

    /// Judge one output against one gate.
    ///
    /// A caller review, when given, replaces the evaluator for textual
    /// criteria; pass criteria are always checked mechanically.
    async fn evaluate_gate(
        &self,
        gate: &Gate,
        output: &str,
        review: Option<&GateReview>,
        step_index: usize,
        attempt: u32,
    ) -> Result<GateVerdict, DomainError>;
}
