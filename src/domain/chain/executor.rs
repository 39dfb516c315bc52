//! Chain executor seams - step runner capability and the executor contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use super::expression::ChainExpression;
use super::state::{ChainExecutionState, ChainRunId, ChainStatus, ChainSummary};
use crate::domain::gate::{Gate, GateVerdict, PassCriteria};
use crate::domain::prompt::StepOutput;
use crate::domain::DomainError;

/// What a caller must satisfy for a step's output to pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRequirement {
    pub gate_id: String,
    pub name: String,
    pub severity: String,
    pub criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "PassCriteria::is_empty")]
    pub pass_criteria: PassCriteria,
}

impl From<&Gate> for GateRequirement {
    fn from(gate: &Gate) -> Self {
        Self {
            gate_id: gate.id().to_string(),
            name: gate.name().to_string(),
            severity: gate.severity().to_string(),
            criteria: gate.criteria().to_vec(),
            pass_criteria: gate.pass_criteria().clone(),
        }
    }
}

/// A rendered step ready to be run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInvocation {
    pub chain_id: String,
    pub index: usize,
    pub key: String,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    pub user_message: String,
    #[serde(default)]
    pub gates: Vec<GateRequirement>,
}

/// Result of asking a runner for a step output
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(String),
    /// The output will arrive later through resume
    Deferred,
}

/// Capability that produces a step's output
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StepRunner: Send + Sync + std::fmt::Debug {
    async fn run(&self, invocation: &StepInvocation) -> Result<StepOutcome, DomainError>;
}

/// Caller input when continuing a chain
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResumeInput {
    #[serde(default)]
    pub user_response: Option<String>,
    #[serde(default)]
    pub gate_verdict: Option<String>,
    #[serde(default)]
    pub gate_override: bool,
}

impl ResumeInput {
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            user_response: Some(response.into()),
            ..Default::default()
        }
    }

    pub fn with_review(review: impl Into<String>) -> Self {
        Self {
            gate_verdict: Some(review.into()),
            ..Default::default()
        }
    }

    pub fn overriding() -> Self {
        Self {
            gate_override: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_response.is_none() && self.gate_verdict.is_none() && !self.gate_override
    }
}

/// Caller-facing view of a chain after an operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub chain_id: String,
    pub expression: String,
    pub status: ChainStatus,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_prompt: Option<StepInvocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gates_pending: Vec<GateRequirement>,
    pub verdicts: Vec<GateVerdict>,
    pub context: Vec<StepOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub revision: u64,
}

impl ChainReport {
    pub fn from_state(state: &ChainExecutionState) -> Self {
        use super::state::ChainPhase;

        let message = match state.phase() {
            ChainPhase::Failed { reason, .. } | ChainPhase::Aborted { reason } => {
                Some(reason.clone())
            }
            _ => None,
        };

        Self {
            chain_id: state.id().to_string(),
            expression: state.expression().to_string(),
            status: state.status(),
            phase: state.phase().to_string(),
            current_step: state.current_step(),
            total_steps: state.total_steps(),
            next_prompt: None,
            gates_pending: Vec::new(),
            verdicts: state
                .records()
                .iter()
                .flat_map(|r| r.verdicts.iter().cloned())
                .collect(),
            context: state.context().to_vec(),
            message,
            revision: state.revision(),
        }
    }

    pub fn with_next_prompt(mut self, invocation: StepInvocation) -> Self {
        self.next_prompt = Some(invocation);
        self
    }

    pub fn with_gates_pending(mut self, gates: Vec<GateRequirement>) -> Self {
        self.gates_pending = gates;
        self
    }
}

/// Executes and resumes chains
#[async_trait]
pub trait ChainExecutor: Send + Sync + std::fmt::Debug {
    /// Parse with this executor's limits without running anything
    fn parse(&self, expression: &str) -> Result<ChainExpression, DomainError>;

    /// Parse, resolve and drive a new chain as far as it can go
    async fn execute(&self, expression: &str) -> Result<ChainReport, DomainError>;

    /// Continue a stored chain from its persisted phase
    async fn resume(&self, id: &ChainRunId, input: ResumeInput) -> Result<ChainReport, DomainError>;

    async fn abort(&self, id: &ChainRunId, reason: &str) -> Result<ChainReport, DomainError>;

    async fn status(&self, id: &ChainRunId) -> Result<ChainReport, DomainError>;

    async fn list(&self) -> Result<Vec<ChainSummary>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::state::{StepKind, StepPlan};
    use std::collections::BTreeMap;

    #[test]
    fn test_resume_input_from_json() {
        let input: ResumeInput =
            serde_json::from_str(r#"{"user_response": "done", "gate_override": true}"#).unwrap();

        assert_eq!(input.user_response.as_deref(), Some("done"));
        assert!(input.gate_override);
        assert!(input.gate_verdict.is_none());
        assert!(!input.is_empty());
        assert!(ResumeInput::default().is_empty());
    }

    #[test]
    fn test_report_from_state() {
        let steps = vec![StepPlan {
            index: 0,
            key: "step_1".to_string(),
            kind: StepKind::Inline {
                directive: "summarize".to_string(),
            },
            arguments: BTreeMap::new(),
            gates: Vec::new(),
        }];
        let mut state =
            ChainExecutionState::new(ChainRunId::generate(), "summarize", steps).unwrap();
        state.start().unwrap();
        state.abort("stopped").unwrap();

        let report = ChainReport::from_state(&state);
        assert_eq!(report.status, ChainStatus::Aborted);
        assert_eq!(report.phase, "aborted");
        assert_eq!(report.message.as_deref(), Some("stopped"));
        assert_eq!(report.total_steps, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "aborted");
        assert!(json.get("next_prompt").is_none());
    }
}
