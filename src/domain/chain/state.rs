//! Persisted chain execution state and its linear state machine

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainError;
use crate::domain::gate::{Gate, GateId, GateVerdict};
use crate::domain::prompt::{PromptId, StepOutput};
use crate::domain::storage::{StorageEntity, StorageKey};

const CHAIN_ID_PREFIX: &str = "chain-";
const MAX_CHAIN_ID_LENGTH: usize = 80;

/// Opaque chain identifier handed to callers for resume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainRunId(String);

impl ChainRunId {
    pub fn generate() -> Self {
        Self(format!("{}{}", CHAIN_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();

        let valid = !id.is_empty()
            && id.len() <= MAX_CHAIN_ID_LENGTH
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(DomainError::invalid_id(format!("Invalid chain id '{}'", id)));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainRunId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainRunId> for String {
    fn from(id: ChainRunId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StorageKey for ChainRunId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Registered prompt, pinned to the content hash seen at chain start
    Prompt {
        prompt_id: PromptId,
        content_hash: String,
    },
    Inline {
        directive: String,
    },
}

/// A step resolved at chain start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    pub index: usize,
    /// Context key this step's output is stored under
    pub key: String,
    pub kind: StepKind,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    /// Gate snapshots, registered and inline
    #[serde(default)]
    pub gates: Vec<Gate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainPhase {
    Pending,
    RunningStep {
        index: usize,
    },
    AwaitingGate {
        index: usize,
    },
    Completed,
    Failed {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gate_id: Option<GateId>,
        reason: String,
    },
    Aborted {
        reason: String,
    },
}

impl ChainPhase {
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::RunningStep { index } | Self::AwaitingGate { index } => Some(*index),
            Self::Failed { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

impl fmt::Display for ChainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::RunningStep { index } => write!(f, "running_step[{}]", index),
            Self::AwaitingGate { index } => write!(f, "awaiting_gate[{}]", index),
            Self::Completed => write!(f, "completed"),
            Self::Failed { index, .. } => write!(f, "failed[{}]", index),
            Self::Aborted { .. } => write!(f, "aborted"),
        }
    }
}

/// Caller-facing status derived from the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub attempt: u32,
    pub output: String,
    pub submitted_at: DateTime<Utc>,
}

/// Everything recorded for one step; attempts and verdicts are append-only
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    #[serde(default)]
    pub attempts: Vec<StepAttempt>,
    #[serde(default)]
    pub verdicts: Vec<GateVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.attempts.last().map(|a| a.attempt).unwrap_or(0)
    }

    pub fn latest_output(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.output.as_str())
    }

    /// Verdicts recorded against the latest attempt
    pub fn latest_verdicts(&self) -> Vec<&GateVerdict> {
        let attempt = self.current_attempt();
        self.verdicts
            .iter()
            .filter(|v| v.attempt() == attempt)
            .collect()
    }
}

/// Compact listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainSummary {
    pub chain_id: String,
    pub expression: String,
    pub status: ChainStatus,
    pub phase: String,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    pub updated_at: DateTime<Utc>,
}

/// Full execution state of one chain, persisted after every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecutionState {
    id: ChainRunId,
    expression: String,
    steps: Vec<StepPlan>,
    phase: ChainPhase,
    #[serde(default)]
    suspended: bool,
    #[serde(default)]
    context: Vec<StepOutput>,
    records: Vec<StepRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    revision: u64,
}

impl StorageEntity for ChainExecutionState {
    type Key = ChainRunId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

impl ChainExecutionState {
    pub fn new(
        id: ChainRunId,
        expression: impl Into<String>,
        steps: Vec<StepPlan>,
    ) -> Result<Self, DomainError> {
        if steps.is_empty() {
            return Err(DomainError::validation("a chain needs at least one step"));
        }

        let now = Utc::now();
        let records = (0..steps.len()).map(StepRecord::new).collect();

        Ok(Self {
            id,
            expression: expression.into(),
            steps,
            phase: ChainPhase::Pending,
            suspended: false,
            context: Vec::new(),
            records,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    // Getters

    pub fn id(&self) -> &ChainRunId {
        &self.id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn steps(&self) -> &[StepPlan] {
        &self.steps
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn phase(&self) -> &ChainPhase {
        &self.phase
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Outputs of accepted steps, in order
    pub fn context(&self) -> &[StepOutput] {
        &self.context
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&StepRecord> {
        self.records.get(index)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn status(&self) -> ChainStatus {
        match &self.phase {
            ChainPhase::Completed => ChainStatus::Completed,
            ChainPhase::Failed { .. } => ChainStatus::Failed,
            ChainPhase::Aborted { .. } => ChainStatus::Aborted,
            _ if self.suspended => ChainStatus::Paused,
            _ => ChainStatus::InProgress,
        }
    }

    pub fn current_step(&self) -> Option<usize> {
        self.phase.index()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Distinct prompts referenced by this chain
    pub fn prompt_ids(&self) -> Vec<PromptId> {
        let mut ids: Vec<PromptId> = Vec::new();

        for step in &self.steps {
            if let StepKind::Prompt { prompt_id, .. } = &step.kind {
                if !ids.contains(prompt_id) {
                    ids.push(prompt_id.clone());
                }
            }
        }
        ids
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            chain_id: self.id.to_string(),
            expression: self.expression.clone(),
            status: self.status(),
            phase: self.phase.to_string(),
            total_steps: self.steps.len(),
            current_step: self.current_step(),
            updated_at: self.updated_at,
        }
    }

    // Transitions

    /// `pending -> running_step[0]`
    pub fn start(&mut self) -> Result<(), DomainError> {
        match self.phase {
            ChainPhase::Pending => {
                self.enter_step(0);
                Ok(())
            }
            _ => Err(self.illegal("start")),
        }
    }

    /// `running_step[i] -> awaiting_gate[i]`
    pub fn record_output(&mut self, output: impl Into<String>) -> Result<usize, DomainError> {
        match self.phase {
            ChainPhase::RunningStep { index } => {
                self.push_attempt(index, output.into());
                self.phase = ChainPhase::AwaitingGate { index };
                self.suspended = false;
                Ok(index)
            }
            _ => Err(self.illegal("record a step output")),
        }
    }

    /// Append verdicts for the step awaiting its gates
    pub fn record_verdicts(&mut self, verdicts: Vec<GateVerdict>) -> Result<(), DomainError> {
        match self.phase {
            ChainPhase::AwaitingGate { index } => {
                self.records[index].verdicts.extend(verdicts);
                Ok(())
            }
            _ => Err(self.illegal("record verdicts")),
        }
    }

    /// `awaiting_gate[i] -> running_step[i+1]`, or `completed` after the last step
    pub fn accept_step(&mut self) -> Result<(), DomainError> {
        let ChainPhase::AwaitingGate { index } = self.phase else {
            return Err(self.illegal("accept a step"));
        };

        let output = self.records[index]
            .latest_output()
            .map(String::from)
            .ok_or_else(|| DomainError::internal(format!("step {} has no output", index)))?;

        self.context
            .push(StepOutput::new(self.steps[index].key.clone(), output));
        self.records[index].accepted_at = Some(Utc::now());
        self.suspended = false;

        if index + 1 < self.steps.len() {
            self.enter_step(index + 1);
        } else {
            self.phase = ChainPhase::Completed;
        }
        Ok(())
    }

    /// `awaiting_gate[i] -> failed[i]` on a blocking gate failure
    pub fn fail_gate(&mut self, gate_id: GateId, reason: impl Into<String>) -> Result<(), DomainError> {
        match self.phase {
            ChainPhase::AwaitingGate { index } => {
                self.phase = ChainPhase::Failed {
                    index,
                    gate_id: Some(gate_id),
                    reason: reason.into(),
                };
                self.suspended = false;
                Ok(())
            }
            _ => Err(self.illegal("fail on a gate")),
        }
    }

    /// `running_step[i] -> failed[i]` when producing the output errored
    pub fn fail_step(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        match self.phase {
            ChainPhase::RunningStep { index } => {
                self.phase = ChainPhase::Failed {
                    index,
                    gate_id: None,
                    reason: reason.into(),
                };
                self.suspended = false;
                Ok(())
            }
            _ => Err(self.illegal("fail a step")),
        }
    }

    /// Gate-blocked `failed[i] -> awaiting_gate[i]` with a revised output
    pub fn retry_with_output(&mut self, output: impl Into<String>) -> Result<(), DomainError> {
        let index = self.gate_blocked_index("retry")?;
        self.push_attempt(index, output.into());
        self.phase = ChainPhase::AwaitingGate { index };
        Ok(())
    }

    /// Gate-blocked `failed[i] -> awaiting_gate[i]` to re-judge the same output
    pub fn reopen_gate(&mut self) -> Result<(), DomainError> {
        let index = self.gate_blocked_index("re-review")?;
        self.phase = ChainPhase::AwaitingGate { index };
        Ok(())
    }

    /// Gate-blocked `failed[i]`: append override verdicts and accept the output
    pub fn accept_overridden(&mut self, overrides: Vec<GateVerdict>) -> Result<(), DomainError> {
        let index = self.gate_blocked_index("override")?;
        self.records[index].verdicts.extend(overrides);
        self.phase = ChainPhase::AwaitingGate { index };
        self.accept_step()
    }

    /// Step-error `failed[i] -> running_step[i]`
    pub fn restart_step(&mut self) -> Result<(), DomainError> {
        match self.phase {
            ChainPhase::Failed {
                index,
                gate_id: None,
                ..
            } => {
                self.phase = ChainPhase::RunningStep { index };
                Ok(())
            }
            _ => Err(self.illegal("restart a step")),
        }
    }

    /// Any non-terminal phase -> `aborted`
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.phase.is_terminal() {
            return Err(self.illegal("abort"));
        }
        self.phase = ChainPhase::Aborted {
            reason: reason.into(),
        };
        self.suspended = false;
        Ok(())
    }

    /// Mark the chain as waiting on the caller
    pub fn suspend(&mut self) {
        if !self.phase.is_terminal() {
            self.suspended = true;
        }
    }

    /// Bump revision and timestamp before a write
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    fn enter_step(&mut self, index: usize) {
        self.phase = ChainPhase::RunningStep { index };
        self.records[index].started_at.get_or_insert_with(Utc::now);
    }

    fn push_attempt(&mut self, index: usize, output: String) {
        let record = &mut self.records[index];
        let attempt = record.current_attempt() + 1;

        record.attempts.push(StepAttempt {
            attempt,
            output,
            submitted_at: Utc::now(),
        });
    }

    fn gate_blocked_index(&self, action: &str) -> Result<usize, DomainError> {
        match self.phase {
            ChainPhase::Failed {
                index,
                gate_id: Some(_),
                ..
            } => Ok(index),
            _ => Err(self.illegal(action)),
        }
    }

    fn illegal(&self, action: &str) -> DomainError {
        DomainError::validation(format!(
            "Cannot {} while chain '{}' is {}",
            action, self.id, self.phase
        ))
    }
}
