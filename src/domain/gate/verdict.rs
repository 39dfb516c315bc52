//! Gate verdicts, immutable once created

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{Gate, GateId, Severity};

/// Judgment of one criterion against an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionEvidence {
    pub criterion: String,
    pub satisfied: bool,
    pub evidence: String,
}

impl CriterionEvidence {
    pub fn new(criterion: impl Into<String>, satisfied: bool, evidence: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            satisfied,
            evidence: evidence.into(),
        }
    }
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// The configured evaluator judged the output
    Evaluator,
    /// The caller supplied a `GATE_REVIEW` line
    Review,
    /// The caller explicitly overrode a blocking failure
    Override,
}

/// Outcome of evaluating one gate against one step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    gate_id: GateId,
    gate_name: String,
    severity: Severity,
    passed: bool,
    evidence: Vec<CriterionEvidence>,
    source: VerdictSource,
    step_index: usize,
    attempt: u32,
    evaluated_at: DateTime<Utc>,
}

impl GateVerdict {
    /// Passed only when every criterion is satisfied
    pub fn from_evidence(
        gate: &Gate,
        evidence: Vec<CriterionEvidence>,
        source: VerdictSource,
        step_index: usize,
        attempt: u32,
    ) -> Self {
        let passed = evidence.iter().all(|e| e.satisfied);

        Self {
            gate_id: gate.id().clone(),
            gate_name: gate.name().to_string(),
            severity: gate.severity(),
            passed,
            evidence,
            source,
            step_index,
            attempt,
            evaluated_at: Utc::now(),
        }
    }

    /// New passing verdict recording that the caller overrode `failed`
    pub fn overriding(failed: &GateVerdict) -> Self {
        let unmet = failed
            .unmet_criteria()
            .map(|e| e.criterion.clone())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            gate_id: failed.gate_id.clone(),
            gate_name: failed.gate_name.clone(),
            severity: failed.severity,
            passed: true,
            evidence: vec![CriterionEvidence::new(
                "caller override",
                true,
                format!("overrode unmet criteria: {}", unmet),
            )],
            source: VerdictSource::Override,
            step_index: failed.step_index,
            attempt: failed.attempt,
            evaluated_at: Utc::now(),
        }
    }

    pub fn gate_id(&self) -> &GateId {
        &self.gate_id
    }

    pub fn gate_name(&self) -> &str {
        &self.gate_name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// A failed critical/high verdict halts the chain
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity.blocks()
    }

    pub fn evidence(&self) -> &[CriterionEvidence] {
        &self.evidence
    }

    pub fn unmet_criteria(&self) -> impl Iterator<Item = &CriterionEvidence> {
        self.evidence.iter().filter(|e| !e.satisfied)
    }

    pub fn source(&self) -> VerdictSource {
        self.source
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// Short human-readable reason for a failure
    pub fn failure_reason(&self) -> String {
        let unmet: Vec<String> = self
            .unmet_criteria()
            .map(|e| format!("{} ({})", e.criterion, e.evidence))
            .collect();

        if unmet.is_empty() {
            "all criteria satisfied".to_string()
        } else {
            format!("unmet: {}", unmet.join("; "))
        }
    }
}
