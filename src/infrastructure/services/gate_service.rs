//! Gate validator service - gate registry plus verdict production

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::DomainError;
use crate::domain::gate::{
    Gate, GateEvaluator, GateId, GateRepository, GateReview, GateSuggestion, GateValidator,
    GateVerdict, MAX_SUGGESTIONS, PassCriteria, Severity, VerdictSource, suggest_gates,
};
use crate::infrastructure::gate::ReviewEvaluator;
use crate::infrastructure::observability::record_gate_verdict;

/// Request to register a gate
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGateRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub pass_criteria: PassCriteria,
    #[serde(default)]
    pub triggers: Vec<String>,
}

impl CreateGateRequest {
    pub fn into_gate(self) -> Result<Gate, DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::validation("Gate 'id' is required"));
        }

        let severity = match self.severity.as_deref() {
            Some(s) => Severity::from_str(s)?,
            None => Severity::default(),
        };

        let gate = Gate::new(GateId::new(self.id)?, self.name, severity)
            .with_description(self.description)
            .with_criteria(self.criteria)
            .with_pass_criteria(self.pass_criteria)
            .with_triggers(self.triggers);

        gate.validate()?;
        Ok(gate)
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub criteria: Option<Vec<String>>,
    pub pass_criteria: Option<PassCriteria>,
    pub triggers: Option<Vec<String>>,
}

/// Gate registry and validator
#[derive(Debug)]
pub struct GateService<R: GateRepository> {
    repository: Arc<R>,
    evaluator: Arc<dyn GateEvaluator>,
}

impl<R: GateRepository> GateService<R> {
    pub fn new(repository: Arc<R>, evaluator: Arc<dyn GateEvaluator>) -> Self {
        Self {
            repository,
            evaluator,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Gate>, DomainError> {
        let gate_id = GateId::new(id)?;
        self.repository.get(&gate_id).await
    }

    pub async fn get_required(&self, id: &str) -> Result<Gate, DomainError> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Gate '{}' not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<Gate>, DomainError> {
        self.repository.list().await
    }

    pub async fn create(&self, request: CreateGateRequest) -> Result<Gate, DomainError> {
        let gate = self.repository.create(request.into_gate()?).await?;

        info!(gate_id = %gate.id(), severity = %gate.severity(), "Gate registered");
        Ok(gate)
    }

    /// Chains snapshot gates at start, so edits never affect running chains
    pub async fn update(&self, id: &str, request: UpdateGateRequest) -> Result<Gate, DomainError> {
        let mut gate = self.get_required(id).await?;

        if let Some(name) = request.name {
            gate.set_name(name);
        }
        if let Some(description) = request.description {
            gate.set_description(description);
        }
        if let Some(severity) = request.severity {
            gate.set_severity(Severity::from_str(&severity)?);
        }
        if let Some(criteria) = request.criteria {
            gate.set_criteria(criteria);
        }
        if let Some(pass_criteria) = request.pass_criteria {
            gate.set_pass_criteria(pass_criteria);
        }
        if let Some(triggers) = request.triggers {
            gate.set_triggers(triggers);
        }

        gate.validate()?;
        self.repository.update(gate).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), DomainError> {
        let gate_id = GateId::new(id)?;

        if !self.repository.delete(&gate_id).await? {
            return Err(DomainError::not_found(format!("Gate '{}' not found", id)));
        }

        info!(gate_id = %id, "Gate deleted");
        Ok(())
    }

    /// Gates matching the given kinds of work, at most three by default
    pub async fn suggest(
        &self,
        work_types: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<GateSuggestion>, DomainError> {
        let gates = self.repository.list().await?;
        Ok(suggest_gates(
            &gates,
            work_types,
            limit.unwrap_or(MAX_SUGGESTIONS).min(MAX_SUGGESTIONS),
        ))
    }

    /// Evaluate a standalone output against a registered gate
    pub async fn evaluate(&self, gate_id: &str, output: &str) -> Result<GateVerdict, DomainError> {
        let gate = self.get_required(gate_id).await?;
        self.evaluate_gate(&gate, output, None, 0, 1).await
    }

    /// Create or replace a definition loaded from the gate library
    pub async fn import(&self, gate: Gate) -> Result<bool, DomainError> {
        match self.repository.get(gate.id()).await? {
            None => {
                self.repository.create(gate).await?;
                Ok(true)
            }
            Some(existing) if same_definition(&existing, &gate) => Ok(false),
            Some(_) => {
                self.repository.update(gate).await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl<R: GateRepository> GateValidator for GateService<R> {
    async fn resolve(&self, id: &GateId) -> Result<Gate, DomainError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Gate '{}' not found", id)))
    }

    async fn evaluate_gate(
        &self,
        gate: &Gate,
        output: &str,
        review: Option<&GateReview>,
        step_index: usize,
        attempt: u32,
    ) -> Result<GateVerdict, DomainError> {
        let criteria = gate.criteria();

        let (mut evidence, source) = match review {
            Some(review) => (
                ReviewEvaluator::new(review.clone())
                    .evaluate(criteria, output)
                    .await?,
                VerdictSource::Review,
            ),
            None if criteria.is_empty() => (Vec::new(), VerdictSource::Evaluator),
            None => (
                self.evaluator.evaluate(criteria, output).await?,
                VerdictSource::Evaluator,
            ),
        };

        if evidence.len() != criteria.len() {
            return Err(DomainError::internal(format!(
                "Evaluator returned {} judgments for {} criteria of gate '{}'",
                evidence.len(),
                criteria.len(),
                gate.id()
            )));
        }

        evidence.extend(gate.pass_criteria().check(output));

        let verdict = GateVerdict::from_evidence(gate, evidence, source, step_index, attempt);
        record_gate_verdict(gate.severity().as_str(), verdict.passed(), source_label(source));

        if verdict.passed() {
            debug!(gate_id = %gate.id(), step_index, attempt, "Gate passed");
        } else {
            warn!(
                gate_id = %gate.id(),
                severity = %gate.severity(),
                step_index,
                attempt,
                reason = %verdict.failure_reason(),
                "Gate failed"
            );
        }

        Ok(verdict)
    }
}

fn source_label(source: VerdictSource) -> &'static str {
    match source {
        VerdictSource::Evaluator => "evaluator",
        VerdictSource::Review => "review",
        VerdictSource::Override => "override",
    }
}

fn same_definition(a: &Gate, b: &Gate) -> bool {
    a.name() == b.name()
        && a.description() == b.description()
        && a.severity() == b.severity()
        && a.criteria() == b.criteria()
        && a.pass_criteria() == b.pass_criteria()
        && a.triggers() == b.triggers()
}
