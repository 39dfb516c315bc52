//! Chain executor implementation

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::chain::{
    ChainExecutionState, ChainExecutor, ChainExpression, ChainPhase, ChainReport, ChainRunId,
    ChainStepSpec, ChainSummary, GateRequirement, InlineGateSpec, ResumeInput, StepInvocation,
    StepKind, StepOutcome, StepPlan, StepRunner,
};
use crate::domain::gate::{Gate, GateReview, GateValidator, GateVerdict, Severity};
use crate::domain::prompt::{PromptStore, render_context};
use crate::domain::{DomainError, Storage};
use crate::infrastructure::observability::{
    record_chain_blocked, record_chain_finished, record_chain_step,
};

/// Configuration for the chain executor
#[derive(Debug, Clone)]
pub struct ChainExecutorConfig {
    /// Longest chain the parser accepts
    pub max_steps: usize,

    /// Byte budget for accumulated context injected into a step
    pub max_context_bytes: usize,

    /// Pause at every gated step until the caller sends a review
    pub require_gate_review: bool,

    /// Severity given to quoted criteria written inline in an expression
    pub inline_gate_severity: Severity,
}

impl Default for ChainExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_context_bytes: 64 * 1024,
            require_gate_review: false,
            inline_gate_severity: Severity::High,
        }
    }
}

/// Caller input still to be consumed while driving a chain
#[derive(Debug, Default)]
struct PendingInput {
    response: Option<String>,
    review: Option<GateReview>,
    override_gates: bool,
}

type ChainLocks = Mutex<HashMap<ChainRunId, Arc<AsyncMutex<()>>>>;

/// Drives chains one transition at a time, persisting after each
#[derive(Debug)]
pub struct ChainExecutorImpl {
    prompts: Arc<dyn PromptStore>,
    gates: Arc<dyn GateValidator>,
    runner: Arc<dyn StepRunner>,
    storage: Arc<dyn Storage<ChainExecutionState>>,
    config: ChainExecutorConfig,

    /// One async lock per chain id; operations on a chain never interleave
    locks: ChainLocks,
}

impl ChainExecutorImpl {
    pub fn new(
        prompts: Arc<dyn PromptStore>,
        gates: Arc<dyn GateValidator>,
        runner: Arc<dyn StepRunner>,
        storage: Arc<dyn Storage<ChainExecutionState>>,
    ) -> Self {
        Self::with_config(prompts, gates, runner, storage, ChainExecutorConfig::default())
    }

    pub fn with_config(
        prompts: Arc<dyn PromptStore>,
        gates: Arc<dyn GateValidator>,
        runner: Arc<dyn StepRunner>,
        storage: Arc<dyn Storage<ChainExecutionState>>,
        config: ChainExecutorConfig,
    ) -> Self {
        Self {
            prompts,
            gates,
            runner,
            storage,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ChainExecutorConfig {
        &self.config
    }

    // Locking

    fn chain_lock(&self, id: &ChainRunId) -> Result<Arc<AsyncMutex<()>>, DomainError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DomainError::internal("chain lock table poisoned"))?;

        Ok(locks.entry(id.clone()).or_default().clone())
    }

    fn prune_lock(&self, id: &ChainRunId) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }

    // Planning

    /// Resolve every prompt and gate up front so unknown ids fail before any effect
    async fn plan(&self, expression: &ChainExpression) -> Result<Vec<StepPlan>, DomainError> {
        let mut steps = Vec::with_capacity(expression.len());
        let mut keys: HashSet<String> = HashSet::new();
        let mut inline_ordinal = 0;

        for (index, spec) in expression.steps().iter().enumerate() {
            let (base_key, kind, arguments, mut gates) = match spec {
                ChainStepSpec::Prompt(step) => {
                    let template = self.prompts.resolve(&step.prompt_id).await?;
                    let bound = template.bind_arguments(&step.positional, &step.named)?;

                    let mut gates = Vec::with_capacity(template.gates().len());
                    for gate_id in template.gates() {
                        gates.push(self.gates.resolve(gate_id).await?);
                    }

                    let kind = StepKind::Prompt {
                        prompt_id: step.prompt_id.clone(),
                        content_hash: template.content_hash().to_string(),
                    };
                    let arguments: BTreeMap<String, String> = bound.into_iter().collect();

                    (step.prompt_id.to_string(), kind, arguments, gates)
                }
                ChainStepSpec::Inline(step) => {
                    let kind = StepKind::Inline {
                        directive: step.directive.clone(),
                    };
                    (format!("step_{}", index + 1), kind, BTreeMap::new(), Vec::new())
                }
            };

            for gate_spec in spec.gates() {
                let gate = match gate_spec {
                    InlineGateSpec::Criteria { text } => {
                        inline_ordinal += 1;
                        Gate::inline(inline_ordinal, text.clone(), self.config.inline_gate_severity)
                    }
                    InlineGateSpec::Reference { id } => self.gates.resolve(id).await?,
                };

                if !gates.iter().any(|g| g.id() == gate.id()) {
                    gates.push(gate);
                }
            }

            steps.push(StepPlan {
                index,
                key: unique_key(&mut keys, base_key),
                kind,
                arguments,
                gates,
            });
        }

        Ok(steps)
    }

    /// Render the messages for a step against the accumulated context
    async fn invocation(
        &self,
        state: &ChainExecutionState,
        index: usize,
    ) -> Result<StepInvocation, DomainError> {
        let step = state.steps().get(index).ok_or_else(|| {
            DomainError::internal(format!("Chain '{}' has no step {}", state.id(), index))
        })?;

        let (system_message, user_message) = match &step.kind {
            StepKind::Prompt {
                prompt_id,
                content_hash,
            } => {
                let template = self.prompts.resolve(prompt_id).await?;

                if template.content_hash() != content_hash {
                    return Err(DomainError::conflict(format!(
                        "Prompt '{}' changed after chain '{}' started",
                        prompt_id,
                        state.id()
                    )));
                }

                let arguments: HashMap<String, String> = step
                    .arguments
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let rendered = template.render(
                    &arguments,
                    state.context(),
                    Some(self.config.max_context_bytes),
                )?;

                (rendered.system_message, rendered.user_message)
            }
            StepKind::Inline { directive } => {
                let user_message = if state.context().is_empty() {
                    directive.clone()
                } else {
                    let context =
                        render_context(state.context(), Some(self.config.max_context_bytes));
                    format!("{}\n\n{}", context, directive)
                };
                (None, user_message)
            }
        };

        Ok(StepInvocation {
            chain_id: state.id().to_string(),
            index,
            key: step.key.clone(),
            total_steps: state.total_steps(),
            system_message,
            user_message,
            gates: step.gates.iter().map(GateRequirement::from).collect(),
        })
    }

    // Driving

    /// Advance a chain until it completes, fails or waits on the caller
    async fn drive(
        &self,
        state: &mut ChainExecutionState,
        mut input: PendingInput,
    ) -> Result<ChainReport, DomainError> {
        loop {
            match state.phase().clone() {
                ChainPhase::Pending => {
                    state.start()?;
                    self.persist(state).await?;
                }
                ChainPhase::RunningStep { index } => {
                    let output = match input.response.take() {
                        Some(response) => response,
                        None => {
                            let invocation = match self.invocation(state, index).await {
                                Ok(invocation) => invocation,
                                Err(e) => return self.fail_step(state, e).await,
                            };

                            match self.runner.run(&invocation).await {
                                Ok(StepOutcome::Completed(output)) => output,
                                Ok(StepOutcome::Deferred) => {
                                    state.suspend();
                                    self.persist(state).await?;
                                    debug!(chain_id = %state.id(), index, "Waiting for step output");
                                    return Ok(
                                        ChainReport::from_state(state).with_next_prompt(invocation)
                                    );
                                }
                                Err(e) => return self.fail_step(state, e).await,
                            }
                        }
                    };

                    state.record_output(output)?;
                    self.persist(state).await?;
                }
                ChainPhase::AwaitingGate { index } => {
                    if let Some(report) = self.judge(state, index, &mut input).await? {
                        return Ok(report);
                    }
                }
                ChainPhase::Completed => {
                    self.release_prompts(state).await;
                    record_chain_finished("completed", state.total_steps());
                    info!(chain_id = %state.id(), steps = state.total_steps(), "Chain completed");
                    return Ok(ChainReport::from_state(state));
                }
                ChainPhase::Failed { .. } | ChainPhase::Aborted { .. } => {
                    return Ok(ChainReport::from_state(state));
                }
            }
        }
    }

    /// Evaluate the gates of a step awaiting them; Some when the chain stops here
    async fn judge(
        &self,
        state: &mut ChainExecutionState,
        index: usize,
        input: &mut PendingInput,
    ) -> Result<Option<ChainReport>, DomainError> {
        let gates = state.steps()[index].gates.clone();

        if gates.is_empty() {
            self.accept(state, index).await?;
            return Ok(None);
        }

        let review = input.review.take();
        let override_gates = std::mem::take(&mut input.override_gates);

        if review.is_none() && !override_gates && self.config.require_gate_review {
            state.suspend();
            self.persist(state).await?;
            debug!(chain_id = %state.id(), index, "Waiting for gate review");

            let pending = gates.iter().map(GateRequirement::from).collect();
            return Ok(Some(
                ChainReport::from_state(state).with_gates_pending(pending),
            ));
        }

        let record = state.record(index).ok_or_else(|| {
            DomainError::internal(format!("Chain '{}' has no record for step {}", state.id(), index))
        })?;
        let output = record
            .latest_output()
            .map(String::from)
            .ok_or_else(|| DomainError::internal(format!("Step {} has no output to judge", index)))?;
        let attempt = record.current_attempt();

        let mut verdicts = Vec::with_capacity(gates.len());
        for gate in &gates {
            verdicts.push(
                self.gates
                    .evaluate_gate(gate, &output, review.as_ref(), index, attempt)
                    .await?,
            );
        }

        let blocking: Vec<GateVerdict> = verdicts
            .iter()
            .filter(|v| v.is_blocking())
            .cloned()
            .collect();
        state.record_verdicts(verdicts)?;

        if let Some(first) = blocking.first() {
            if override_gates {
                warn!(
                    chain_id = %state.id(),
                    index,
                    gates = blocking.len(),
                    "Blocking gates overridden by caller"
                );
                state.record_verdicts(blocking.iter().map(GateVerdict::overriding).collect())?;
            } else {
                let reason = blocking
                    .iter()
                    .map(|v| format!("gate '{}' {}", v.gate_id(), v.failure_reason()))
                    .collect::<Vec<_>>()
                    .join("; ");

                state.fail_gate(first.gate_id().clone(), reason)?;
                self.persist(state).await?;
                record_chain_blocked("gate");
                warn!(chain_id = %state.id(), index, gate_id = %first.gate_id(), "Chain blocked by gate");

                return Ok(Some(ChainReport::from_state(state)));
            }
        }

        self.accept(state, index).await?;
        Ok(None)
    }

    async fn accept(&self, state: &mut ChainExecutionState, index: usize) -> Result<(), DomainError> {
        state.accept_step()?;
        record_chain_step(kind_label(&state.steps()[index].kind));
        debug!(chain_id = %state.id(), index, "Step accepted");
        self.persist(state).await
    }

    async fn fail_step(
        &self,
        state: &mut ChainExecutionState,
        error: DomainError,
    ) -> Result<ChainReport, DomainError> {
        warn!(chain_id = %state.id(), error = %error, "Step failed");

        state.fail_step(error.to_string())?;
        self.persist(state).await?;
        record_chain_blocked("step");

        Ok(ChainReport::from_state(state))
    }

    // Persistence

    async fn persist(&self, state: &mut ChainExecutionState) -> Result<(), DomainError> {
        state.touch();
        self.storage.save(state.clone()).await?;
        Ok(())
    }

    async fn load(&self, id: &ChainRunId) -> Result<ChainExecutionState, DomainError> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Chain '{}' not found", id)))
    }

    async fn release_prompts(&self, state: &ChainExecutionState) {
        if let Err(e) = self
            .prompts
            .release(&state.prompt_ids(), state.id().as_str())
            .await
        {
            warn!(chain_id = %state.id(), error = %e, "Failed to release prompts");
        }
    }

    async fn resume_locked(
        &self,
        id: &ChainRunId,
        mut input: PendingInput,
    ) -> Result<ChainReport, DomainError> {
        let mut state = self.load(id).await?;

        match state.phase().clone() {
            ChainPhase::Completed | ChainPhase::Aborted { .. } => {
                return Err(DomainError::validation(format!(
                    "Chain '{}' is already {}",
                    id,
                    state.status()
                )));
            }
            ChainPhase::Failed {
                index,
                gate_id: Some(gate_id),
                reason,
            } => {
                if let Some(response) = input.response.take() {
                    state.retry_with_output(response)?;
                } else if input.override_gates {
                    input.override_gates = false;

                    let overrides = state
                        .record(index)
                        .map(|r| {
                            r.latest_verdicts()
                                .into_iter()
                                .filter(|v| v.is_blocking())
                                .map(GateVerdict::overriding)
                                .collect()
                        })
                        .unwrap_or_default();

                    state.accept_overridden(overrides)?;
                    record_chain_step(kind_label(&state.steps()[index].kind));
                    warn!(chain_id = %id, index, gate_id = %gate_id, "Gate failure overridden by caller");
                } else if input.review.is_some() {
                    state.reopen_gate()?;
                } else {
                    return Err(DomainError::gate_blocked(
                        id.as_str(),
                        index,
                        gate_id.as_str(),
                        reason,
                    ));
                }
                self.persist(&mut state).await?;
            }
            ChainPhase::Failed { gate_id: None, .. } => {
                state.restart_step()?;
                self.persist(&mut state).await?;
            }
            ChainPhase::AwaitingGate { index } if input.response.is_some() => {
                return Err(DomainError::validation(format!(
                    "Step {} of chain '{}' already has an output awaiting its gates; send gate_verdict or gate_override",
                    index, id
                )));
            }
            _ => {}
        }

        debug!(chain_id = %id, phase = %state.phase(), "Chain resumed");
        self.drive(&mut state, input).await
    }
}

#[async_trait]
impl ChainExecutor for ChainExecutorImpl {
    fn parse(&self, expression: &str) -> Result<ChainExpression, DomainError> {
        ChainExpression::parse_with_limit(expression, self.config.max_steps)
    }

    #[instrument(skip(self))]
    async fn execute(&self, expression: &str) -> Result<ChainReport, DomainError> {
        let parsed = self.parse(expression)?;
        let steps = self.plan(&parsed).await?;

        let id = ChainRunId::generate();
        let mut state = ChainExecutionState::new(id.clone(), parsed.source(), steps)?;

        let prompt_ids = state.prompt_ids();
        if let Err(e) = self.prompts.acquire(&prompt_ids, id.as_str()).await {
            self.release_prompts(&state).await;
            return Err(e);
        }

        info!(chain_id = %id, steps = state.total_steps(), "Chain started");

        let lock = self.chain_lock(&id)?;
        let result = {
            let _guard = lock.lock().await;
            match self.persist(&mut state).await {
                Ok(()) => self.drive(&mut state, PendingInput::default()).await,
                Err(e) => {
                    self.release_prompts(&state).await;
                    Err(e)
                }
            }
        };
        drop(lock);
        self.prune_lock(&id);

        result
    }

    #[instrument(skip(self, input), fields(chain_id = %id))]
    async fn resume(&self, id: &ChainRunId, input: ResumeInput) -> Result<ChainReport, DomainError> {
        // A malformed review is rejected before anything is touched
        let review = input
            .gate_verdict
            .as_deref()
            .map(GateReview::parse)
            .transpose()?;

        let pending = PendingInput {
            response: input.user_response,
            review,
            override_gates: input.gate_override,
        };

        let lock = self.chain_lock(id)?;
        let result = {
            let _guard = lock.lock().await;
            self.resume_locked(id, pending).await
        };
        drop(lock);
        self.prune_lock(id);

        result
    }

    #[instrument(skip(self), fields(chain_id = %id))]
    async fn abort(&self, id: &ChainRunId, reason: &str) -> Result<ChainReport, DomainError> {
        let reason = match reason.trim() {
            "" => "aborted by caller",
            trimmed => trimmed,
        };

        let lock = self.chain_lock(id)?;
        let result = async {
            let _guard = lock.lock().await;

            let mut state = self.load(id).await?;
            state.abort(reason)?;
            self.persist(&mut state).await?;
            self.release_prompts(&state).await;
            record_chain_finished("aborted", state.total_steps());
            info!(chain_id = %id, reason = %reason, "Chain aborted");

            Ok::<_, DomainError>(ChainReport::from_state(&state))
        }
        .await;
        drop(lock);
        self.prune_lock(id);

        result
    }

    async fn status(&self, id: &ChainRunId) -> Result<ChainReport, DomainError> {
        let state = self.load(id).await?;
        let report = ChainReport::from_state(&state);

        if !state.is_suspended() {
            return Ok(report);
        }

        Ok(match state.phase() {
            ChainPhase::RunningStep { index } => match self.invocation(&state, *index).await {
                Ok(invocation) => report.with_next_prompt(invocation),
                Err(_) => report,
            },
            ChainPhase::AwaitingGate { index } => {
                let pending = state.steps()[*index]
                    .gates
                    .iter()
                    .map(GateRequirement::from)
                    .collect();
                report.with_gates_pending(pending)
            }
            _ => report,
        })
    }

    async fn list(&self) -> Result<Vec<ChainSummary>, DomainError> {
        let mut summaries: Vec<ChainSummary> = self
            .storage
            .list()
            .await?
            .iter()
            .map(ChainExecutionState::summary)
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

/// Context keys are unique across the chain; a taken key gets the first
/// free `_2`, `_3`, ... suffix
fn unique_key(issued: &mut HashSet<String>, base: String) -> String {
    let mut key = base.clone();
    let mut suffix = 1;
    while issued.contains(&key) {
        suffix += 1;
        key = format!("{}_{}", base, suffix);
    }

    issued.insert(key.clone());
    key
}

fn kind_label(kind: &StepKind) -> &'static str {
    match kind {
        StepKind::Prompt { .. } => "prompt",
        StepKind::Inline { .. } => "inline",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::{ChainStatus, MockStepRunner};
    use crate::domain::gate::{GateId, VerdictSource};
    use crate::domain::prompt::{PromptId, PromptTemplate};
    use crate::infrastructure::chain::DeferredStepRunner;
    use crate::infrastructure::gate::{KeywordEvaluator, StorageGateRepository};
    use crate::infrastructure::prompt::StoragePromptRepository;
    use crate::infrastructure::services::{GateService, PromptService};
    use crate::infrastructure::storage::InMemoryStorage;

    type Prompts = PromptService<StoragePromptRepository>;
    type Gates = GateService<StorageGateRepository>;

    struct Fixture {
        prompts: Arc<Prompts>,
        gates: Arc<Gates>,
        storage: Arc<InMemoryStorage<ChainExecutionState>>,
    }

    impl Fixture {
        async fn new() -> Self {
            let prompts = Arc::new(PromptService::new(Arc::new(StoragePromptRepository::new(
                Arc::new(InMemoryStorage::new()),
            ))));
            let gates = Arc::new(GateService::new(
                Arc::new(StorageGateRepository::new(Arc::new(InMemoryStorage::new()))),
                Arc::new(KeywordEvaluator::default()),
            ));

            gates
                .import(
                    Gate::new(GateId::new("has_tests").unwrap(), "Has tests", Severity::Critical)
                        .with_criteria(vec!["includes unit tests".to_string()]),
                )
                .await
                .unwrap();
            gates
                .import(
                    Gate::new(GateId::new("style").unwrap(), "Style", Severity::Low)
                        .with_criteria(vec!["follows naming conventions".to_string()]),
                )
                .await
                .unwrap();

            for id in ["analyze", "test"] {
                prompts
                    .import(PromptTemplate::new(
                        PromptId::new(id).unwrap(),
                        id,
                        format!("Please {} this.\n{{{{context}}}}", id),
                    ))
                    .await
                    .unwrap();
            }
            prompts
                .import(
                    PromptTemplate::new(
                        PromptId::new("implement").unwrap(),
                        "implement",
                        "Implement using {{step.analyze}}",
                    )
                    .with_gates(vec![GateId::new("has_tests").unwrap()]),
                )
                .await
                .unwrap();

            Self {
                prompts,
                gates,
                storage: Arc::new(InMemoryStorage::new()),
            }
        }

        fn executor(&self, runner: Arc<dyn StepRunner>) -> ChainExecutorImpl {
            self.executor_with(runner, ChainExecutorConfig::default())
        }

        fn executor_with(
            &self,
            runner: Arc<dyn StepRunner>,
            config: ChainExecutorConfig,
        ) -> ChainExecutorImpl {
            ChainExecutorImpl::with_config(
                self.prompts.clone(),
                self.gates.clone(),
                runner,
                self.storage.clone(),
                config,
            )
        }
    }

    fn runner_with(outputs: &'static [(&'static str, &'static str)]) -> MockStepRunner {
        let mut runner = MockStepRunner::new();
        runner.expect_run().returning(move |invocation| {
            let output = outputs
                .iter()
                .find(|(key, _)| *key == invocation.key)
                .map(|(_, output)| output.to_string())
                .unwrap_or_else(|| format!("{} done", invocation.key));
            Ok(StepOutcome::Completed(output))
        });
        runner
    }

    #[tokio::test]
    async fn test_three_step_chain_completes() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[(
            "implement",
            "Added the feature with unit tests",
        )])));

        let report = executor
            .execute(">>analyze --> >>implement --> >>test")
            .await
            .unwrap();

        assert_eq!(report.status, ChainStatus::Completed);
        let keys: Vec<&str> = report.context.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["analyze", "implement", "test"]);
        assert_eq!(report.verdicts.len(), 1);
        assert!(report.verdicts[0].passed());
    }

    #[tokio::test]
    async fn test_critical_gate_failure_halts_chain() {
        let fixture = Fixture::new().await;
        let mut runner = MockStepRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|invocation| {
                assert_ne!(invocation.key, "test");
                Ok(StepOutcome::Completed("Refactored the module".to_string()))
            });
        let executor = fixture.executor(Arc::new(runner));

        let report = executor
            .execute(">>analyze --> >>implement --> >>test")
            .await
            .unwrap();

        assert_eq!(report.status, ChainStatus::Failed);
        assert_eq!(report.current_step, Some(1));
        assert_eq!(report.phase, "failed[1]");
        assert!(report.message.unwrap().contains("has_tests"));
        assert_eq!(report.context.len(), 1);

        let id = ChainRunId::new(report.chain_id).unwrap();
        let again = executor.resume(&id, ResumeInput::default()).await;
        assert!(matches!(again, Err(DomainError::GateBlocked { step_index: 1, .. })));
    }

    #[tokio::test]
    async fn test_retry_with_revised_output() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[(
            "implement",
            "Refactored the module",
        )])));

        let report = executor
            .execute(">>analyze --> >>implement --> >>test")
            .await
            .unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();

        let report = executor
            .resume(&id, ResumeInput::with_response("Now with unit tests"))
            .await
            .unwrap();

        assert_eq!(report.status, ChainStatus::Completed);
        assert_eq!(report.context[1].output, "Now with unit tests");
        // first attempt failed, second passed
        assert_eq!(report.verdicts.len(), 2);
        assert_eq!(report.verdicts[1].attempt(), 2);
    }

    #[tokio::test]
    async fn test_override_accepts_failed_output() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[(
            "implement",
            "Refactored the module",
        )])));

        let report = executor.execute(">>implement").await.unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();

        let report = executor.resume(&id, ResumeInput::overriding()).await.unwrap();

        assert_eq!(report.status, ChainStatus::Completed);
        assert_eq!(report.context[0].output, "Refactored the module");
        let sources: Vec<VerdictSource> = report.verdicts.iter().map(|v| v.source()).collect();
        assert_eq!(sources, vec![VerdictSource::Evaluator, VerdictSource::Override]);
    }

    #[tokio::test]
    async fn test_low_severity_failure_does_not_block() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[])));

        let report = executor.execute(">>analyze :: style").await.unwrap();

        assert_eq!(report.status, ChainStatus::Completed);
        assert!(!report.verdicts[0].passed());
    }

    #[tokio::test]
    async fn test_unknown_prompt_fails_before_any_effect() {
        let fixture = Fixture::new().await;
        let mut runner = MockStepRunner::new();
        runner.expect_run().never();
        let executor = fixture.executor(Arc::new(runner));

        let result = executor.execute(">>analyze --> >>missing").await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
        assert_eq!(fixture.storage.count().await.unwrap(), 0);
        let analyze = fixture.prompts.get_required("analyze").await.unwrap();
        assert!(!analyze.is_referenced());
    }

    #[tokio::test]
    async fn test_unknown_gate_fails_before_any_effect() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[])));

        let result = executor.execute(">>analyze :: nonexistent").await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
        assert_eq!(fixture.storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deferred_runner_pauses_and_resumes() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));

        let report = executor.execute(">>analyze --> >>test").await.unwrap();
        assert_eq!(report.status, ChainStatus::Paused);
        let next = report.next_prompt.unwrap();
        assert_eq!(next.index, 0);
        assert!(next.user_message.starts_with("Please analyze this."));

        let id = ChainRunId::new(report.chain_id).unwrap();
        let report = executor
            .resume(&id, ResumeInput::with_response("analysis"))
            .await
            .unwrap();
        assert_eq!(report.status, ChainStatus::Paused);
        let next = report.next_prompt.unwrap();
        assert_eq!(next.index, 1);
        assert!(next.user_message.contains("## analyze\nanalysis"));

        let report = executor
            .resume(&id, ResumeInput::with_response("tested"))
            .await
            .unwrap();
        assert_eq!(report.status, ChainStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_without_input_is_idempotent() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));

        let report = executor.execute(">>analyze --> >>test").await.unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();
        let first = executor.resume(&id, ResumeInput::default()).await.unwrap();
        let second = executor.resume(&id, ResumeInput::default()).await.unwrap();

        assert_eq!(first.phase, "running_step[0]");
        assert_eq!(second.phase, first.phase);
        assert_eq!(second.next_prompt, first.next_prompt);
        assert!(second.context.is_empty());
    }

    #[tokio::test]
    async fn test_inline_steps_and_criteria() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));

        let report = executor
            .execute(r#"summarize the design --> list the risks :: "mentions security risks""#)
            .await
            .unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();
        assert_eq!(report.next_prompt.unwrap().user_message, "summarize the design");

        let report = executor
            .resume(&id, ResumeInput::with_response("a small design"))
            .await
            .unwrap();
        let next = report.next_prompt.unwrap();
        assert_eq!(next.key, "step_2");
        assert_eq!(next.gates.len(), 1);
        assert_eq!(next.gates[0].gate_id, "inline-1");

        let report = executor
            .resume(&id, ResumeInput::with_response("no problems found"))
            .await
            .unwrap();
        assert_eq!(report.status, ChainStatus::Failed);

        let report = executor
            .resume(&id, ResumeInput::with_response("security risks: token leakage"))
            .await
            .unwrap();
        assert_eq!(report.status, ChainStatus::Completed);
    }

    #[tokio::test]
    async fn test_required_review_pauses_at_gate() {
        let fixture = Fixture::new().await;
        let config = ChainExecutorConfig {
            require_gate_review: true,
            ..Default::default()
        };
        let executor = fixture.executor_with(Arc::new(runner_with(&[])), config);

        let report = executor.execute(">>implement").await.unwrap();
        assert_eq!(report.status, ChainStatus::Paused);
        assert_eq!(report.gates_pending.len(), 1);
        let id = ChainRunId::new(report.chain_id).unwrap();

        let status = executor.status(&id).await.unwrap();
        assert_eq!(status.gates_pending, report.gates_pending);

        let response = executor
            .resume(&id, ResumeInput::with_response("another output"))
            .await;
        assert!(matches!(response, Err(DomainError::Validation { .. })));

        let report = executor
            .resume(&id, ResumeInput::with_review("GATE_REVIEW: PASS - tests are included"))
            .await
            .unwrap();
        assert_eq!(report.status, ChainStatus::Completed);
        assert_eq!(report.verdicts[0].source(), VerdictSource::Review);
    }

    #[tokio::test]
    async fn test_malformed_review_rejected_without_change() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));

        let report = executor.execute(">>analyze").await.unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();

        let result = executor
            .resume(&id, ResumeInput::with_review("looks fine to me"))
            .await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let status = executor.status(&id).await.unwrap();
        assert_eq!(status.revision, report.revision);
    }

    #[tokio::test]
    async fn test_runner_error_fails_step_and_restarts() {
        let fixture = Fixture::new().await;
        let mut runner = MockStepRunner::new();
        let mut calls = 0;
        runner.expect_run().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DomainError::internal("model unavailable"))
            } else {
                Ok(StepOutcome::Completed("recovered".to_string()))
            }
        });
        let executor = fixture.executor(Arc::new(runner));

        let report = executor.execute(">>analyze").await.unwrap();
        assert_eq!(report.status, ChainStatus::Failed);
        assert!(report.message.unwrap().contains("model unavailable"));

        let id = ChainRunId::new(report.chain_id).unwrap();
        let report = executor.resume(&id, ResumeInput::default()).await.unwrap();
        assert_eq!(report.status, ChainStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_releases_prompts() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));

        let report = executor.execute(">>analyze --> >>test").await.unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();

        let held = fixture.prompts.delete("analyze").await;
        assert!(matches!(held, Err(DomainError::Conflict { .. })));

        let report = executor.abort(&id, "").await.unwrap();
        assert_eq!(report.status, ChainStatus::Aborted);
        assert_eq!(report.message.as_deref(), Some("aborted by caller"));

        let after = executor.resume(&id, ResumeInput::with_response("late")).await;
        assert!(matches!(after, Err(DomainError::Validation { .. })));
        assert!(executor.abort(&id, "again").await.is_err());
        assert!(fixture.prompts.delete("analyze").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_prompt_keys_are_suffixed() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(runner_with(&[])));

        let report = executor
            .execute(">>analyze --> >>analyze --> >>analyze")
            .await
            .unwrap();

        let keys: Vec<&str> = report.context.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["analyze", "analyze_2", "analyze_3"]);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let fixture = Fixture::new().await;
        let config = ChainExecutorConfig {
            max_steps: 2,
            ..Default::default()
        };
        let executor = fixture.executor_with(Arc::new(runner_with(&[])), config);

        let result = executor.execute(">>analyze --> >>analyze --> >>analyze").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_state_survives_executor_restart() {
        let fixture = Fixture::new().await;
        let report = fixture
            .executor(Arc::new(DeferredStepRunner))
            .execute(">>analyze --> >>test")
            .await
            .unwrap();
        let id = ChainRunId::new(report.chain_id).unwrap();

        let restarted = fixture.executor(Arc::new(DeferredStepRunner));
        let report = restarted
            .resume(&id, ResumeInput::with_response("analysis"))
            .await
            .unwrap();

        assert_eq!(report.current_step, Some(1));
        assert_eq!(restarted.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let fixture = Fixture::new().await;
        let executor = fixture.executor(Arc::new(DeferredStepRunner));
        let id = ChainRunId::new("chain-missing").unwrap();

        assert!(matches!(
            executor.status(&id).await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            executor.resume(&id, ResumeInput::default()).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_context_keys_never_collide() {
        let fixture = Fixture::new().await;
        fixture
            .prompts
            .import(PromptTemplate::new(
                PromptId::new("analyze_2").unwrap(),
                "analyze_2",
                "Analyze again",
            ))
            .await
            .unwrap();
        fixture
            .prompts
            .import(PromptTemplate::new(
                PromptId::new("final").unwrap(),
                "final",
                "use {{step.analyze_2}}",
            ))
            .await
            .unwrap();

        let mut runner = MockStepRunner::new();
        runner.expect_run().times(4).returning(|invocation| {
            let output = match invocation.index {
                0 => "A".to_string(),
                1 => "B".to_string(),
                2 => "A2".to_string(),
                _ => invocation.user_message.clone(),
            };
            Ok(StepOutcome::Completed(output))
        });
        let executor = fixture.executor(Arc::new(runner));

        let report = executor
            .execute(">>analyze --> >>analyze_2 --> >>analyze --> >>final")
            .await
            .unwrap();

        assert_eq!(report.status, ChainStatus::Completed);
        let keys: Vec<&str> = report.context.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["analyze", "analyze_2", "analyze_3", "final"]);
        assert_eq!(report.context[3].output, "use B");
    }

    #[tokio::test]
    async fn test_resumed_run_matches_uninterrupted_run() {
        const OUTPUTS: [&str; 3] = [
            "Found a slow lookup",
            "Added the cache with unit tests",
            "All green",
        ];
        let fixture = Fixture::new().await;
        let expression = ">>analyze --> >>implement --> >>test";

        let mut runner = MockStepRunner::new();
        runner
            .expect_run()
            .times(OUTPUTS.len())
            .returning(|invocation| Ok(StepOutcome::Completed(OUTPUTS[invocation.index].to_string())));
        let uninterrupted = fixture
            .executor(Arc::new(runner))
            .execute(expression)
            .await
            .unwrap();
        assert_eq!(uninterrupted.status, ChainStatus::Completed);

        let started = fixture
            .executor(Arc::new(DeferredStepRunner))
            .execute(expression)
            .await
            .unwrap();
        let id = ChainRunId::new(started.chain_id.clone()).unwrap();

        let mut report = started;
        for output in OUTPUTS {
            // a fresh executor for every step, as after a restart
            report = fixture
                .executor(Arc::new(DeferredStepRunner))
                .resume(&id, ResumeInput::with_response(output))
                .await
                .unwrap();
        }

        assert_eq!(report.status, ChainStatus::Completed);
        assert_eq!(report.context, uninterrupted.context);
    }

    #[test]
    fn test_retried_chain_is_finished_once() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(async {
                    let fixture = Fixture::new().await;
                    let executor = fixture.executor(Arc::new(runner_with(&[(
                        "implement",
                        "Refactored the module",
                    )])));

                    let report = executor
                        .execute(">>analyze --> >>implement --> >>test")
                        .await
                        .unwrap();
                    assert_eq!(report.status, ChainStatus::Failed);

                    let id = ChainRunId::new(report.chain_id).unwrap();
                    let report = executor
                        .resume(&id, ResumeInput::with_response("Now with unit tests"))
                        .await
                        .unwrap();
                    assert_eq!(report.status, ChainStatus::Completed);
                });
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"chains_finished_total{status="completed"} 1"#));
        assert!(!rendered.contains(r#"status="failed""#));
        assert!(rendered.contains(r#"chain_blocks_total{cause="gate"} 1"#));
    }

    #[test]
    fn test_unique_key() {
        let mut seen = HashSet::new();
        assert_eq!(unique_key(&mut seen, "a".to_string()), "a");
        assert_eq!(unique_key(&mut seen, "b".to_string()), "b");
        assert_eq!(unique_key(&mut seen, "a".to_string()), "a_2");
        assert_eq!(unique_key(&mut seen, "a_2".to_string()), "a_2_2");
        assert_eq!(unique_key(&mut seen, "a".to_string()), "a_3");
    }
}
