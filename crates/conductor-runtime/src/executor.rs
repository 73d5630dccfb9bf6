//! Executor - runs a validated plan to completion
//!
//! Steps are addressed by index into `plan.steps`. Each pass over the loop
//! dispatches every ready step in resolver order; a step is ready when it is
//! pending, not backing off after a failure, and every prerequisite has run
//! (and succeeded, for on-success edges). Attempts run on a `JoinSet` and
//! share one executor-wide semaphore, so several plans on the same executor
//! never exceed `max_concurrent_steps` together.
//!
//! Failed attempts go back to pending with a backoff delay until the step's
//! retries run out. An exhausted step, a cancellation, or a step whose
//! prerequisites can never be met ends the plan as failed; steps already in
//! flight are allowed to finish and are recorded.
//!
//! Steps at autonomy `L0` never act directly: the worker drafts, a reviewer
//! approves or rejects.

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
use crate::bus::CoordinationBus;
use crate::context::{ExecutionContext, MemoryStore};
use crate::guardrail::{ActionDescriptor, Guardrail};
use crate::worker::{Worker, WorkerContext, WorkerRegistry};
use conductor_core::config::ExecutorSettings;
use conductor_core::error::{ConductorError, Result, WorkerError};
use conductor_core::message::{topics, Message};
use conductor_core::plan::{DependencyCondition, FailureKind, Plan, StepResult};
use conductor_core::resolver::DependencyGraph;
use conductor_core::types::{PlanStatus, StepStatus};
use futures::FutureExt;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

const SOURCE: &str = "executor";

/// Memory key holding each worker's latest successful output
pub const LAST_RESULT_KEY: &str = "last_result";

pub struct Executor {
    settings: ExecutorSettings,
    bus: Arc<CoordinationBus>,
    guardrail: Arc<dyn Guardrail>,
    workers: Arc<WorkerRegistry>,
    approval: Option<Arc<dyn ApprovalGate>>,
    memory: Option<Arc<dyn MemoryStore>>,

    /// Bounds attempts in flight across every plan run by this executor
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(
        settings: ExecutorSettings,
        bus: Arc<CoordinationBus>,
        guardrail: Arc<dyn Guardrail>,
        workers: Arc<WorkerRegistry>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_steps.max(1)));
        Self {
            settings,
            bus,
            guardrail,
            workers,
            approval: None,
            memory: None,
            permits,
        }
    }

    /// Route drafts of gated steps to `gate`; without one they are auto-approved
    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval = Some(gate);
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    /// Execute every step of `plan`
    ///
    /// On success the plan is `Completed`. On failure the plan is `Failed`
    /// with a [`conductor_core::plan::PlanFailure`], step results gathered so
    /// far are kept, and the error is returned.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the plan is not `Validated` (plan untouched)
    /// - `WorkerNotRegistered` / `PlanValidationFailed` for missing or
    ///   under-equipped workers
    /// - `CircularDependency`
    /// - `StepExecutionFailed` when a step runs out of retries
    /// - `Cancelled` when the context's token fires
    /// - `Unschedulable` when steps are left waiting on failed prerequisites
    pub async fn execute_plan(&self, plan: &mut Plan, context: &ExecutionContext) -> Result<()> {
        if plan.status != PlanStatus::Validated {
            return Err(ConductorError::InvalidTransition {
                from: plan.status.to_string(),
                to: PlanStatus::Executing.to_string(),
            });
        }

        match self.run(plan, context).await {
            Ok(()) => {
                plan.transition_to(PlanStatus::Completed)?;
                tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), "plan completed");
                publish_event(
                    &self.bus,
                    topics::PLAN_COMPLETED,
                    json!({
                        "plan_id": plan.id,
                        "goal_type": plan.goal_type,
                        "completed_steps": plan.completed_steps(),
                    }),
                )
                .await;
                Ok(())
            }
            Err(err) => {
                let (kind, step_id) = failure_kind(&err);
                plan.fail(kind, err.to_string(), step_id.clone());

                let topic = if kind == FailureKind::Cancelled {
                    tracing::info!(plan_id = %plan.id, "plan cancelled");
                    topics::PLAN_CANCELLED
                } else {
                    tracing::warn!(plan_id = %plan.id, error = %err, "plan failed");
                    topics::PLAN_FAILED
                };
                publish_event(
                    &self.bus,
                    topic,
                    json!({
                        "plan_id": plan.id,
                        "goal_type": plan.goal_type,
                        "kind": err.kind(),
                        "error": err.to_string(),
                        "step_id": step_id,
                        "completed_steps": plan.completed_steps(),
                    }),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run(&self, plan: &mut Plan, context: &ExecutionContext) -> Result<()> {
        self.check_workers(plan)?;

        let graph = DependencyGraph::build(&plan.steps, &plan.dependencies)?;
        let mut schedule = Schedule::new(&graph)?;

        plan.transition_to(PlanStatus::Executing)?;
        tracing::info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            session = %context.session_id,
            "executing plan"
        );
        publish_event(
            &self.bus,
            topics::PLAN_STARTED,
            json!({ "plan_id": plan.id, "step_count": plan.steps.len() }),
        )
        .await;

        let mut join: JoinSet<AttemptEvent> = JoinSet::new();
        let mut tasks: HashMap<task::Id, usize> = HashMap::new();

        loop {
            if !schedule.cancelled && context.cancellation.is_cancelled() {
                tracing::info!(plan_id = %plan.id, in_flight = join.len(), "cancellation requested");
                schedule.cancelled = true;
            }

            if !schedule.stopping() {
                schedule.release_due_retries(Instant::now());
                for index in schedule.ready(plan) {
                    match self.dispatch(plan, index, context, &mut join) {
                        Ok(id) => {
                            tasks.insert(id, index);
                            schedule.in_flight[index] = true;
                        }
                        Err(err) => {
                            schedule.fail(err);
                            break;
                        }
                    }
                }
            }

            if join.is_empty() && (schedule.stopping() || !schedule.retry_pending()) {
                break;
            }

            let next_retry = schedule.next_retry();
            let wake = tokio::select! {
                biased;
                _ = context.cancellation.cancelled(), if !schedule.cancelled => Wake::Cancelled,
                Some(joined) = join.join_next_with_id(), if !join.is_empty() => Wake::Finished(joined),
                _ = tokio::time::sleep_until(next_retry.unwrap_or_else(Instant::now)),
                    if next_retry.is_some() && !schedule.stopping() => Wake::RetryDue,
                else => break,
            };

            let event = match wake {
                Wake::Cancelled | Wake::RetryDue => continue,
                Wake::Finished(Ok((id, event))) => {
                    tasks.remove(&id);
                    event
                }
                Wake::Finished(Err(e)) => {
                    let Some(index) = tasks.remove(&e.id()) else {
                        tracing::error!(plan_id = %plan.id, "unknown step task failed: {}", e);
                        continue;
                    };
                    tracing::error!(
                        plan_id = %plan.id,
                        step_id = %plan.steps[index].id,
                        "step task aborted: {}",
                        e
                    );
                    let attempt = plan.steps[index].attempts.len() as u32 + 1;
                    AttemptEvent {
                        index,
                        result: StepResult::failure(format!("step task aborted: {}", e), 0, attempt),
                        retryable: e.is_panic(),
                    }
                }
            };
            if let Err(err) = self.record(plan, event, context, &mut schedule).await {
                schedule.fail(err);
            }
        }

        if schedule.cancelled {
            return Err(ConductorError::Cancelled(plan.id));
        }
        if let Some(err) = schedule.failure.take() {
            return Err(err);
        }

        let stranded: Vec<String> = plan
            .steps
            .iter()
            .filter(|s| s.status != StepStatus::Completed)
            .map(|s| s.id.clone())
            .collect();
        if !stranded.is_empty() {
            return Err(ConductorError::Unschedulable { steps: stranded });
        }
        Ok(())
    }

    fn check_workers(&self, plan: &Plan) -> Result<()> {
        let mut violations = Vec::new();
        for step in &plan.steps {
            if !self.workers.contains(&step.worker_type) {
                return Err(ConductorError::WorkerNotRegistered(step.worker_type.clone()));
            }
            if !self
                .workers
                .supports(&step.worker_type, &step.required_capabilities)
            {
                violations.push(format!(
                    "worker {} lacks capabilities required by step {}",
                    step.worker_type, step.id
                ));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::PlanValidationFailed { violations })
        }
    }

    fn dispatch(
        &self,
        plan: &mut Plan,
        index: usize,
        context: &ExecutionContext,
        join: &mut JoinSet<AttemptEvent>,
    ) -> Result<task::Id> {
        let plan_id = plan.id;
        let goal_type = plan.goal_type;
        let risk_level = plan.risk.level;
        let step = &mut plan.steps[index];

        let worker = self
            .workers
            .get(&step.worker_type)
            .ok_or_else(|| ConductorError::WorkerNotRegistered(step.worker_type.clone()))?;
        step.transition_to(StepStatus::Processing)?;

        let attempt = step.attempts.len() as u32 + 1;
        tracing::debug!(
            plan_id = %plan_id,
            step_id = %step.id,
            worker = %step.worker_type,
            attempt,
            autonomy = %step.autonomy_level,
            "dispatching step"
        );

        let task = AttemptTask {
            index,
            worker,
            guardrail: Arc::clone(&self.guardrail),
            approval: self.approval.clone(),
            bus: Arc::clone(&self.bus),
            execution: context.clone(),
            approval_confidence: self.settings.approval_confidence,
            gated: step.autonomy_level.requires_approval(),
            timeout: Duration::from_millis(step.timeout_ms),
            action: ActionDescriptor {
                plan_id,
                step_id: step.id.clone(),
                worker_type: step.worker_type.clone(),
                input: step.input.clone(),
                risk_level,
            },
            worker_context: WorkerContext {
                plan_id,
                step_id: step.id.clone(),
                goal_type,
                session_id: context.session_id.clone(),
                autonomy_level: step.autonomy_level,
                attempt,
            },
        };
        let handle = join.spawn(task.run(Arc::clone(&self.permits)));
        Ok(handle.id())
    }

    async fn record(
        &self,
        plan: &mut Plan,
        event: AttemptEvent,
        context: &ExecutionContext,
        schedule: &mut Schedule,
    ) -> Result<()> {
        let AttemptEvent {
            index,
            result,
            retryable,
        } = event;
        schedule.in_flight[index] = false;

        let plan_id = plan.id;
        let step = &mut plan.steps[index];
        step.record_attempt(result.clone());

        publish_event(
            &self.bus,
            topics::STEP_COMPLETED,
            json!({
                "plan_id": plan_id,
                "step_id": step.id,
                "worker": step.worker_type,
                "success": result.success,
                "attempt": result.attempt,
                "duration_ms": result.duration_ms,
                "confidence": result.confidence,
            }),
        )
        .await;

        if result.success {
            step.transition_to(StepStatus::Completed)?;
            schedule.executed[index] = true;
            tracing::debug!(
                plan_id = %plan_id,
                step_id = %step.id,
                duration_ms = result.duration_ms,
                "step completed"
            );

            if let Some(memory) = &self.memory {
                if let Err(e) = memory
                    .set(
                        &step.worker_type,
                        &context.session_id,
                        LAST_RESULT_KEY,
                        result.payload.clone(),
                    )
                    .await
                {
                    tracing::warn!(step_id = %step.id, "failed to store step result: {}", e);
                }
            }
            return Ok(());
        }

        let error = result.error_message().unwrap_or("unknown error").to_string();

        if retryable && step.can_retry() && !schedule.stopping() {
            step.transition_to(StepStatus::Pending)?;
            step.retry_count += 1;
            let delay = self.settings.retry.delay_for(step.retry_count);
            schedule.retry_at[index] = Some(Instant::now() + delay);

            tracing::warn!(
                plan_id = %plan_id,
                step_id = %step.id,
                retry = step.retry_count,
                max_retries = step.max_retries,
                delay_ms = delay.as_millis() as u64,
                "step failed, retrying: {}",
                error
            );
            publish_event(
                &self.bus,
                topics::STEP_RETRY_SCHEDULED,
                json!({
                    "plan_id": plan_id,
                    "step_id": step.id,
                    "retry_count": step.retry_count,
                    "delay_ms": delay.as_millis() as u64,
                    "error": error,
                }),
            )
            .await;
            return Ok(());
        }

        step.transition_to(StepStatus::Failed)?;
        schedule.executed[index] = true;
        tracing::warn!(
            plan_id = %plan_id,
            step_id = %step.id,
            attempts = step.attempts.len(),
            "step failed: {}",
            error
        );

        if !schedule.cancelled {
            schedule.fail(ConductorError::StepExecutionFailed {
                step_id: step.id.clone(),
                worker: step.worker_type.clone(),
                attempts: step.attempts.len() as u32,
                message: error,
            });
        }
        Ok(())
    }
}

fn failure_kind(err: &ConductorError) -> (FailureKind, Option<String>) {
    match err {
        ConductorError::StepExecutionFailed { step_id, .. } => {
            (FailureKind::StepFailed, Some(step_id.clone()))
        }
        ConductorError::ActionValidationFailed { step_id, .. } => {
            (FailureKind::Validation, Some(step_id.clone()))
        }
        ConductorError::Cancelled(_) => (FailureKind::Cancelled, None),
        ConductorError::CircularDependency { .. } => (FailureKind::CircularDependency, None),
        ConductorError::Unschedulable { .. } => (FailureKind::Unschedulable, None),
        ConductorError::WorkerNotRegistered(_) | ConductorError::PlanValidationFailed { .. } => {
            (FailureKind::Validation, None)
        }
        ConductorError::WithContext { source, .. } => failure_kind(source),
        _ => (FailureKind::StepFailed, None),
    }
}

async fn publish_event(bus: &CoordinationBus, topic: &str, payload: serde_json::Value) {
    if let Err(e) = bus.publish(Message::new(topic, SOURCE, payload)).await {
        tracing::warn!(topic = %topic, "failed to publish event: {}", e);
    }
}

enum Wake {
    Cancelled,
    Finished(std::result::Result<(task::Id, AttemptEvent), task::JoinError>),
    RetryDue,
}

/// Per-call scheduling state, indexed like `plan.steps`
struct Schedule {
    /// Resolver order, used as dispatch priority
    order: Vec<usize>,
    prerequisites: Vec<Vec<(usize, DependencyCondition)>>,

    /// Step reached a terminal status during this call
    executed: Vec<bool>,
    in_flight: Vec<bool>,
    retry_at: Vec<Option<Instant>>,

    cancelled: bool,
    failure: Option<ConductorError>,
}

impl Schedule {
    fn new(graph: &DependencyGraph) -> Result<Self> {
        let order = graph.resolve()?;
        let len = order.len();
        Ok(Self {
            prerequisites: (0..len).map(|i| graph.prerequisites(i)).collect(),
            order,
            executed: vec![false; len],
            in_flight: vec![false; len],
            retry_at: vec![None; len],
            cancelled: false,
            failure: None,
        })
    }

    /// Stop dispatching; the first failure wins
    fn fail(&mut self, err: ConductorError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    fn stopping(&self) -> bool {
        self.cancelled || self.failure.is_some()
    }

    fn ready(&self, plan: &Plan) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&index| {
                plan.steps[index].status == StepStatus::Pending
                    && !self.in_flight[index]
                    && self.retry_at[index].is_none()
                    && self.prerequisites[index].iter().all(|&(prereq, condition)| {
                        self.executed[prereq]
                            && (condition == DependencyCondition::Unconditional
                                || plan.steps[prereq].succeeded())
                    })
            })
            .collect()
    }

    fn release_due_retries(&mut self, now: Instant) {
        for slot in &mut self.retry_at {
            if slot.map_or(false, |at| at <= now) {
                *slot = None;
            }
        }
    }

    fn retry_pending(&self) -> bool {
        self.retry_at.iter().any(Option::is_some)
    }

    fn next_retry(&self) -> Option<Instant> {
        self.retry_at.iter().flatten().min().copied()
    }
}

/// Result of one attempt, reported back to the scheduling loop
struct AttemptEvent {
    index: usize,
    result: StepResult,
    retryable: bool,
}

struct AttemptSuccess {
    payload: serde_json::Value,
    metrics: BTreeMap<String, f64>,
    confidence: f64,
}

struct AttemptFailure {
    message: String,
    retryable: bool,
}

impl AttemptFailure {
    fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<WorkerError> for AttemptFailure {
    fn from(err: WorkerError) -> Self {
        match err {
            // same input would be rejected again
            WorkerError::InvalidInput(_) => Self::fatal(err.to_string()),
            WorkerError::Failed(_) | WorkerError::Timeout(_) => Self::retryable(err.to_string()),
        }
    }
}

/// Everything one attempt needs, detached from the plan
struct AttemptTask {
    index: usize,
    worker: Arc<dyn Worker>,
    guardrail: Arc<dyn Guardrail>,
    approval: Option<Arc<dyn ApprovalGate>>,
    bus: Arc<CoordinationBus>,
    execution: ExecutionContext,
    approval_confidence: f64,
    gated: bool,
    timeout: Duration,
    action: ActionDescriptor,
    worker_context: WorkerContext,
}

impl AttemptTask {
    async fn run(self, permits: Arc<Semaphore>) -> AttemptEvent {
        // the semaphore is never closed
        let _permit = permits.acquire_owned().await;

        let started = Instant::now();
        let attempt = self.worker_context.attempt;
        let outcome = AssertUnwindSafe(self.perform()).catch_unwind().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, retryable) = match outcome {
            Ok(Ok(done)) => (
                StepResult::success(
                    done.payload,
                    done.metrics,
                    done.confidence,
                    duration_ms,
                    attempt,
                ),
                false,
            ),
            Ok(Err(failure)) => (
                StepResult::failure(failure.message, duration_ms, attempt),
                failure.retryable,
            ),
            Err(_) => {
                tracing::error!(step_id = %self.action.step_id, "worker panicked");
                (StepResult::failure("worker panicked", duration_ms, attempt), true)
            }
        };

        AttemptEvent {
            index: self.index,
            result,
            retryable,
        }
    }

    async fn perform(&self) -> std::result::Result<AttemptSuccess, AttemptFailure> {
        if self.gated {
            self.perform_gated().await
        } else {
            self.perform_autonomous().await
        }
    }

    async fn perform_autonomous(&self) -> std::result::Result<AttemptSuccess, AttemptFailure> {
        let verdict = self
            .guardrail
            .validate_action(&self.action, &self.execution)
            .await
            .map_err(|e| AttemptFailure::retryable(e.to_string()))?;
        if !verdict.valid {
            let err = ConductorError::ActionValidationFailed {
                step_id: self.action.step_id.clone(),
                violations: verdict.violations,
            };
            tracing::warn!(step_id = %self.action.step_id, "guardrail rejected action");
            return Err(AttemptFailure::retryable(err.to_string()));
        }

        let output = tokio::time::timeout(
            self.timeout,
            self.worker.execute(&self.action.input, &self.worker_context),
        )
        .await
        .map_err(|_| WorkerError::Timeout(self.timeout.as_millis() as u64))??;

        Ok(AttemptSuccess {
            payload: output.result,
            metrics: output.metrics,
            confidence: output.confidence.unwrap_or(1.0),
        })
    }

    async fn perform_gated(&self) -> std::result::Result<AttemptSuccess, AttemptFailure> {
        let draft = tokio::time::timeout(
            self.timeout,
            self.worker
                .generate_draft(&self.action.input, &self.worker_context),
        )
        .await
        .map_err(|_| WorkerError::Timeout(self.timeout.as_millis() as u64))??;

        if !draft.needs_approval {
            tracing::debug!(step_id = %self.action.step_id, "draft needs no approval");
            return Ok(AttemptSuccess {
                payload: json!({ "draft": draft.draft }),
                metrics: BTreeMap::new(),
                confidence: 1.0,
            });
        }

        let requested_at = conductor_core::types::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            plan_id: self.action.plan_id,
            step_id: self.action.step_id.clone(),
            worker_type: self.action.worker_type.clone(),
            draft: draft.draft.clone(),
            requested_at,
            due_by: requested_at + chrono::Duration::milliseconds(self.timeout.as_millis() as i64),
        };

        tracing::info!(
            plan_id = %request.plan_id,
            step_id = %request.step_id,
            "approval requested"
        );
        match serde_json::to_value(&request) {
            Ok(payload) => publish_event(&self.bus, topics::STEP_APPROVAL_REQUESTED, payload).await,
            Err(e) => tracing::warn!("failed to encode approval request: {}", e),
        }

        let decision = match &self.approval {
            Some(gate) => gate
                .review(request)
                .await
                .map_err(|e| AttemptFailure::retryable(e.to_string()))?,
            None => ApprovalDecision::approve("auto"),
        };

        if !decision.approved {
            let reason = decision
                .comment
                .unwrap_or_else(|| "no reason given".to_string());
            tracing::warn!(step_id = %self.action.step_id, reason = %reason, "draft rejected");
            return Err(AttemptFailure::fatal(format!("approval rejected: {}", reason)));
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("approval_required".to_string(), 1.0);
        Ok(AttemptSuccess {
            payload: json!({
                "draft": draft.draft,
                "approved_by": decision.reviewer,
            }),
            metrics,
            confidence: self.approval_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::AllowAll;
    use crate::worker::WorkerOutput;
    use async_trait::async_trait;
    use conductor_core::goal::{Goal, GoalType};
    use conductor_core::payload::StepInput;
    use conductor_core::plan::PlanStep;
    use conductor_core::worker::WorkerType;

    struct Constant(WorkerType);

    #[async_trait]
    impl Worker for Constant {
        fn worker_type(&self) -> WorkerType {
            self.0.clone()
        }

        async fn execute(
            &self,
            _input: &StepInput,
            context: &WorkerContext,
        ) -> std::result::Result<WorkerOutput, WorkerError> {
            Ok(WorkerOutput::new(json!({ "step": context.step_id })).with_confidence(0.9))
        }
    }

    /// Drafts that its own policy already clears
    struct SelfCleared;

    #[async_trait]
    impl Worker for SelfCleared {
        fn worker_type(&self) -> WorkerType {
            WorkerType::Compliance
        }

        async fn execute(
            &self,
            _input: &StepInput,
            _context: &WorkerContext,
        ) -> std::result::Result<WorkerOutput, WorkerError> {
            Err(WorkerError::Failed("gated steps never execute".to_string()))
        }

        async fn generate_draft(
            &self,
            _input: &StepInput,
            _context: &WorkerContext,
        ) -> std::result::Result<crate::worker::Draft, WorkerError> {
            Ok(crate::worker::Draft {
                draft: json!({ "policies": ["gdpr"] }),
                needs_approval: false,
            })
        }
    }

    fn executor(workers: &[WorkerType]) -> Executor {
        let registry = Arc::new(WorkerRegistry::new());
        for worker in workers {
            registry.register(Arc::new(Constant(worker.clone())));
        }
        Executor::new(
            ExecutorSettings::default(),
            Arc::new(CoordinationBus::new()),
            Arc::new(AllowAll),
            registry,
        )
    }

    fn validated_plan(workers: &[WorkerType]) -> Plan {
        let goal = Goal::builder(GoalType::DetectLeakage).build().unwrap();
        let mut plan = Plan::new(&goal);
        plan.steps = workers
            .iter()
            .map(|w| PlanStep::for_worker(w.clone(), &goal))
            .collect();
        plan.transition_to(PlanStatus::Validated).unwrap();
        plan
    }

    #[tokio::test]
    async fn test_draft_plan_is_rejected_untouched() {
        let executor = executor(&[WorkerType::Analytics]);
        let goal = Goal::builder(GoalType::DetectLeakage).build().unwrap();
        let mut plan = Plan::new(&goal);

        let err = executor
            .execute_plan(&mut plan, &ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTransition { .. }));
        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(plan.failure.is_none());
    }

    #[tokio::test]
    async fn test_missing_worker_fails_plan() {
        let executor = executor(&[WorkerType::Analytics]);
        let mut plan = validated_plan(&[WorkerType::Analytics, WorkerType::LeakageDetector]);

        let err = executor
            .execute_plan(&mut plan, &ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::WorkerNotRegistered(WorkerType::LeakageDetector)));
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.failure.as_ref().unwrap().kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_independent_steps_complete() {
        let executor = executor(&[WorkerType::Analytics, WorkerType::LeakageDetector]);
        let mut plan = validated_plan(&[WorkerType::Analytics, WorkerType::LeakageDetector]);

        executor
            .execute_plan(&mut plan, &ExecutionContext::default())
            .await
            .unwrap();

        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.completed_steps(), 2);
        for step in &plan.steps {
            let result = step.result.as_ref().unwrap();
            assert!(result.success);
            assert_eq!(result.attempt, 1);
            assert!((result.confidence - 0.9).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_gated_step_is_auto_approved_without_gate() {
        let executor = executor(&[WorkerType::Copy]);
        let mut plan = validated_plan(&[WorkerType::Copy]);
        plan.steps[0].autonomy_level = conductor_core::types::AutonomyLevel::L0;

        executor
            .execute_plan(&mut plan, &ExecutionContext::default())
            .await
            .unwrap();

        let result = plan.steps[0].result.as_ref().unwrap();
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.metrics.get("approval_required"), Some(&1.0));
        assert!(executor.bus.message_count().await > 0);
        assert_eq!(
            executor
                .bus
                .history_matching(topics::STEP_APPROVAL_REQUESTED)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_draft_without_approval_is_not_marked_approved() {
        let registry = Arc::new(WorkerRegistry::new());
        registry.register(Arc::new(SelfCleared));
        let bus = Arc::new(CoordinationBus::new());
        let executor = Executor::new(
            ExecutorSettings::default(),
            Arc::clone(&bus),
            Arc::new(AllowAll),
            registry,
        );
        let mut plan = validated_plan(&[WorkerType::Compliance]);
        plan.steps[0].autonomy_level = conductor_core::types::AutonomyLevel::L0;

        executor
            .execute_plan(&mut plan, &ExecutionContext::default())
            .await
            .unwrap();

        let result = plan.steps[0].result.as_ref().unwrap();
        assert!(result.success);
        assert!(!result.metrics.contains_key("approval_required"));
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert_eq!(result.payload["draft"]["policies"][0], "gdpr");
        assert!(bus
            .history_matching(topics::STEP_APPROVAL_REQUESTED)
            .await
            .is_empty());
    }
}
