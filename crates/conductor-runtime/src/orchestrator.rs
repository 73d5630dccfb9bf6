//! Conductor - one bus, one planner, one executor, one critic
//!
//! ```text
//!  Goal ──> Planner ──> Plan ──> Executor ──> StepResults
//!              ^                                   │
//!              │                               outcomes
//!              │                                   v
//!   learning.autonomy_recalibration <────────── Critic
//! ```
//!
//! The facade owns the shared registries and installs the bus subscriptions
//! that close the critic -> planner loop. Critic failures are logged and
//! never change the state of a plan.

use crate::approval::ApprovalGate;
use crate::bus::{CoordinationBus, SubscriptionId};
use crate::context::{
    ContextProvider, CriticContext, ExecutionContext, MemoryStore, PlanningContext,
};
use crate::critic::Critic;
use crate::executor::Executor;
use crate::guardrail::{AllowAll, Guardrail};
use crate::planner::Planner;
use crate::worker::{Worker, WorkerRegistry};
use conductor_core::config::ConductorConfig;
use conductor_core::error::Result;
use conductor_core::evaluation::{OutcomeAssessment, PlanEvaluation};
use conductor_core::goal::Goal;
use conductor_core::outcome::Outcome;
use conductor_core::plan::Plan;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Conductor {
    config: ConductorConfig,
    bus: Arc<CoordinationBus>,
    planner: Planner,
    executor: Executor,
    critic: Critic,
    workers: Arc<WorkerRegistry>,
    subscriptions: Vec<SubscriptionId>,
}

impl Conductor {
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::default()
    }

    /// Plan `goal` and execute the plan
    ///
    /// Only planning errors are returned. Execution failures are recorded on
    /// the returned plan (`status` and `failure`).
    pub async fn submit(&self, goal: &Goal, session_id: &str) -> Result<Plan> {
        self.submit_with_cancellation(goal, session_id, CancellationToken::new())
            .await
    }

    /// Like `submit`, stopping new steps once `cancellation` fires
    pub async fn submit_with_cancellation(
        &self,
        goal: &Goal,
        session_id: &str,
        cancellation: CancellationToken,
    ) -> Result<Plan> {
        let mut plan = self
            .planner
            .create_plan(goal, &PlanningContext::new(session_id))
            .await?;
        self.critic.register_plan(plan.id, plan.goal_type);

        let context = ExecutionContext::new(session_id).with_cancellation(cancellation);
        if let Err(e) = self.executor.execute_plan(&mut plan, &context).await {
            tracing::warn!(
                plan_id = %plan.id,
                goal_id = %goal.id,
                kind = e.kind(),
                "plan did not complete: {}",
                e
            );
        }
        Ok(plan)
    }

    /// Plan `goal` without executing it
    pub async fn plan(&self, goal: &Goal, context: &PlanningContext) -> Result<Plan> {
        self.planner.create_plan(goal, context).await
    }

    /// Execute a plan built earlier with [`Conductor::plan`]
    pub async fn execute(&self, plan: &mut Plan, context: &ExecutionContext) -> Result<()> {
        self.critic.register_plan(plan.id, plan.goal_type);
        self.executor.execute_plan(plan, context).await
    }

    /// Score one outcome; errors are logged, not returned
    pub async fn process_outcome(&self, outcome: Outcome, session_id: &str) -> Option<OutcomeAssessment> {
        let outcome_id = outcome.id;
        match self
            .critic
            .process_outcome(outcome, &CriticContext::new(session_id))
            .await
        {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                tracing::warn!(outcome_id = %outcome_id, "outcome scoring failed: {}", e);
                None
            }
        }
    }

    /// Evaluate a plan's outcomes; errors are logged, not returned
    pub async fn evaluate(&self, plan_id: Uuid, session_id: &str) -> Option<PlanEvaluation> {
        match self
            .critic
            .evaluate_plan(plan_id, &CriticContext::new(session_id))
            .await
        {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                tracing::warn!(plan_id = %plan_id, "plan evaluation failed: {}", e);
                None
            }
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<CoordinationBus> {
        &self.bus
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    /// Remove the facade's subscriptions and close the bus
    pub fn shutdown(&self) {
        for id in &self.subscriptions {
            self.bus.unsubscribe(*id);
        }
        self.bus.shutdown();
    }
}

/// Assembles a [`Conductor`]
#[derive(Default)]
pub struct ConductorBuilder {
    config: ConductorConfig,
    guardrail: Option<Arc<dyn Guardrail>>,
    approval: Option<Arc<dyn ApprovalGate>>,
    context_provider: Option<Arc<dyn ContextProvider>>,
    memory: Option<Arc<dyn MemoryStore>>,
    workers: Vec<Arc<dyn Worker>>,
}

impl ConductorBuilder {
    pub fn with_config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`AllowAll`]
    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrail = Some(guardrail);
        self
    }

    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval = Some(gate);
        self
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn register_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Validate the configuration, wire the components, attach subscriptions
    pub fn build(self) -> Result<Conductor> {
        self.config.validate()?;

        let bus = Arc::new(CoordinationBus::with_settings(&self.config.bus));
        let guardrail = self.guardrail.unwrap_or_else(|| Arc::new(AllowAll));

        let workers = Arc::new(WorkerRegistry::new());
        for worker in self.workers {
            workers.register(worker);
        }

        let mut planner = Planner::new(
            self.config.planner.clone(),
            Arc::clone(&bus),
            Arc::clone(&guardrail),
        );
        if let Some(provider) = self.context_provider {
            planner = planner.with_context_provider(provider);
        }

        let mut executor = Executor::new(
            self.config.executor.clone(),
            Arc::clone(&bus),
            guardrail,
            Arc::clone(&workers),
        );
        if let Some(gate) = self.approval {
            executor = executor.with_approval_gate(gate);
        }
        if let Some(store) = self.memory {
            executor = executor.with_memory_store(store);
        }

        let critic = Critic::new(self.config.critic.clone(), Arc::clone(&bus));

        let mut subscriptions = critic.attach();
        subscriptions.push(planner.subscribe_feedback());

        tracing::info!(
            workers = workers.len(),
            max_concurrent_steps = self.config.executor.max_concurrent_steps,
            "conductor ready"
        );

        Ok(Conductor {
            config: self.config,
            bus,
            planner,
            executor,
            critic,
            workers,
            subscriptions,
        })
    }
}
