//! Conductor Runtime - async goal orchestration
//!
//! The services that turn a [`Goal`](conductor_core::goal::Goal) into work
//! and learn from what happened:
//!
//! 1. **Coordination bus** (`bus`): topic pub/sub with request/reply
//! 2. **Planner** (`planner`): strategy lookup, dependencies, risk, autonomy
//! 3. **Executor** (`executor`): concurrent ready-set scheduling with retries
//!    and human approval for gated steps
//! 4. **Critic** (`critic`): outcome scoring, plan evaluation, feedback
//!
//! Workers, guardrails, approval and context services are traits
//! (`worker`, `guardrail`, `approval`, `context`) so deployments plug in
//! their own.
//!
//! # Quick Start
//!
//! ```no_run
//! use conductor_core::goal::{Goal, GoalType};
//! use conductor_runtime::Conductor;
//!
//! # async fn run() -> conductor_core::Result<()> {
//! let conductor = Conductor::builder().build()?;
//! let goal = Goal::builder(GoalType::DetectLeakage).build()?;
//!
//! let plan = conductor.plan(&goal, &Default::default()).await?;
//! println!("{} steps, risk {}", plan.steps.len(), plan.risk.level);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod bus;
pub mod context;
pub mod critic;
pub mod executor;
pub mod guardrail;
pub mod orchestrator;
pub mod planner;
pub mod worker;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalRequest, AutoApprove, ChannelApprovalGate};
pub use bus::{CoordinationBus, SubscriptionId};
pub use context::{
    ContextProvider, CriticContext, ExecutionContext, InMemoryStore, MemoryStore, PlanningContext,
};
pub use critic::Critic;
pub use executor::Executor;
pub use guardrail::{ActionDescriptor, AllowAll, Guardrail, PolicyGuardrail, Validation};
pub use orchestrator::{Conductor, ConductorBuilder};
pub use planner::Planner;
pub use worker::{Draft, Worker, WorkerContext, WorkerOutput, WorkerRegistry};
