//! Conductor Core - domain model for goal orchestration
//!
//! Conductor Core holds the synchronous half of the orchestrator: the data
//! model and the algorithms that do not need a runtime.
//!
//! # Architecture
//!
//! 1. **Goals and plans** (`goal`, `plan`, `payload`): what is asked and how it is broken down
//! 2. **Dependency resolution** (`resolver`): dependency-first ordering with cycle detection
//! 3. **Strategies** (`strategy`, `worker`): which workers serve which goal type
//! 4. **Evaluation** (`outcome`, `evaluation`): metrics, quality and anomaly rules
//! 5. **Coordination envelope** (`message`): bus messages and topic matching
//!
//! The async services (bus, planner, executor, critic) live in
//! `conductor-runtime` and are built on these types.
//!
//! # Quick Start
//!
//! ```
//! use conductor_core::goal::{Goal, GoalType};
//! use conductor_core::plan::{Plan, PlanDependency, PlanStep};
//! use conductor_core::resolver;
//! use conductor_core::worker::WorkerType;
//!
//! let goal = Goal::builder(GoalType::RevivePipeline)
//!     .description("Re-engage stalled opportunities")
//!     .build()
//!     .unwrap();
//!
//! let mut plan = Plan::new(&goal);
//! plan.steps.push(PlanStep::for_worker(WorkerType::Copy, &goal).with_id("copy"));
//! plan.steps.push(PlanStep::for_worker(WorkerType::Research, &goal).with_id("research"));
//! plan.dependencies.push(PlanDependency::new("research", "copy"));
//!
//! let order = resolver::resolve_ids(&plan.steps, &plan.dependencies).unwrap();
//! assert_eq!(order, vec!["research", "copy"]);
//! ```

pub mod config;
pub mod error;
pub mod evaluation;
pub mod goal;
pub mod message;
pub mod outcome;
pub mod payload;
pub mod plan;
pub mod resolver;
pub mod retry;
pub mod strategy;
pub mod types;
pub mod worker;

pub use config::ConductorConfig;
pub use error::{ConductorError, Result, ResultExt, WorkerError};
pub use goal::{Goal, GoalType};
pub use message::Message;
pub use outcome::{Outcome, OutcomeType};
pub use plan::{Plan, PlanDependency, PlanStep, StepResult};
pub use types::{AutonomyLevel, PlanStatus, Priority, RiskLevel, StepStatus};
pub use worker::WorkerType;

/// Version of Conductor Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
