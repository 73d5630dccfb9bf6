//! Error types for Conductor Core
//!
//! Every fallible operation in the workspace returns [`ConductorError`].
//! Plan-fatal conditions (cycles, guardrail rejections, exhausted retries)
//! are variants here; recoverable worker failures travel as [`WorkerError`]
//! and are folded into failed step results by the executor.

use crate::message::Message;
use crate::worker::WorkerType;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Main error type for Conductor operations
#[derive(Error, Debug)]
pub enum ConductorError {
    /// The step dependency graph contains a cycle
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<String> },

    /// A dependency edge references a step that is not part of the plan
    #[error("Unknown step referenced by dependency: {0}")]
    UnknownStep(String),

    /// The guardrail rejected a drafted plan
    #[error("Plan validation failed: {}", .violations.join("; "))]
    PlanValidationFailed { violations: Vec<String> },

    /// The guardrail rejected an autonomous action
    #[error("Action validation failed for step {step_id}: {}", .violations.join("; "))]
    ActionValidationFailed {
        step_id: String,
        violations: Vec<String>,
    },

    /// A step exhausted its retries
    #[error("Step {step_id} ({worker}) failed after {attempts} attempt(s): {message}")]
    StepExecutionFailed {
        step_id: String,
        worker: WorkerType,
        attempts: u32,
        message: String,
    },

    /// No worker is registered for a step's worker type
    #[error("No worker registered for type {0}")]
    WorkerNotRegistered(WorkerType),

    /// Steps left pending because their dependencies can never be satisfied
    #[error("Steps could not be scheduled: {}", .steps.join(", "))]
    Unschedulable { steps: Vec<String> },

    /// A status change that the lifecycle does not allow
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A bus request received no reply in time
    #[error("Request on topic '{topic}' timed out after {timeout_ms}ms")]
    RequestTimeout { topic: String, timeout_ms: u64 },

    /// The bus could not deliver a message
    #[error("Message bus error: {reason} (topic '{}')", .message.topic)]
    MessageBus {
        reason: String,
        message: Box<Message>,
    },

    /// Plan evaluation could not be computed
    #[error("Evaluation error for plan {plan_id}: {reason}")]
    Evaluation { plan_id: Uuid, reason: String },

    /// Execution was cancelled before the plan finished
    #[error("Plan {0} was cancelled")]
    Cancelled(Uuid),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<ConductorError>,
    },
}

fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

impl ConductorError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Short machine-friendly tag, used in lifecycle event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircularDependency { .. } => "circular-dependency",
            Self::UnknownStep(_) => "unknown-step",
            Self::PlanValidationFailed { .. } => "plan-validation",
            Self::ActionValidationFailed { .. } => "action-validation",
            Self::StepExecutionFailed { .. } => "step-failed",
            Self::WorkerNotRegistered(_) => "worker-not-registered",
            Self::Unschedulable { .. } => "unschedulable",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::RequestTimeout { .. } => "request-timeout",
            Self::MessageBus { .. } => "message-bus",
            Self::Evaluation { .. } => "evaluation",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::WithContext { source, .. } => source.kind(),
        }
    }
}

impl From<toml::de::Error> for ConductorError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ConductorError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure reported by a worker for a single attempt
///
/// Worker failures never abort a plan directly: the executor records them as
/// failed step results and decides whether to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("worker failed: {0}")]
    Failed(String),

    #[error("worker timed out after {0}ms")]
    Timeout(u64),

    #[error("input rejected: {0}")]
    InvalidInput(String),
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = ConductorError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert_eq!(err.kind(), "circular-dependency");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(ConductorError::UnknownStep("x".into()));
        let err = result.context("Resolving plan").unwrap_err();

        assert!(err.to_string().contains("Resolving plan"));
        assert_eq!(err.kind(), "unknown-step");
    }
}
