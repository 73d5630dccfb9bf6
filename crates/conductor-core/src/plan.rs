//! Plan, step and result data structures
//!
//! A [`Plan`] is created by the planner and mutated only by the executor.
//! Steps live in a flat array and are addressed by index during scheduling;
//! dependencies refer to steps by id so plans stay meaningful once serialized.

use crate::error::{ConductorError, Result};
use crate::goal::{Goal, GoalType};
use crate::payload::StepInput;
use crate::types::{AutonomyLevel, PlanStatus, Priority, RiskLevel, StepStatus, Timestamp};
use crate::worker::WorkerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// When a dependency edge counts as satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyCondition {
    /// Satisfied once the prerequisite has run, whatever its outcome
    #[default]
    Unconditional,
    /// Satisfied only when the prerequisite's latest attempt succeeded
    OnSuccess,
}

/// Edge `from -> to`: `to` may not start before `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanDependency {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: DependencyCondition,
}

impl PlanDependency {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: DependencyCondition::Unconditional,
        }
    }

    pub fn on_success(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: DependencyCondition::OnSuccess,
        }
    }
}

/// Outcome of a single execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    /// Worker output on success, error description on failure
    pub payload: serde_json::Value,
    pub metrics: BTreeMap<String, f64>,
    pub confidence: f64,
    pub duration_ms: u64,
    /// 1-based attempt number
    pub attempt: u32,
}

impl StepResult {
    pub fn success(
        payload: serde_json::Value,
        metrics: BTreeMap<String, f64>,
        confidence: f64,
        duration_ms: u64,
        attempt: u32,
    ) -> Self {
        Self {
            success: true,
            payload,
            metrics,
            confidence: confidence.clamp(0.0, 1.0),
            duration_ms,
            attempt,
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64, attempt: u32) -> Self {
        Self {
            success: false,
            payload: serde_json::json!({ "error": error.into() }),
            metrics: BTreeMap::new(),
            confidence: 0.0,
            duration_ms,
            attempt,
        }
    }

    /// Error text of a failed attempt
    pub fn error_message(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.payload.get("error").and_then(|e| e.as_str())
    }
}

/// A unit of work assigned to one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub worker_type: WorkerType,
    pub description: String,
    pub input: StepInput,
    pub required_capabilities: Vec<String>,
    pub status: StepStatus,
    pub autonomy_level: AutonomyLevel,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Result of the latest attempt
    pub result: Option<StepResult>,
    /// Every attempt in order
    #[serde(default)]
    pub attempts: Vec<StepResult>,
}

impl PlanStep {
    /// Create a pending step populated from the worker's static profile
    pub fn for_worker(worker_type: WorkerType, goal: &Goal) -> Self {
        let profile = worker_type.profile();
        let input = StepInput::for_worker(&worker_type, goal);

        Self {
            id: Uuid::new_v4().to_string(),
            worker_type,
            description: profile.description,
            input,
            required_capabilities: profile.capabilities,
            status: StepStatus::Pending,
            autonomy_level: AutonomyLevel::default(),
            priority: profile.priority,
            retry_count: 0,
            max_retries: profile.max_retries,
            timeout_ms: profile.timeout_ms,
            created_at: crate::types::now(),
            started_at: None,
            completed_at: None,
            result: None,
            attempts: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.autonomy_level = level;
        self
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub fn transition_to(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        match next {
            StepStatus::Processing => self.started_at = Some(crate::types::now()),
            StepStatus::Completed | StepStatus::Failed => {
                self.completed_at = Some(crate::types::now())
            }
            StepStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Store an attempt's result as the latest one
    pub fn record_attempt(&mut self, result: StepResult) {
        self.attempts.push(result.clone());
        self.result = Some(result);
    }

    pub fn succeeded(&self) -> bool {
        self.result.as_ref().map_or(false, |r| r.success)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Risk judgement attached to a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
    pub requires_approval: bool,
}

impl RiskAssessment {
    /// Bucket `score` (clamped to [0, 1]) and derive the approval flag
    pub fn from_score(score: f64, factors: Vec<String>, mitigations: Vec<String>) -> Self {
        let score = score.clamp(0.0, 1.0);
        let level = RiskLevel::from_score(score);
        Self {
            level,
            score,
            factors,
            mitigations,
            requires_approval: level.requires_approval(),
        }
    }
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self::from_score(0.0, Vec::new(), Vec::new())
    }
}

/// Why a plan ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    StepFailed,
    Validation,
    CircularDependency,
    Cancelled,
    Unschedulable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFailure {
    pub kind: FailureKind,
    pub message: String,
    pub step_id: Option<String>,
}

/// Executable decomposition of a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub goal_type: GoalType,
    pub steps: Vec<PlanStep>,
    pub dependencies: Vec<PlanDependency>,
    pub status: PlanStatus,
    pub risk: RiskAssessment,
    pub autonomy_level: AutonomyLevel,
    pub created_at: Timestamp,
    pub estimated_completion: Option<Timestamp>,
    pub failure: Option<PlanFailure>,
}

impl Plan {
    /// Create an empty draft plan for `goal`
    pub fn new(goal: &Goal) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id: goal.id,
            goal_type: goal.goal_type,
            steps: Vec::new(),
            dependencies: Vec::new(),
            status: PlanStatus::Draft,
            risk: RiskAssessment::default(),
            autonomy_level: AutonomyLevel::default(),
            created_at: crate::types::now(),
            estimated_completion: None,
            failure: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub fn transition_to(&mut self, next: PlanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the plan failed and remember why
    ///
    /// A plan that is already terminal keeps its original status.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>, step_id: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = PlanStatus::Failed;
        self.failure = Some(PlanFailure {
            kind,
            message: message.into(),
            step_id,
        });
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn step_by_worker(&self, worker: &WorkerType) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.worker_type == worker)
    }

    /// Worker types in step order
    pub fn worker_types(&self) -> Vec<WorkerType> {
        self.steps.iter().map(|s| s.worker_type.clone()).collect()
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Sum of step timeouts, used as a pessimistic duration estimate
    pub fn total_timeout_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.timeout_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::GoalType;

    fn goal() -> Goal {
        Goal::builder(GoalType::RevivePipeline).build().unwrap()
    }

    #[test]
    fn test_step_from_profile() {
        let step = PlanStep::for_worker(WorkerType::Copy, &goal());
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.max_retries, 2);
        assert_eq!(step.timeout_ms, 45_000);
        assert_eq!(step.input.worker_type(), WorkerType::Copy);
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = PlanStep::for_worker(WorkerType::Research, &goal());
        assert!(step.transition_to(StepStatus::Completed).is_err());

        step.transition_to(StepStatus::Processing).unwrap();
        assert!(step.started_at.is_some());

        step.record_attempt(StepResult::failure("boom", 3, 1));
        step.transition_to(StepStatus::Pending).unwrap();
        step.transition_to(StepStatus::Processing).unwrap();
        step.record_attempt(StepResult::success(
            serde_json::json!({"ok": true}),
            BTreeMap::new(),
            1.4,
            5,
            2,
        ));
        step.transition_to(StepStatus::Completed).unwrap();

        assert!(step.succeeded());
        assert_eq!(step.attempts.len(), 2);
        assert_eq!(step.result.as_ref().unwrap().confidence, 1.0);
        assert_eq!(step.attempts[0].error_message(), Some("boom"));
    }

    #[test]
    fn test_fail_keeps_first_reason() {
        let mut plan = Plan::new(&goal());
        plan.fail(FailureKind::Validation, "guardrail said no", None);
        plan.fail(FailureKind::Cancelled, "later", None);

        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.failure.unwrap().kind, FailureKind::Validation);
    }

    #[test]
    fn test_risk_assessment_clamps() {
        let risk = RiskAssessment::from_score(1.3, vec![], vec![]);
        assert_eq!(risk.score, 1.0);
        assert_eq!(risk.level, RiskLevel::Critical);
        assert!(risk.requires_approval);
    }
}
