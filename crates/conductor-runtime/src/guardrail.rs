//! Guardrail contract
//!
//! The planner validates every drafted plan and the executor validates every
//! autonomous action through [`Guardrail`]. The policy engine behind it is
//! external; [`PolicyGuardrail`] is a small rule set for local use.

use crate::context::{ExecutionContext, PlanningContext};
use async_trait::async_trait;
use conductor_core::error::Result;
use conductor_core::payload::StepInput;
use conductor_core::plan::Plan;
use conductor_core::types::{AutonomyLevel, RiskLevel};
use conductor_core::worker::WorkerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Verdict returned by the guardrail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub violations: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }

    pub fn rejected(violations: Vec<String>) -> Self {
        Self {
            valid: false,
            violations,
        }
    }

    fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            Self::ok()
        } else {
            Self::rejected(violations)
        }
    }
}

/// Autonomous action submitted for validation before a worker runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub plan_id: Uuid,
    pub step_id: String,
    pub worker_type: WorkerType,
    pub input: StepInput,
    pub risk_level: RiskLevel,
}

#[async_trait]
pub trait Guardrail: Send + Sync {
    async fn validate_plan(&self, plan: &Plan, context: &PlanningContext) -> Result<Validation>;

    async fn validate_action(
        &self,
        action: &ActionDescriptor,
        context: &ExecutionContext,
    ) -> Result<Validation>;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Guardrail for AllowAll {
    async fn validate_plan(&self, _plan: &Plan, _context: &PlanningContext) -> Result<Validation> {
        Ok(Validation::ok())
    }

    async fn validate_action(
        &self,
        _action: &ActionDescriptor,
        _context: &ExecutionContext,
    ) -> Result<Validation> {
        Ok(Validation::ok())
    }
}

/// Static rule set
#[derive(Debug, Clone)]
pub struct PolicyGuardrail {
    /// Workers that may never run
    pub blocked_workers: BTreeSet<WorkerType>,

    pub max_steps: usize,

    /// Critical-risk plans must gate every step
    pub critical_requires_approval: bool,
}

impl Default for PolicyGuardrail {
    fn default() -> Self {
        Self {
            blocked_workers: BTreeSet::new(),
            max_steps: 16,
            critical_requires_approval: true,
        }
    }
}

impl PolicyGuardrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_worker(mut self, worker: WorkerType) -> Self {
        self.blocked_workers.insert(worker);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[async_trait]
impl Guardrail for PolicyGuardrail {
    async fn validate_plan(&self, plan: &Plan, _context: &PlanningContext) -> Result<Validation> {
        let mut violations = Vec::new();

        if plan.steps.is_empty() {
            violations.push("plan has no steps".to_string());
        }
        if plan.steps.len() > self.max_steps {
            violations.push(format!(
                "plan has {} steps, limit is {}",
                plan.steps.len(),
                self.max_steps
            ));
        }
        for step in &plan.steps {
            if self.blocked_workers.contains(&step.worker_type) {
                violations.push(format!("worker {} is blocked by policy", step.worker_type));
            }
        }
        if self.critical_requires_approval
            && plan.risk.level == RiskLevel::Critical
            && plan.steps.iter().any(|s| s.autonomy_level > AutonomyLevel::L0)
        {
            violations.push("critical-risk plans must require approval for every step".to_string());
        }

        Ok(Validation::from_violations(violations))
    }

    async fn validate_action(
        &self,
        action: &ActionDescriptor,
        _context: &ExecutionContext,
    ) -> Result<Validation> {
        let mut violations = Vec::new();

        if self.blocked_workers.contains(&action.worker_type) {
            violations.push(format!("worker {} is blocked by policy", action.worker_type));
        }
        if self.critical_requires_approval && action.risk_level == RiskLevel::Critical {
            violations.push("critical-risk actions cannot run autonomously".to_string());
        }

        Ok(Validation::from_violations(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::goal::{Goal, GoalType};
    use conductor_core::plan::PlanStep;

    fn plan_with(workers: &[WorkerType]) -> Plan {
        let goal = Goal::builder(GoalType::DetectLeakage).build().unwrap();
        let mut plan = Plan::new(&goal);
        plan.steps = workers
            .iter()
            .map(|w| PlanStep::for_worker(w.clone(), &goal))
            .collect();
        plan
    }

    #[tokio::test]
    async fn test_blocked_worker_rejected() {
        let guardrail = PolicyGuardrail::new().block_worker(WorkerType::CrmSync);
        let plan = plan_with(&[WorkerType::Analytics, WorkerType::CrmSync]);

        let verdict = guardrail
            .validate_plan(&plan, &PlanningContext::default())
            .await
            .unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.violations.len(), 1);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let guardrail = PolicyGuardrail::new().with_max_steps(1);
        let plan = plan_with(&[WorkerType::Analytics, WorkerType::LeakageDetector]);

        let verdict = guardrail
            .validate_plan(&plan, &PlanningContext::default())
            .await
            .unwrap();
        assert!(!verdict.valid);
    }

    #[tokio::test]
    async fn test_critical_action_rejected() {
        let action = ActionDescriptor {
            plan_id: Uuid::nil(),
            step_id: "s".into(),
            worker_type: WorkerType::Copy,
            input: StepInput::Compliance { policies: vec![] },
            risk_level: RiskLevel::Critical,
        };
        let verdict = PolicyGuardrail::new()
            .validate_action(&action, &ExecutionContext::default())
            .await
            .unwrap();
        assert!(!verdict.valid);

        let calm = ActionDescriptor {
            risk_level: RiskLevel::Medium,
            ..action
        };
        let verdict = PolicyGuardrail::new()
            .validate_action(&calm, &ExecutionContext::default())
            .await
            .unwrap();
        assert!(verdict.valid);
    }
}
