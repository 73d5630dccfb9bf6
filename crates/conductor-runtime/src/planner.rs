//! Planner - turns a goal into a validated plan
//!
//! ```text
//! Goal
//!  │ strategy table        -> ordered workers
//!  │ decomposition         -> one step per worker (static profiles)
//!  │ dependencies          -> sequential chain + on-success pairs
//!  │ risk assessment       -> score, level, factors, mitigations
//!  │ autonomy              -> plan level + per-step levels
//!  │ guardrail             -> validate_plan
//!  v
//! Plan (validated) ──> "plan.created" on the bus
//! ```
//!
//! Anomaly reports from the critic arrive on
//! `learning.autonomy_recalibration` and raise the risk of later plans for
//! the same goal type.

use crate::bus::{CoordinationBus, SubscriptionId};
use crate::context::{ContextProvider, ContextQuery, PlanningContext};
use crate::guardrail::Guardrail;
use conductor_core::config::PlannerSettings;
use conductor_core::error::{ConductorError, Result};
use conductor_core::goal::{Goal, GoalType};
use conductor_core::message::{topics, Message};
use conductor_core::payload::StepInput;
use conductor_core::plan::{Plan, PlanDependency, PlanStep, RiskAssessment};
use conductor_core::resolver::DependencyGraph;
use conductor_core::types::{AutonomyLevel, PlanStatus, RiskLevel};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

const SOURCE: &str = "planner";

/// Snippets attached to research steps when a context provider is configured
const CONTEXT_HINT_LIMIT: usize = 3;

pub struct Planner {
    settings: PlannerSettings,
    bus: Arc<CoordinationBus>,
    guardrail: Arc<dyn Guardrail>,
    context_provider: Option<Arc<dyn ContextProvider>>,

    /// Goal types with anomalies reported by the critic, with report counts
    flagged: Arc<DashMap<GoalType, usize>>,
}

impl Planner {
    pub fn new(
        settings: PlannerSettings,
        bus: Arc<CoordinationBus>,
        guardrail: Arc<dyn Guardrail>,
    ) -> Self {
        Self {
            settings,
            bus,
            guardrail,
            context_provider: None,
            flagged: Arc::new(DashMap::new()),
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Build, assess and validate a plan for `goal`
    ///
    /// # Errors
    ///
    /// - `Config` when no strategy exists for the goal type
    /// - `CircularDependency` if the configured edges form a cycle
    /// - `PlanValidationFailed` when the guardrail rejects the draft
    pub async fn create_plan(&self, goal: &Goal, context: &PlanningContext) -> Result<Plan> {
        let strategy = self.settings.strategy(goal.goal_type).ok_or_else(|| {
            ConductorError::Config(format!("no strategy for goal type {}", goal.goal_type))
        })?;

        tracing::info!(
            goal_id = %goal.id,
            goal_type = %goal.goal_type,
            approach = ?strategy.approach,
            "creating plan"
        );

        let mut plan = Plan::new(goal);
        plan.steps = strategy
            .workers
            .iter()
            .map(|worker| PlanStep::for_worker(worker.clone(), goal))
            .collect();
        plan.dependencies = self.build_dependencies(&plan.steps);

        DependencyGraph::build(&plan.steps, &plan.dependencies)?.resolve()?;

        self.attach_context(goal, &mut plan).await;

        let ambient = context
            .ambient_autonomy
            .unwrap_or(self.settings.default_autonomy);
        plan.risk = self.assess_risk(goal, &mut plan.steps, ambient);
        plan.autonomy_level = match plan.risk.level {
            RiskLevel::Critical => AutonomyLevel::L0,
            RiskLevel::High => AutonomyLevel::L1,
            _ => goal
                .constraints
                .autonomy_level
                .unwrap_or(AutonomyLevel::L2),
        };
        for step in &mut plan.steps {
            step.autonomy_level = step.autonomy_level.min(plan.autonomy_level);
        }

        let verdict = self.guardrail.validate_plan(&plan, context).await?;
        if !verdict.valid {
            tracing::warn!(
                goal_id = %goal.id,
                violations = ?verdict.violations,
                "guardrail rejected plan"
            );
            return Err(ConductorError::PlanValidationFailed {
                violations: verdict.violations,
            });
        }

        plan.transition_to(PlanStatus::Validated)?;
        plan.estimated_completion = Some(
            plan.created_at + chrono::Duration::milliseconds(plan.total_timeout_ms() as i64),
        );

        let event = Message::new(
            topics::PLAN_CREATED,
            SOURCE,
            json!({
                "plan_id": plan.id,
                "goal_id": goal.id,
                "goal_type": goal.goal_type,
                "risk_level": plan.risk.level,
                "risk_score": plan.risk.score,
                "autonomy_level": plan.autonomy_level,
                "step_count": plan.steps.len(),
            }),
        );
        if let Err(e) = self.bus.publish(event).await {
            tracing::warn!(plan_id = %plan.id, "failed to publish plan.created: {}", e);
        }

        tracing::info!(
            plan_id = %plan.id,
            risk = %plan.risk.level,
            autonomy = %plan.autonomy_level,
            steps = plan.steps.len(),
            "plan validated"
        );
        Ok(plan)
    }

    /// Sequential chain between consecutive steps plus configured on-success pairs
    ///
    /// Pairs whose `from` step comes after the `to` step are skipped, since
    /// the chain already orders them the other way.
    pub fn build_dependencies(&self, steps: &[PlanStep]) -> Vec<PlanDependency> {
        let mut dependencies: Vec<PlanDependency> = steps
            .windows(2)
            .map(|pair| PlanDependency::new(pair[0].id.clone(), pair[1].id.clone()))
            .collect();

        for edge in &self.settings.success_edges {
            for (i, from) in steps.iter().enumerate() {
                if from.worker_type != edge.from {
                    continue;
                }
                for to in steps[i + 1..].iter().filter(|s| s.worker_type == edge.to) {
                    dependencies.push(PlanDependency::on_success(from.id.clone(), to.id.clone()));
                }
            }
        }

        dependencies
    }

    /// Score the goal, set per-step autonomy, and collect factors
    ///
    /// Goal-level factors are evaluated first because they decide whether
    /// high-risk workers get clamped; the full-autonomy factor looks at the
    /// resulting step levels.
    pub fn assess_risk(
        &self,
        goal: &Goal,
        steps: &mut [PlanStep],
        ambient: AutonomyLevel,
    ) -> RiskAssessment {
        let mut score = 0.0;
        let mut factors = Vec::new();
        let mut mitigations = Vec::new();

        if goal.goal_type.is_outbound() {
            score += self.settings.outbound_risk;
            factors.push(format!("{} sends communication to prospects", goal.goal_type));
            mitigations.push("Run compliance checks and cap daily send volume".to_string());
        }

        if let Some(budget) = goal.budget() {
            if budget > self.settings.budget_threshold {
                score += self.settings.budget_risk;
                factors.push(format!(
                    "Budget {:.0} exceeds threshold {:.0}",
                    budget, self.settings.budget_threshold
                ));
                mitigations.push("Require sign-off on spend milestones".to_string());
            }
        }

        if let Some(reports) = self.flagged.get(&goal.goal_type) {
            score += self.settings.anomaly_risk;
            factors.push(format!(
                "{} anomaly report(s) for {} plans",
                *reports, goal.goal_type
            ));
            mitigations.push("Gate high-risk steps until metrics recover".to_string());
        }

        let goal_level_risk = !factors.is_empty();
        for step in steps.iter_mut() {
            step.autonomy_level = if step.worker_type.is_high_risk() && goal_level_risk {
                ambient.min(AutonomyLevel::L1)
            } else {
                ambient
            };
        }

        if steps.iter().any(|s| s.autonomy_level.is_full()) {
            score += self.settings.full_autonomy_risk;
            factors.push("Plan contains fully autonomous steps".to_string());
            mitigations.push("Monitor autonomous steps in real time".to_string());
        }

        RiskAssessment::from_score(score, factors, mitigations)
    }

    async fn attach_context(&self, goal: &Goal, plan: &mut Plan) {
        let Some(provider) = &self.context_provider else {
            return;
        };

        let query = ContextQuery {
            text: goal.description.clone(),
            goal_type: Some(goal.goal_type),
            limit: CONTEXT_HINT_LIMIT,
        };
        let hints: Vec<String> = match provider.query(query).await {
            Ok(response) => response
                .ranked()
                .into_iter()
                .take(CONTEXT_HINT_LIMIT)
                .map(|d| d.content)
                .collect(),
            Err(e) => {
                tracing::warn!(goal_id = %goal.id, "context query failed: {}", e);
                return;
            }
        };

        for step in &mut plan.steps {
            if let StepInput::Research { context_hints, .. } = &mut step.input {
                context_hints.extend(hints.iter().cloned());
            }
        }
    }

    /// Remember that the critic reported anomalies for `goal_type`
    pub fn record_anomaly_feedback(&self, goal_type: GoalType) {
        *self.flagged.entry(goal_type).or_insert(0) += 1;
    }

    pub fn clear_feedback(&self, goal_type: GoalType) {
        self.flagged.remove(&goal_type);
    }

    pub fn is_flagged(&self, goal_type: GoalType) -> bool {
        self.flagged.contains_key(&goal_type)
    }

    /// Listen for autonomy recalibration events from the critic
    pub fn subscribe_feedback(&self) -> SubscriptionId {
        let flagged = Arc::clone(&self.flagged);
        self.bus
            .subscribe(topics::LEARNING_AUTONOMY_RECALIBRATION, move |message: Message| {
                let flagged = Arc::clone(&flagged);
                async move {
                    let goal_type = message
                        .payload
                        .get("goal_type")
                        .cloned()
                        .map(serde_json::from_value::<GoalType>)
                        .transpose()?;
                    match goal_type {
                        Some(goal_type) => {
                            *flagged.entry(goal_type).or_insert(0) += 1;
                            tracing::info!(goal_type = %goal_type, "anomaly feedback recorded");
                        }
                        None => tracing::debug!("recalibration event without goal type"),
                    }
                    Ok(())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::{AllowAll, PolicyGuardrail};
    use conductor_core::plan::DependencyCondition;
    use conductor_core::worker::WorkerType;

    fn planner() -> Planner {
        Planner::new(
            PlannerSettings::default(),
            Arc::new(CoordinationBus::new()),
            Arc::new(AllowAll),
        )
    }

    #[tokio::test]
    async fn test_revive_pipeline_plan() {
        let goal = Goal::builder(GoalType::RevivePipeline).build().unwrap();
        let plan = planner()
            .create_plan(&goal, &PlanningContext::default())
            .await
            .unwrap();

        assert_eq!(
            plan.worker_types(),
            vec![
                WorkerType::Research,
                WorkerType::Revival,
                WorkerType::Copy,
                WorkerType::SendTimeBandit
            ]
        );
        assert_eq!(plan.status, PlanStatus::Validated);

        let research = &plan.steps[0].id;
        let revival = &plan.steps[1].id;
        assert!(plan.dependencies.iter().any(|d| &d.from == research
            && &d.to == revival
            && d.condition == DependencyCondition::OnSuccess));
        for pair in plan.steps.windows(2) {
            assert!(plan.dependencies.iter().any(|d| d.from == pair[0].id
                && d.to == pair[1].id
                && d.condition == DependencyCondition::Unconditional));
        }

        // outbound only: medium risk, high-risk workers clamped to L1
        assert_eq!(plan.risk.level, RiskLevel::Medium);
        assert_eq!(plan.autonomy_level, AutonomyLevel::L2);
        assert_eq!(plan.steps[0].autonomy_level, AutonomyLevel::L2);
        assert_eq!(plan.steps[1].autonomy_level, AutonomyLevel::L1);
        assert_eq!(plan.steps[2].autonomy_level, AutonomyLevel::L1);
    }

    #[tokio::test]
    async fn test_large_budget_is_high_risk() {
        let goal = Goal::builder(GoalType::IncreaseMeetings)
            .budget(25_000.0)
            .build()
            .unwrap();
        let plan = planner()
            .create_plan(&goal, &PlanningContext::default())
            .await
            .unwrap();

        assert!((plan.risk.score - 0.6).abs() < 1e-9);
        assert_eq!(plan.risk.level, RiskLevel::High);
        assert!(plan.risk.requires_approval);
        assert_eq!(plan.autonomy_level, AutonomyLevel::L1);
        assert_eq!(plan.risk.factors.len(), plan.risk.mitigations.len());
        assert!(plan.steps.iter().all(|s| s.autonomy_level <= AutonomyLevel::L1));
    }

    #[tokio::test]
    async fn test_full_autonomy_with_budget_is_critical() {
        let goal = Goal::builder(GoalType::BuildIcp)
            .budget(50_000.0)
            .build()
            .unwrap();
        let context = PlanningContext::default().with_ambient_autonomy(AutonomyLevel::L3);
        let plan = planner().create_plan(&goal, &context).await.unwrap();

        // budget 0.3 + full autonomy 0.2 -> high
        assert_eq!(plan.risk.level, RiskLevel::High);
        assert_eq!(plan.autonomy_level, AutonomyLevel::L1);

        let planner = planner();
        planner.record_anomaly_feedback(GoalType::BuildIcp);
        let plan = planner.create_plan(&goal, &context).await.unwrap();

        // + anomaly 0.2 -> critical, every step gated
        assert_eq!(plan.risk.level, RiskLevel::Critical);
        assert_eq!(plan.autonomy_level, AutonomyLevel::L0);
        assert!(plan.steps.iter().all(|s| s.autonomy_level == AutonomyLevel::L0));
    }

    #[tokio::test]
    async fn test_requested_autonomy_respected_when_risk_is_low() {
        let goal = Goal::builder(GoalType::ForecastRevenue)
            .autonomy_level(AutonomyLevel::L1)
            .build()
            .unwrap();
        let plan = planner()
            .create_plan(&goal, &PlanningContext::default())
            .await
            .unwrap();

        assert_eq!(plan.risk.level, RiskLevel::Low);
        assert_eq!(plan.autonomy_level, AutonomyLevel::L1);
        assert!(plan.steps.iter().all(|s| s.autonomy_level == AutonomyLevel::L1));
    }

    #[tokio::test]
    async fn test_guardrail_rejection() {
        let planner = Planner::new(
            PlannerSettings::default(),
            Arc::new(CoordinationBus::new()),
            Arc::new(PolicyGuardrail::new().block_worker(WorkerType::SendTimeBandit)),
        );
        let goal = Goal::builder(GoalType::OptimizeSequence).build().unwrap();

        let err = planner
            .create_plan(&goal, &PlanningContext::default())
            .await
            .unwrap_err();
        match err {
            ConductorError::PlanValidationFailed { violations } => {
                assert!(violations[0].contains("SEND_TIME_BANDIT"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_success_edges_only_point_forward() {
        let planner = planner();
        let goal = Goal::builder(GoalType::IncreaseMeetings).build().unwrap();
        let steps: Vec<PlanStep> = [
            WorkerType::Copy,
            WorkerType::Personalization,
            WorkerType::Research,
        ]
        .into_iter()
        .map(|w| PlanStep::for_worker(w, &goal))
        .collect();

        let deps = planner.build_dependencies(&steps);
        assert!(deps
            .iter()
            .all(|d| d.condition == DependencyCondition::Unconditional));
        assert!(DependencyGraph::build(&steps, &deps).unwrap().resolve().is_ok());
    }
}
