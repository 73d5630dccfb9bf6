//! Critic - scores outcomes and evaluates plans
//!
//! Two paths:
//! - real time: `process_outcome` scores a single outcome and raises an
//!   intervention for spam reports and unsubscribes
//! - batch: `evaluate_plan` aggregates every outcome recorded for a plan
//!   into metrics, quality, recommendations and anomalies
//!
//! Evaluations feed back into the system over the bus: content
//! recommendations trigger `learning.bandit_update`, anomalies trigger
//! `learning.autonomy_recalibration`, which the planner listens to.

use crate::bus::{CoordinationBus, SubscriptionId};
use crate::context::CriticContext;
use conductor_core::config::CriticSettings;
use conductor_core::error::Result;
use conductor_core::evaluation::{
    Evaluator, InterventionKind, OutcomeAssessment, PlanEvaluation,
};
use conductor_core::goal::GoalType;
use conductor_core::message::{topics, Message};
use conductor_core::outcome::Outcome;
use dashmap::DashMap;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use uuid::Uuid;

const SOURCE: &str = "critic";

/// Outcomes in arrival order, oldest dropped past `limit`
struct Ledger {
    outcomes: RwLock<VecDeque<Outcome>>,
    limit: usize,
}

impl Ledger {
    fn new(limit: usize) -> Self {
        Self {
            outcomes: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    async fn push(&self, outcome: Outcome) {
        let mut outcomes = self.outcomes.write().await;
        outcomes.push_back(outcome);
        while outcomes.len() > self.limit {
            outcomes.pop_front();
        }
    }
}

/// Goal type per plan, oldest registration forgotten past `limit`
struct PlanGoals {
    goals: DashMap<Uuid, GoalType>,
    order: Mutex<VecDeque<Uuid>>,
    limit: usize,
}

impl PlanGoals {
    fn new(limit: usize) -> Self {
        Self {
            goals: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    fn insert(&self, plan_id: Uuid, goal_type: GoalType) {
        if self.goals.insert(plan_id, goal_type).is_some() {
            return;
        }
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back(plan_id);
        while order.len() > self.limit {
            if let Some(oldest) = order.pop_front() {
                self.goals.remove(&oldest);
            }
        }
    }

    fn get(&self, plan_id: &Uuid) -> Option<GoalType> {
        self.goals.get(plan_id).map(|g| *g.value())
    }

    fn remove(&self, plan_id: &Uuid) {
        if self.goals.remove(plan_id).is_some() {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            order.retain(|id| id != plan_id);
        }
    }

    fn len(&self) -> usize {
        self.goals.len()
    }
}

pub struct Critic {
    evaluator: Evaluator,
    bus: Arc<CoordinationBus>,
    ledger: Arc<Ledger>,

    /// Goal type of each plan announced on `plan.created`
    plan_goals: Arc<PlanGoals>,
}

impl Critic {
    pub fn new(settings: CriticSettings, bus: Arc<CoordinationBus>) -> Self {
        let ledger = Arc::new(Ledger::new(settings.outcome_limit));
        let plan_goals = Arc::new(PlanGoals::new(settings.plan_limit));
        Self {
            evaluator: Evaluator::new(settings),
            bus,
            ledger,
            plan_goals,
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Append `outcome` to the ledger
    pub async fn record_outcome(&self, outcome: Outcome) {
        tracing::debug!(
            outcome_id = %outcome.id,
            plan_id = %outcome.plan_id,
            outcome_type = %outcome.outcome_type,
            "recording outcome"
        );
        self.ledger.push(outcome).await;
    }

    /// Remember which goal type `plan_id` serves
    pub fn register_plan(&self, plan_id: Uuid, goal_type: GoalType) {
        self.plan_goals.insert(plan_id, goal_type);
    }

    /// Drop everything held for `plan_id` once it will not be evaluated again
    pub async fn forget_plan(&self, plan_id: Uuid) {
        self.plan_goals.remove(&plan_id);
        self.ledger
            .outcomes
            .write()
            .await
            .retain(|o| o.plan_id != plan_id);
        tracing::debug!(plan_id = %plan_id, "plan forgotten");
    }

    pub fn tracked_plans(&self) -> usize {
        self.plan_goals.len()
    }

    pub async fn outcomes_for(&self, plan_id: Uuid) -> Vec<Outcome> {
        self.ledger
            .outcomes
            .read()
            .await
            .iter()
            .filter(|o| o.plan_id == plan_id)
            .cloned()
            .collect()
    }

    pub async fn outcome_count(&self) -> usize {
        self.ledger.outcomes.read().await.len()
    }

    /// Score one outcome as it arrives and record it
    ///
    /// Spam reports and unsubscribes that score below the quality threshold
    /// publish an intervention.
    pub async fn process_outcome(
        &self,
        outcome: Outcome,
        context: &CriticContext,
    ) -> Result<OutcomeAssessment> {
        let assessment = self.evaluator.assess_outcome(&outcome);
        self.record_outcome(outcome.clone()).await;

        self.publish(
            topics::CRITIC_OUTCOME_SCORED,
            json!({
                "outcome_id": outcome.id,
                "plan_id": outcome.plan_id,
                "outcome_type": outcome.outcome_type,
                "worker": outcome.worker_type,
                "score": assessment.score,
                "session_id": context.session_id,
            }),
        )
        .await;

        if let Some(intervention) = &assessment.intervention {
            let topic = match intervention.kind {
                InterventionKind::AutonomyReduction => topics::INTERVENTION_AUTONOMY_REDUCTION,
                InterventionKind::SequencePause => topics::INTERVENTION_SEQUENCE_PAUSE,
            };
            tracing::warn!(
                plan_id = %intervention.plan_id,
                worker = %intervention.worker_type,
                kind = ?intervention.kind,
                "intervention required: {}",
                intervention.reason
            );
            self.publish(topic, serde_json::to_value(intervention)?).await;
        }

        Ok(assessment)
    }

    /// Evaluate every outcome recorded for `plan_id`
    ///
    /// # Errors
    ///
    /// `Evaluation` when the plan has no outcomes.
    pub async fn evaluate_plan(
        &self,
        plan_id: Uuid,
        context: &CriticContext,
    ) -> Result<PlanEvaluation> {
        let goal_type = self
            .plan_goals
            .get(&plan_id)
            .or(context.goal_type);
        let outcomes = self.outcomes_for(plan_id).await;

        let evaluation = self.evaluator.evaluate(plan_id, goal_type, &outcomes)?;
        tracing::info!(
            plan_id = %plan_id,
            outcomes = evaluation.metrics.total_outcomes,
            quality = evaluation.quality.score,
            anomalies = evaluation.anomalies.len(),
            "plan evaluated"
        );

        self.publish(
            topics::CRITIC_EVALUATION_COMPLETED,
            json!({
                "plan_id": plan_id,
                "goal_type": goal_type,
                "quality": evaluation.quality.score,
                "success_rate": evaluation.metrics.success_rate,
                "recommendations": evaluation.recommendations.len(),
                "anomalies": evaluation.anomalies.len(),
            }),
        )
        .await;

        for anomaly in &evaluation.anomalies {
            tracing::warn!(plan_id = %plan_id, kind = ?anomaly.kind, "{}", anomaly.description);
            self.publish(
                topics::CRITIC_ANOMALY_DETECTED,
                json!({ "plan_id": plan_id, "anomaly": anomaly }),
            )
            .await;
        }

        if evaluation.needs_content_update() {
            self.publish(
                topics::LEARNING_BANDIT_UPDATE,
                json!({
                    "plan_id": plan_id,
                    "goal_type": goal_type,
                    "conversion_rate": evaluation.metrics.conversion_rate,
                }),
            )
            .await;
        }

        if !evaluation.anomalies.is_empty() {
            self.publish(
                topics::LEARNING_AUTONOMY_RECALIBRATION,
                json!({
                    "plan_id": plan_id,
                    "goal_type": goal_type,
                    "anomalies": evaluation.anomalies,
                }),
            )
            .await;
        }

        Ok(evaluation)
    }

    /// Listen for plan announcements and outcomes published by workers
    pub fn attach(&self) -> Vec<SubscriptionId> {
        let plan_goals = Arc::clone(&self.plan_goals);
        let plans = self.bus.subscribe(topics::PLAN_CREATED, move |message: Message| {
            let plan_goals = Arc::clone(&plan_goals);
            async move {
                let plan_id = message
                    .payload
                    .get("plan_id")
                    .cloned()
                    .map(serde_json::from_value::<Uuid>)
                    .transpose()?;
                let goal_type = message
                    .payload
                    .get("goal_type")
                    .cloned()
                    .map(serde_json::from_value::<GoalType>)
                    .transpose()?;
                if let (Some(plan_id), Some(goal_type)) = (plan_id, goal_type) {
                    plan_goals.insert(plan_id, goal_type);
                }
                Ok(())
            }
        });

        let ledger = Arc::clone(&self.ledger);
        let outcomes = self
            .bus
            .subscribe(topics::OUTCOME_RECORDED, move |message: Message| {
                let ledger = Arc::clone(&ledger);
                async move {
                    let outcome: Outcome = serde_json::from_value(message.payload)?;
                    tracing::debug!(outcome_id = %outcome.id, "outcome received from bus");
                    ledger.push(outcome).await;
                    Ok(())
                }
            });

        vec![plans, outcomes]
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        if let Err(e) = self.bus.publish(Message::new(topic, SOURCE, payload)).await {
            tracing::warn!(topic = %topic, "failed to publish critic event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::outcome::OutcomeType;
    use conductor_core::worker::WorkerType;

    fn critic() -> Critic {
        Critic::new(CriticSettings::default(), Arc::new(CoordinationBus::new()))
    }

    #[tokio::test]
    async fn test_spam_report_triggers_autonomy_reduction() {
        let critic = critic();
        let outcome = Outcome::new(OutcomeType::SpamReported, Uuid::new_v4(), WorkerType::Copy, 0.0);

        let assessment = critic
            .process_outcome(outcome, &CriticContext::default())
            .await
            .unwrap();

        assert_eq!(assessment.score, 0.0);
        assert_eq!(
            assessment.intervention.map(|i| i.kind),
            Some(InterventionKind::AutonomyReduction)
        );
        assert_eq!(critic.outcome_count().await, 1);
        assert_eq!(
            critic
                .bus
                .history_matching(topics::INTERVENTION_AUTONOMY_REDUCTION)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_evaluate_without_outcomes() {
        let err = critic()
            .evaluate_plan(Uuid::new_v4(), &CriticContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "evaluation");
    }

    #[tokio::test]
    async fn test_goal_type_from_context() {
        let critic = critic();
        let plan_id = Uuid::new_v4();
        critic
            .record_outcome(Outcome::new(
                OutcomeType::MeetingBooked,
                plan_id,
                WorkerType::Copy,
                1.0,
            ))
            .await;

        let context = CriticContext::default().with_goal_type(GoalType::IncreaseMeetings);
        let evaluation = critic.evaluate_plan(plan_id, &context).await.unwrap();
        assert_eq!(evaluation.goal_type, Some(GoalType::IncreaseMeetings));

        critic.register_plan(plan_id, GoalType::RevivePipeline);
        let evaluation = critic.evaluate_plan(plan_id, &context).await.unwrap();
        assert_eq!(evaluation.goal_type, Some(GoalType::RevivePipeline));
    }

    #[tokio::test]
    async fn test_ledger_and_plan_index_are_bounded() {
        let settings = CriticSettings {
            outcome_limit: 3,
            plan_limit: 2,
            ..CriticSettings::default()
        };
        let critic = Critic::new(settings, Arc::new(CoordinationBus::new()));

        let old_plan = Uuid::new_v4();
        let new_plan = Uuid::new_v4();
        for plan_id in [old_plan, old_plan, new_plan, new_plan] {
            critic
                .record_outcome(Outcome::new(OutcomeType::ReplyReceived, plan_id, WorkerType::Copy, 1.0))
                .await;
        }
        assert_eq!(critic.outcome_count().await, 3);
        assert_eq!(critic.outcomes_for(old_plan).await.len(), 1);
        assert_eq!(critic.outcomes_for(new_plan).await.len(), 2);

        let plans: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for plan_id in &plans {
            critic.register_plan(*plan_id, GoalType::BuildIcp);
        }
        assert_eq!(critic.tracked_plans(), 2);
        assert!(critic.plan_goals.get(&plans[0]).is_none());
        assert_eq!(critic.plan_goals.get(&plans[2]), Some(GoalType::BuildIcp));

        critic.forget_plan(new_plan).await;
        critic.forget_plan(plans[2]).await;
        assert!(critic.outcomes_for(new_plan).await.is_empty());
        assert_eq!(critic.outcome_count().await, 1);
        assert_eq!(critic.tracked_plans(), 1);
    }
}
