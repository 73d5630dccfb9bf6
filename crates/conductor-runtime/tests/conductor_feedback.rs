//! End-to-end: plan, execute, score outcomes, feed anomalies back to planning

use async_trait::async_trait;
use conductor_core::config::ConductorConfig;
use conductor_core::error::WorkerError;
use conductor_core::goal::{Goal, GoalType};
use conductor_core::message::{topics, Message};
use conductor_core::outcome::{Outcome, OutcomeType};
use conductor_core::payload::StepInput;
use conductor_core::plan::DependencyCondition;
use conductor_core::types::{AutonomyLevel, PlanStatus, RiskLevel};
use conductor_core::worker::WorkerType;
use conductor_runtime::context::{ContextDocument, ContextProvider, ContextQuery, ContextResponse};
use conductor_runtime::guardrail::PolicyGuardrail;
use conductor_runtime::{Conductor, PlanningContext, Worker, WorkerContext, WorkerOutput};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Echo(WorkerType);

#[async_trait]
impl Worker for Echo {
    fn worker_type(&self) -> WorkerType {
        self.0.clone()
    }

    async fn execute(
        &self,
        input: &StepInput,
        _context: &WorkerContext,
    ) -> Result<WorkerOutput, WorkerError> {
        Ok(WorkerOutput::new(json!({ "input": input })).with_confidence(0.95))
    }
}

struct Playbook;

#[async_trait]
impl ContextProvider for Playbook {
    async fn query(&self, query: ContextQuery) -> conductor_core::Result<ContextResponse> {
        Ok(ContextResponse {
            documents: vec![
                ContextDocument {
                    id: "old".into(),
                    content: "Q3 win stories".into(),
                    relevance: 0.4,
                },
                ContextDocument {
                    id: "best".into(),
                    content: format!("Playbook for {}", query.text),
                    relevance: 0.9,
                },
            ],
            total_found: 2,
        })
    }
}

const ALL_WORKERS: [WorkerType; 12] = [
    WorkerType::Research,
    WorkerType::Revival,
    WorkerType::Personalization,
    WorkerType::Copy,
    WorkerType::SendTimeBandit,
    WorkerType::Compliance,
    WorkerType::CrmSync,
    WorkerType::Analytics,
    WorkerType::IcpBuilder,
    WorkerType::LeakageDetector,
    WorkerType::ChurnPredictor,
    WorkerType::RevenueForecaster,
];

fn conductor() -> Conductor {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("conductor_runtime=debug")
        .try_init();

    let mut builder = Conductor::builder()
        .with_config(ConductorConfig::default())
        .with_guardrail(Arc::new(PolicyGuardrail::new()))
        .with_context_provider(Arc::new(Playbook));
    for worker in ALL_WORKERS {
        builder = builder.register_worker(Arc::new(Echo(worker)));
    }
    builder.build().unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_revive_pipeline_end_to_end() {
    let conductor = conductor();
    let goal = Goal::builder(GoalType::RevivePipeline)
        .description("Re-engage stalled Q2 opportunities")
        .build()
        .unwrap();

    let plan = conductor.submit(&goal, "e2e").await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(
        plan.worker_types(),
        vec![
            WorkerType::Research,
            WorkerType::Revival,
            WorkerType::Copy,
            WorkerType::SendTimeBandit
        ]
    );
    assert!(plan.dependencies.iter().any(|d| {
        d.condition == DependencyCondition::OnSuccess
            && d.from == plan.steps[0].id
            && d.to == plan.steps[1].id
    }));
    assert!(plan.steps.iter().all(|s| s.succeeded()));

    // research grounded with the best-ranked snippet first
    match &plan.steps[0].input {
        StepInput::Research { context_hints, .. } => {
            assert_eq!(context_hints.len(), 2);
            assert!(context_hints[0].starts_with("Playbook for"));
        }
        other => panic!("unexpected input {:?}", other),
    }

    let bus = conductor.bus();
    for topic in [topics::PLAN_CREATED, topics::PLAN_STARTED, topics::PLAN_COMPLETED] {
        assert_eq!(bus.history_matching(topic).await.len(), 1, "{}", topic);
    }
    assert_eq!(bus.history_matching(topics::STEP_COMPLETED).await.len(), 4);
}

#[tokio::test]
async fn test_outcomes_published_by_workers_reach_the_critic() {
    let conductor = conductor();
    let goal = Goal::builder(GoalType::IncreaseMeetings).build().unwrap();
    let plan = conductor.submit(&goal, "bus-outcomes").await.unwrap();

    for value in [1.0, 1.0, 0.0] {
        let outcome = Outcome::new(OutcomeType::ReplyReceived, plan.id, WorkerType::Copy, value);
        let message = Message::new(
            topics::OUTCOME_RECORDED,
            "copy-worker",
            serde_json::to_value(&outcome).unwrap(),
        );
        conductor.bus().publish(message).await.unwrap();
    }

    let critic = conductor.critic();
    let mut ingested = false;
    for _ in 0..100 {
        if critic.outcomes_for(plan.id).await.len() == 3 {
            ingested = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ingested);

    let evaluation = conductor.evaluate(plan.id, "bus-outcomes").await.unwrap();
    assert_eq!(evaluation.goal_type, Some(GoalType::IncreaseMeetings));
    assert_eq!(evaluation.metrics.replies, 3);
    assert!((evaluation.metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(evaluation.worker_performance.contains_key(&WorkerType::Copy));
}

#[tokio::test]
async fn test_anomalies_raise_risk_of_later_plans() {
    let conductor = conductor();
    let goal = Goal::builder(GoalType::IncreaseMeetings).build().unwrap();

    let first = conductor.submit(&goal, "feedback").await.unwrap();
    assert_eq!(first.risk.level, RiskLevel::Medium);
    assert_eq!(first.autonomy_level, AutonomyLevel::L2);

    for _ in 0..8 {
        conductor
            .process_outcome(
                Outcome::new(OutcomeType::ReplyReceived, first.id, WorkerType::Copy, 1.0),
                "feedback",
            )
            .await
            .unwrap();
    }
    let spam = conductor
        .process_outcome(
            Outcome::new(OutcomeType::SpamReported, first.id, WorkerType::Copy, 0.0),
            "feedback",
        )
        .await
        .unwrap();
    assert!(spam.intervention.is_some());

    let evaluation = conductor.evaluate(first.id, "feedback").await.unwrap();
    assert!(!evaluation.anomalies.is_empty());
    assert!(evaluation.needs_content_update());
    assert_eq!(
        conductor
            .bus()
            .history_matching(topics::LEARNING_BANDIT_UPDATE)
            .await
            .len(),
        1
    );

    let planner = conductor.planner();
    assert!(eventually(|| planner.is_flagged(GoalType::IncreaseMeetings)).await);
    assert!(!planner.is_flagged(GoalType::RevivePipeline));

    let second = conductor
        .plan(&goal, &PlanningContext::new("feedback"))
        .await
        .unwrap();
    assert_eq!(second.risk.level, RiskLevel::High);
    assert!(second.risk.requires_approval);
    assert_eq!(second.autonomy_level, AutonomyLevel::L1);
    assert!(second.risk.factors.iter().any(|f| f.contains("anomaly")));
}

#[tokio::test]
async fn test_evaluation_errors_are_isolated() {
    let conductor = conductor();
    let goal = Goal::builder(GoalType::ForecastRevenue).build().unwrap();
    let plan = conductor.submit(&goal, "quiet").await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(conductor.evaluate(plan.id, "quiet").await.is_none());
    assert_eq!(plan.status, PlanStatus::Completed);
}

#[tokio::test]
async fn test_execution_failure_is_reported_on_the_plan() {
    let conductor = Conductor::builder()
        .register_worker(Arc::new(Echo(WorkerType::Analytics)))
        .build()
        .unwrap();
    let goal = Goal::builder(GoalType::DetectLeakage).build().unwrap();

    let plan = conductor.submit(&goal, "missing").await.unwrap();

    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan
        .failure
        .as_ref()
        .unwrap()
        .message
        .contains("LEAKAGE_DETECTOR"));
}

#[tokio::test]
async fn test_shutdown_closes_the_bus() {
    let conductor = conductor();
    assert!(conductor.bus().subscriber_count() >= 3);

    conductor.shutdown();
    assert!(conductor.bus().is_closed());
    assert_eq!(conductor.bus().subscriber_count(), 0);

    let goal = Goal::builder(GoalType::PredictChurn).build().unwrap();
    // planning still works, lifecycle events are dropped with a warning
    let plan = conductor.submit(&goal, "closed").await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
}
