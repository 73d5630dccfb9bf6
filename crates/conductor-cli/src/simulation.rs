//! Simulated workers and synthetic outcomes for local runs

use async_trait::async_trait;
use conductor_core::config::ConductorConfig;
use conductor_core::error::WorkerError;
use conductor_core::outcome::{Outcome, OutcomeType};
use conductor_core::payload::StepInput;
use conductor_core::plan::Plan;
use conductor_core::worker::WorkerType;
use conductor_runtime::guardrail::PolicyGuardrail;
use conductor_runtime::{Conductor, InMemoryStore, Worker, WorkerContext, WorkerOutput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Worker that sleeps briefly and fabricates a plausible result
pub struct SimulatedWorker {
    worker_type: WorkerType,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedWorker {
    pub fn new(worker_type: WorkerType, failure_rate: f64, seed: u64) -> Self {
        Self {
            worker_type,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    fn worker_type(&self) -> WorkerType {
        self.worker_type.clone()
    }

    async fn execute(
        &self,
        input: &StepInput,
        context: &WorkerContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let (fails, latency_ms, confidence, scale) = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| WorkerError::Failed("simulation state poisoned".to_string()))?;
            (
                rng.gen_bool(self.failure_rate),
                rng.gen_range(5..40u64),
                rng.gen_range(0.6..0.99),
                rng.gen_range(0.2..0.9),
            )
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fails {
            return Err(WorkerError::Failed(format!(
                "simulated {} outage on attempt {}",
                self.worker_type, context.attempt
            )));
        }

        Ok(WorkerOutput::new(fabricate(input, scale))
            .with_metric("latency_ms", latency_ms as f64)
            .with_confidence(confidence))
    }
}

fn fabricate(input: &StepInput, scale: f64) -> serde_json::Value {
    match input {
        StepInput::Research {
            account_limit,
            context_hints,
            ..
        } => json!({
            "accounts_found": (*account_limit as f64 * scale).round(),
            "hints_used": context_hints.len(),
        }),
        StepInput::Revival {
            stalled_after_days, ..
        } => json!({
            "stalled_deals": (40.0 * scale).round(),
            "stalled_after_days": stalled_after_days,
        }),
        StepInput::Personalization { signals } => json!({ "signals_matched": signals.len() }),
        StepInput::Copy { variants, tone, .. } => json!({ "variants_written": variants, "tone": tone }),
        StepInput::SendTimeBandit { candidate_hours, .. } => {
            let index = ((candidate_hours.len() as f64 - 1.0).max(0.0) * scale).round() as usize;
            json!({ "chosen_hour": candidate_hours.get(index) })
        }
        StepInput::Compliance { policies } => json!({ "policies_checked": policies.len() }),
        StepInput::CrmSync { fields } => json!({ "fields_synced": fields.len() }),
        StepInput::Analysis { worker, question, .. } => json!({
            "worker": worker,
            "question": question,
            "signal_strength": scale,
        }),
        StepInput::Custom { payload, .. } => payload.clone(),
    }
}

/// Conductor with a simulated worker for every worker the strategies use
pub fn conductor(
    config: ConductorConfig,
    failure_rate: f64,
    seed: u64,
) -> anyhow::Result<Conductor> {
    let workers: BTreeSet<WorkerType> = config
        .planner
        .strategies
        .iter()
        .flat_map(|s| s.workers.iter().cloned())
        .collect();

    let mut builder = Conductor::builder()
        .with_config(config)
        .with_guardrail(Arc::new(PolicyGuardrail::new()))
        .with_memory_store(Arc::new(InMemoryStore::new()));
    for (i, worker) in workers.into_iter().enumerate() {
        builder = builder.register_worker(Arc::new(SimulatedWorker::new(
            worker,
            failure_rate,
            seed.wrapping_add(i as u64),
        )));
    }
    Ok(builder.build()?)
}

/// Synthetic outcomes attributed to the plan's copy step, or its last step
pub fn outcomes(plan: &Plan, count: usize, rng: &mut StdRng) -> Vec<Outcome> {
    let worker = plan
        .step_by_worker(&WorkerType::Copy)
        .or_else(|| plan.steps.last())
        .map(|s| s.worker_type.clone())
        .unwrap_or(WorkerType::Analytics);

    (0..count)
        .map(|_| {
            let roll: f64 = rng.gen();
            let (outcome_type, value) = if roll < 0.45 {
                (OutcomeType::ReplyReceived, if rng.gen_bool(0.7) { 1.0 } else { 0.0 })
            } else if roll < 0.65 {
                (OutcomeType::MeetingBooked, 1.0)
            } else if roll < 0.80 {
                (OutcomeType::Unsubscribed, 0.0)
            } else if roll < 0.85 {
                (OutcomeType::SpamReported, 0.0)
            } else if roll < 0.92 {
                (OutcomeType::RevenueWon, rng.gen_range(1_000.0..20_000.0f64).round())
            } else {
                (OutcomeType::ReplyReceived, 0.0)
            };

            let mut outcome = Outcome::new(outcome_type, plan.id, worker.clone(), value)
                .with_confidence(rng.gen_range(0.5..1.0));
            if outcome_type == OutcomeType::ReplyReceived {
                outcome = outcome.with_metadata("reply_quality", json!(rng.gen_range(0.1..1.0)));
            }
            outcome
        })
        .collect()
}
