//! Typed step inputs
//!
//! Each worker family receives its own input shape. The executor dispatches
//! on [`StepInput::worker_type`]; workers match on the variant they handle.

use crate::goal::Goal;
use crate::worker::WorkerType;
use serde::{Deserialize, Serialize};

/// Input handed to a worker for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    Research {
        objective: String,
        account_limit: u32,
        /// Snippets retrieved from the context service at planning time
        #[serde(default)]
        context_hints: Vec<String>,
    },
    Revival {
        stalled_after_days: u32,
        min_deal_value: f64,
    },
    Personalization {
        signals: Vec<String>,
    },
    Copy {
        objective: String,
        tone: String,
        variants: u32,
    },
    SendTimeBandit {
        candidate_hours: Vec<u8>,
        exploration_rate: f64,
    },
    Compliance {
        policies: Vec<String>,
    },
    CrmSync {
        fields: Vec<String>,
    },
    /// Analytics-family workers share one input shape
    Analysis {
        worker: WorkerType,
        question: String,
        lookback_days: u32,
    },
    Custom {
        worker: WorkerType,
        payload: serde_json::Value,
    },
}

impl StepInput {
    /// Synthesize the default input for `worker` working toward `goal`
    pub fn for_worker(worker: &WorkerType, goal: &Goal) -> Self {
        match worker {
            WorkerType::Research => StepInput::Research {
                objective: goal.description.clone(),
                account_limit: 100,
                context_hints: Vec::new(),
            },
            WorkerType::Revival => StepInput::Revival {
                stalled_after_days: 30,
                min_deal_value: 0.0,
            },
            WorkerType::Personalization => StepInput::Personalization {
                signals: vec![
                    "recent-funding".to_string(),
                    "job-change".to_string(),
                    "tech-stack".to_string(),
                ],
            },
            WorkerType::Copy => StepInput::Copy {
                objective: goal.description.clone(),
                tone: "consultative".to_string(),
                variants: 2,
            },
            WorkerType::SendTimeBandit => StepInput::SendTimeBandit {
                candidate_hours: vec![8, 10, 13, 16],
                exploration_rate: 0.1,
            },
            WorkerType::Compliance => StepInput::Compliance {
                policies: vec!["can-spam".to_string(), "gdpr".to_string()],
            },
            WorkerType::CrmSync => StepInput::CrmSync {
                fields: vec!["stage".to_string(), "last_touch".to_string()],
            },
            WorkerType::Analytics
            | WorkerType::IcpBuilder
            | WorkerType::LeakageDetector
            | WorkerType::ChurnPredictor
            | WorkerType::RevenueForecaster => StepInput::Analysis {
                worker: worker.clone(),
                question: goal.description.clone(),
                lookback_days: 180,
            },
            WorkerType::Custom(_) => StepInput::Custom {
                worker: worker.clone(),
                payload: serde_json::json!({
                    "goal_id": goal.id,
                    "description": goal.description,
                }),
            },
        }
    }

    /// Worker tag this input is addressed to
    pub fn worker_type(&self) -> WorkerType {
        match self {
            StepInput::Research { .. } => WorkerType::Research,
            StepInput::Revival { .. } => WorkerType::Revival,
            StepInput::Personalization { .. } => WorkerType::Personalization,
            StepInput::Copy { .. } => WorkerType::Copy,
            StepInput::SendTimeBandit { .. } => WorkerType::SendTimeBandit,
            StepInput::Compliance { .. } => WorkerType::Compliance,
            StepInput::CrmSync { .. } => WorkerType::CrmSync,
            StepInput::Analysis { worker, .. } | StepInput::Custom { worker, .. } => worker.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::GoalType;

    #[test]
    fn test_input_is_keyed_by_worker() {
        let goal = Goal::builder(GoalType::BuildIcp).build().unwrap();
        for worker in [
            WorkerType::Research,
            WorkerType::Copy,
            WorkerType::IcpBuilder,
            WorkerType::Custom("LEAD_SCORER".into()),
        ] {
            let input = StepInput::for_worker(&worker, &goal);
            assert_eq!(input.worker_type(), worker);
        }
    }

    #[test]
    fn test_wire_shape_is_tagged() {
        let input = StepInput::Compliance {
            policies: vec!["gdpr".into()],
        };
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["kind"], "compliance");
        assert_eq!(value["policies"][0], "gdpr");
    }
}
