//! Goal decomposition strategies
//!
//! The strategy table is configuration, not computation: each goal type maps
//! to an ordered list of workers and an approach tag.

use crate::goal::GoalType;
use crate::worker::WorkerType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    Sequential,
    ParallelCapable,
    Iterative,
    Analytical,
    Diagnostic,
    Predictive,
}

/// Workers and approach used for one goal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub goal_type: GoalType,
    pub workers: Vec<WorkerType>,
    pub approach: Approach,
}

impl Strategy {
    pub fn new(goal_type: GoalType, workers: Vec<WorkerType>, approach: Approach) -> Self {
        Self {
            goal_type,
            workers,
            approach,
        }
    }
}

/// Built-in strategy for every goal type
pub fn default_strategies() -> Vec<Strategy> {
    use WorkerType::*;
    vec![
        Strategy::new(
            GoalType::RevivePipeline,
            vec![Research, Revival, Copy, SendTimeBandit],
            Approach::Sequential,
        ),
        Strategy::new(
            GoalType::IncreaseMeetings,
            vec![Research, Personalization, Copy, SendTimeBandit],
            Approach::ParallelCapable,
        ),
        Strategy::new(
            GoalType::OptimizeSequence,
            vec![Analytics, Copy, SendTimeBandit],
            Approach::Iterative,
        ),
        Strategy::new(
            GoalType::BuildIcp,
            vec![Research, Analytics, IcpBuilder],
            Approach::Analytical,
        ),
        Strategy::new(
            GoalType::DetectLeakage,
            vec![Analytics, LeakageDetector],
            Approach::Diagnostic,
        ),
        Strategy::new(
            GoalType::PredictChurn,
            vec![Analytics, ChurnPredictor],
            Approach::Predictive,
        ),
        Strategy::new(
            GoalType::ForecastRevenue,
            vec![Analytics, RevenueForecaster],
            Approach::Predictive,
        ),
    ]
}

/// Pair of workers whose edge is only satisfied when `from` succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessEdge {
    pub from: WorkerType,
    pub to: WorkerType,
}

/// Built-in on-success pairs
pub fn default_success_edges() -> Vec<SuccessEdge> {
    use WorkerType::*;
    [
        (Research, Revival),
        (Research, Personalization),
        (Personalization, Copy),
        (Copy, Compliance),
        (Analytics, IcpBuilder),
    ]
    .into_iter()
    .map(|(from, to)| SuccessEdge { from, to })
    .collect()
}
