//! Goal data structure
//!
//! A goal is the unit of intent submitted to the planner. Goals are immutable
//! once built: the planner reads them, nothing writes them back.

use crate::error::{ConductorError, Result};
use crate::types::{AutonomyLevel, Priority, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of business goals the planner knows how to decompose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    RevivePipeline,
    IncreaseMeetings,
    OptimizeSequence,
    BuildIcp,
    DetectLeakage,
    PredictChurn,
    ForecastRevenue,
}

impl GoalType {
    pub const ALL: [GoalType; 7] = [
        GoalType::RevivePipeline,
        GoalType::IncreaseMeetings,
        GoalType::OptimizeSequence,
        GoalType::BuildIcp,
        GoalType::DetectLeakage,
        GoalType::PredictChurn,
        GoalType::ForecastRevenue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoalType::RevivePipeline => "revive-pipeline",
            GoalType::IncreaseMeetings => "increase-meetings",
            GoalType::OptimizeSequence => "optimize-sequence",
            GoalType::BuildIcp => "build-icp",
            GoalType::DetectLeakage => "detect-leakage",
            GoalType::PredictChurn => "predict-churn",
            GoalType::ForecastRevenue => "forecast-revenue",
        }
    }

    /// Goals whose plans send communication to prospects
    pub fn is_outbound(self) -> bool {
        matches!(
            self,
            GoalType::RevivePipeline | GoalType::IncreaseMeetings | GoalType::OptimizeSequence
        )
    }
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalType {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self> {
        GoalType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConductorError::Config(format!("unknown goal type '{}'", s)))
    }
}

/// Limits the submitter places on how a goal may be pursued
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalConstraints {
    /// Requested ceiling on autonomy; the planner may lower it
    pub autonomy_level: Option<AutonomyLevel>,

    /// Spend budget in account currency
    pub budget: Option<f64>,
}

/// A business objective submitted for planning
///
/// # Examples
///
/// ```
/// use conductor_core::goal::{Goal, GoalType};
///
/// let goal = Goal::builder(GoalType::RevivePipeline)
///     .description("Re-engage stalled Q3 opportunities")
///     .target_metric("meetings_booked", 12.0)
///     .budget(5_000.0)
///     .build()
///     .unwrap();
///
/// assert_eq!(goal.goal_type, GoalType::RevivePipeline);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub goal_type: GoalType,
    pub description: String,
    pub target_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub constraints: GoalConstraints,
    #[serde(default)]
    pub priority: Priority,
    pub submitted_at: Timestamp,
}

impl Goal {
    /// Create a new goal builder
    pub fn builder(goal_type: GoalType) -> GoalBuilder {
        GoalBuilder {
            goal_type,
            description: None,
            target_metrics: BTreeMap::new(),
            constraints: GoalConstraints::default(),
            priority: Priority::default(),
        }
    }

    pub fn budget(&self) -> Option<f64> {
        self.constraints.budget
    }
}

/// Builder for [`Goal`]
#[derive(Debug, Clone)]
pub struct GoalBuilder {
    goal_type: GoalType,
    description: Option<String>,
    target_metrics: BTreeMap<String, f64>,
    constraints: GoalConstraints,
    priority: Priority,
}

impl GoalBuilder {
    /// Set the goal description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add a target metric
    pub fn target_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.target_metrics.insert(name.into(), value);
        self
    }

    pub fn autonomy_level(mut self, level: AutonomyLevel) -> Self {
        self.constraints.autonomy_level = Some(level);
        self
    }

    pub fn budget(mut self, budget: f64) -> Self {
        self.constraints.budget = Some(budget);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Build the goal
    ///
    /// # Errors
    ///
    /// Fails when a budget is negative or not finite.
    pub fn build(self) -> Result<Goal> {
        if let Some(budget) = self.constraints.budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConductorError::Config(format!(
                    "goal budget must be a non-negative number, got {}",
                    budget
                )));
            }
        }

        let description = self
            .description
            .unwrap_or_else(|| format!("Goal: {}", self.goal_type));

        Ok(Goal {
            id: Uuid::new_v4(),
            goal_type: self.goal_type,
            description,
            target_metrics: self.target_metrics,
            constraints: self.constraints,
            priority: self.priority,
            submitted_at: crate::types::now(),
        })
    }
}
