//! Core types for Conductor
//!
//! Shared vocabulary used across the planner, executor and critic:
//! - Timestamps
//! - Autonomy and risk levels
//! - Priorities
//! - Plan and step lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// How much a plan or step may act without a human in the loop
///
/// Levels are totally ordered: `L0 < L1 < L2 < L3`. `L0` gates every step
/// behind approval, `L3` is full autonomy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum AutonomyLevel {
    L0,
    L1,
    #[default]
    L2,
    L3,
}

impl AutonomyLevel {
    pub fn requires_approval(self) -> bool {
        self == AutonomyLevel::L0
    }

    pub fn is_full(self) -> bool {
        self == AutonomyLevel::L3
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Risk bucket derived from a score in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a score: `>= 0.7` critical, `>= 0.5` high, `>= 0.3` medium, else low
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::Critical
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn requires_approval(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Priority shared by goals, steps and recommendations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

/// Plan lifecycle: `draft -> validated -> executing -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Draft,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        match (self, next) {
            (Draft, Validated) | (Draft, Failed) => true,
            (Validated, Executing) | (Validated, Failed) => true,
            (Executing, Completed) | (Executing, Failed) => true,
            (Completed, _) | (Failed, _) => false,
            (s1, s2) if s1 == s2 => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Step lifecycle: `pending -> processing -> completed | failed`
///
/// `processing -> pending` is the requeue edge used by retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Pending) => true,
            (Completed, _) | (Failed, _) => false,
            (s1, s2) if s1 == s2 => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
