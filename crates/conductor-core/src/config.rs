//! Conductor configuration
//!
//! Every section has working defaults, so an empty TOML document is a valid
//! configuration. Load with [`ConductorConfig::from_file`] or
//! [`ConductorConfig::from_toml_str`].

use crate::error::{ConductorError, Result};
use crate::goal::GoalType;
use crate::retry::RetryPolicy;
use crate::strategy::{default_strategies, default_success_edges, Strategy, SuccessEdge};
use crate::types::AutonomyLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub planner: PlannerSettings,
    pub executor: ExecutorSettings,
    pub critic: CriticSettings,
    pub bus: BusSettings,
}

impl ConductorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executor-wide concurrency bound
    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.executor.max_concurrent_steps = max;
        self
    }

    /// Set the retry backoff policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor.retry = policy;
        self
    }

    /// Set the ambient autonomy used for steps
    pub fn with_default_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.planner.default_autonomy = level;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.executor.max_concurrent_steps == 0 {
            return Err(ConductorError::Config(
                "executor.max_concurrent_steps must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.executor.approval_confidence) {
            return Err(ConductorError::Config(
                "executor.approval_confidence must be in [0, 1]".into(),
            ));
        }
        for (name, value) in [
            ("critic.recent_window", self.critic.recent_window),
            ("critic.outcome_limit", self.critic.outcome_limit),
            ("critic.plan_limit", self.critic.plan_limit),
        ] {
            if value == 0 {
                return Err(ConductorError::Config(format!("{} must be at least 1", name)));
            }
        }
        for (name, value) in [
            ("critic.spam_rate_threshold", self.critic.spam_rate_threshold),
            ("critic.low_quality_threshold", self.critic.low_quality_threshold),
            ("critic.default_reply_quality", self.critic.default_reply_quality),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConductorError::Config(format!("{} must be in [0, 1]", name)));
            }
        }
        for goal_type in GoalType::ALL {
            if self.planner.strategy(goal_type).is_none() {
                return Err(ConductorError::Config(format!(
                    "no strategy configured for goal type {}",
                    goal_type
                )));
            }
        }
        Ok(())
    }
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Ambient autonomy inherited by steps
    pub default_autonomy: AutonomyLevel,

    /// Budgets above this add the budget risk factor
    pub budget_threshold: f64,

    pub outbound_risk: f64,
    pub full_autonomy_risk: f64,
    pub budget_risk: f64,

    /// Added when the critic reported anomalies for the goal type
    pub anomaly_risk: f64,

    pub strategies: Vec<Strategy>,
    pub success_edges: Vec<SuccessEdge>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            default_autonomy: AutonomyLevel::L2,
            budget_threshold: 10_000.0,
            outbound_risk: 0.3,
            full_autonomy_risk: 0.2,
            budget_risk: 0.3,
            anomaly_risk: 0.2,
            strategies: default_strategies(),
            success_edges: default_success_edges(),
        }
    }
}

impl PlannerSettings {
    pub fn strategy(&self, goal_type: GoalType) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.goal_type == goal_type)
    }
}

/// Executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Steps in flight across all plans sharing one executor
    pub max_concurrent_steps: usize,

    pub retry: RetryPolicy,

    /// Confidence recorded for steps that went through human approval
    pub approval_confidence: f64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 4,
            retry: RetryPolicy::default(),
            approval_confidence: 0.8,
        }
    }
}

/// Critic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticSettings {
    /// Outcomes considered "recent" for drop detection
    pub recent_window: usize,

    /// Spam share above which a spike is flagged
    pub spam_rate_threshold: f64,

    /// Expected spam share, reported alongside a spike
    pub spam_baseline: f64,

    /// Real-time scores below this may trigger interventions
    pub low_quality_threshold: f64,

    /// Reply score used when an outcome carries no `reply_quality`
    pub default_reply_quality: f64,

    /// Outcomes kept in the ledger (oldest dropped first)
    pub outcome_limit: usize,

    /// Plans whose goal type is remembered (oldest forgotten first)
    pub plan_limit: usize,
}

impl Default for CriticSettings {
    fn default() -> Self {
        Self {
            recent_window: 20,
            spam_rate_threshold: 0.05,
            spam_baseline: 0.02,
            low_quality_threshold: 0.3,
            default_reply_quality: 0.5,
            outcome_limit: 10_000,
            plan_limit: 1_000,
        }
    }
}

/// Coordination bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Messages kept in history (oldest dropped first)
    pub history_limit: usize,

    /// Default deadline for request/reply
    pub request_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            history_limit: 1_000,
            request_timeout_ms: 5_000,
        }
    }
}
