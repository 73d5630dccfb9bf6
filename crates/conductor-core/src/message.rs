//! Message envelope and topic conventions for the coordination bus

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pattern that matches every topic
pub const WILDCARD: &str = "*";

/// Topic names shared by every component
///
/// Related events share a prefix so a `prefix.*` subscription sees the
/// whole family.
pub mod topics {
    pub const PLAN_CREATED: &str = "plan.created";
    pub const PLAN_STARTED: &str = "plan.started";
    pub const PLAN_COMPLETED: &str = "plan.completed";
    pub const PLAN_FAILED: &str = "plan.failed";
    pub const PLAN_CANCELLED: &str = "plan.cancelled";

    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_RETRY_SCHEDULED: &str = "step.retry_scheduled";
    pub const STEP_APPROVAL_REQUESTED: &str = "step.approval_requested";

    pub const OUTCOME_RECORDED: &str = "outcome.recorded";

    pub const CRITIC_OUTCOME_SCORED: &str = "critic.outcome_scored";
    pub const CRITIC_EVALUATION_COMPLETED: &str = "critic.evaluation_completed";
    pub const CRITIC_ANOMALY_DETECTED: &str = "critic.anomaly_detected";

    pub const INTERVENTION_AUTONOMY_REDUCTION: &str = "intervention.autonomy_reduction";
    pub const INTERVENTION_SEQUENCE_PAUSE: &str = "intervention.sequence_pause";

    pub const LEARNING_BANDIT_UPDATE: &str = "learning.bandit_update";
    pub const LEARNING_AUTONOMY_RECALIBRATION: &str = "learning.autonomy_recalibration";

    /// Prefix of per-request reply topics
    pub const RESPONSE_PREFIX: &str = "response.";

    /// Reply topic scoped to one correlation id
    pub fn response(correlation_id: &str) -> String {
        format!("{}{}", RESPONSE_PREFIX, correlation_id)
    }
}

/// Envelope carried by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub from: String,
    pub to: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub timestamp: Timestamp,
    /// Time-to-live in milliseconds, counted from `timestamp`
    pub ttl_ms: Option<u64>,
}

impl Message {
    pub fn new(topic: impl Into<String>, from: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            from: from.into(),
            to: None,
            payload,
            correlation_id: None,
            timestamp: crate::types::now(),
            ttl_ms: None,
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to = Some(recipient.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Whether the ttl has elapsed at `now`
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let age = now.signed_duration_since(self.timestamp).num_milliseconds();
                // ttls past i64::MAX never elapse
                i64::try_from(ttl).map_or(false, |ttl| age > ttl)
            }
            None => false,
        }
    }
}

/// Topic pattern matching
///
/// `*` matches everything, `prefix.*` matches any topic that starts with
/// `prefix.`, anything else must match exactly.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    match pattern.strip_suffix(WILDCARD) {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}
