//! Observed business outcomes of executed plans

use crate::types::Timestamp;
use crate::worker::WorkerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeType {
    ReplyReceived,
    MeetingBooked,
    Unsubscribed,
    SpamReported,
    RevenueWon,
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeType::ReplyReceived => "reply-received",
            OutcomeType::MeetingBooked => "meeting-booked",
            OutcomeType::Unsubscribed => "unsubscribed",
            OutcomeType::SpamReported => "spam-reported",
            OutcomeType::RevenueWon => "revenue-won",
        };
        f.write_str(s)
    }
}

/// One observed result attributed to a plan and the worker that produced it
///
/// Outcomes are append-only: once recorded they are never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: Uuid,
    pub outcome_type: OutcomeType,
    pub plan_id: Uuid,
    pub worker_type: WorkerType,
    /// Positive values count as success (meetings held, revenue amount)
    pub value: f64,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub timestamp: Timestamp,
}

impl Outcome {
    pub fn new(outcome_type: OutcomeType, plan_id: Uuid, worker_type: WorkerType, value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            outcome_type,
            plan_id,
            worker_type,
            value,
            confidence: 1.0,
            metadata: BTreeMap::new(),
            timestamp: crate::types::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_success(&self) -> bool {
        self.value > 0.0
    }
}
