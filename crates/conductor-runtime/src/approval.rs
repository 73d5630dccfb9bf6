//! Human approval for gated steps
//!
//! Steps running at autonomy `L0` produce a draft instead of acting. The
//! draft goes to an [`ApprovalGate`]; with no gate configured the executor
//! approves drafts itself.
//!
//! [`ChannelApprovalGate`] hands requests to a reviewer over a channel and
//! waits for the answer until the request's due time.

use async_trait::async_trait;
use conductor_core::error::{ConductorError, Result};
use conductor_core::types::Timestamp;
use conductor_core::worker::WorkerType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Draft waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub step_id: String,
    pub worker_type: WorkerType,
    pub draft: serde_json::Value,
    pub requested_at: Timestamp,
    pub due_by: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reviewer: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            approved: true,
            reviewer: Some(reviewer.into()),
            comment: None,
        }
    }

    pub fn reject(reviewer: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            reviewer: Some(reviewer.into()),
            comment: Some(comment.into()),
        }
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, request: ApprovalRequest) -> Result<ApprovalDecision>;
}

/// Approves every draft
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(&self, _request: ApprovalRequest) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::approve("auto"))
    }
}

/// Request delivered to the reviewer side of a [`ChannelApprovalGate`]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    /// Answer the request; returns false if the executor stopped waiting
    pub fn respond(self, decision: ApprovalDecision) -> bool {
        self.responder.send(decision).is_ok()
    }
}

/// Gate that forwards requests to a reviewer over a channel
pub struct ChannelApprovalGate {
    request_tx: mpsc::UnboundedSender<PendingApproval>,
}

impl ChannelApprovalGate {
    /// Create the gate and the receiver the reviewer reads from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingApproval>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        (Self { request_tx }, request_rx)
    }
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
    async fn review(&self, request: ApprovalRequest) -> Result<ApprovalDecision> {
        let wait = (request.due_by - conductor_core::types::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let (responder, response_rx) = oneshot::channel();

        self.request_tx
            .send(PendingApproval { request, responder })
            .map_err(|_| ConductorError::Config("approval reviewer is gone".to_string()))?;

        match tokio::time::timeout(wait, response_rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Ok(ApprovalDecision::reject("system", "reviewer dropped the request")),
            Err(_) => {
                tracing::warn!("approval request expired before a decision");
                Ok(ApprovalDecision::reject("system", "approval timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(due_in_ms: i64) -> ApprovalRequest {
        let now = conductor_core::types::now();
        ApprovalRequest {
            id: Uuid::new_v4(),
            plan_id: Uuid::nil(),
            step_id: "copy".into(),
            worker_type: WorkerType::Copy,
            draft: json!({ "subject": "Quick question" }),
            requested_at: now,
            due_by: now + chrono::Duration::milliseconds(due_in_ms),
        }
    }

    #[tokio::test]
    async fn test_reviewer_decision_is_returned() {
        let (gate, mut rx) = ChannelApprovalGate::new();

        tokio::spawn(async move {
            if let Some(pending) = rx.recv().await {
                assert_eq!(pending.request.step_id, "copy");
                pending.respond(ApprovalDecision::reject("alice", "too pushy"));
            }
        });

        let decision = gate.review(request(1_000)).await.unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.comment.as_deref(), Some("too pushy"));
    }

    #[tokio::test]
    async fn test_expired_request_is_rejected() {
        let (gate, _rx) = ChannelApprovalGate::new();
        let decision = gate.review(request(20)).await.unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.comment.as_deref(), Some("approval timed out"));
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let decision = AutoApprove.review(request(10)).await.unwrap();
        assert!(decision.approved);
    }
}
