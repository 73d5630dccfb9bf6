//! Call contexts and the external context/memory contracts
//!
//! The context service and the memory store are optional collaborators:
//! the planner asks the provider for grounding snippets, the executor keeps
//! each worker's latest result in the memory store for the session.

use async_trait::async_trait;
use conductor_core::error::Result;
use conductor_core::goal::GoalType;
use conductor_core::types::AutonomyLevel;
use conductor_core::worker::WorkerType;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Caller-supplied context for `Planner::create_plan`
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub session_id: String,

    /// Autonomy steps inherit; the configured default when unset
    pub ambient_autonomy: Option<AutonomyLevel>,
}

impl PlanningContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ambient_autonomy: None,
        }
    }

    pub fn with_ambient_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.ambient_autonomy = Some(level);
        self
    }
}

/// Caller-supplied context for `Executor::execute_plan`
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub session_id: String,

    /// Cancelling stops new steps from starting
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Caller-supplied context for the critic
#[derive(Debug, Clone, Default)]
pub struct CriticContext {
    pub session_id: String,

    /// Used when the critic never saw the plan's `plan.created` event
    pub goal_type: Option<GoalType>,
}

impl CriticContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            goal_type: None,
        }
    }

    pub fn with_goal_type(mut self, goal_type: GoalType) -> Self {
        self.goal_type = Some(goal_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextQuery {
    pub text: String,
    pub goal_type: Option<GoalType>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,
    pub content: String,
    /// Higher is more relevant
    pub relevance: f64,
}

/// Ranked documents plus the total number of matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub documents: Vec<ContextDocument>,
    pub total_found: usize,
}

impl ContextResponse {
    /// Documents sorted by relevance, best first
    pub fn ranked(mut self) -> Vec<ContextDocument> {
        self.documents
            .sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        self.documents
    }
}

/// Retrieval service consulted while planning
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn query(&self, query: ContextQuery) -> Result<ContextResponse>;
}

/// Key/value memory scoped by worker type and session
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(
        &self,
        worker: &WorkerType,
        session_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>>;

    async fn set(
        &self,
        worker: &WorkerType,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()>;
}

/// Process-local `MemoryStore`
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<(WorkerType, String, String), serde_json::Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(
        &self,
        worker: &WorkerType,
        session_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let scoped = (worker.clone(), session_id.to_string(), key.to_string());
        Ok(self.entries.get(&scoped).map(|v| v.value().clone()))
    }

    async fn set(
        &self,
        worker: &WorkerType,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let scoped = (worker.clone(), session_id.to_string(), key.to_string());
        self.entries.insert(scoped, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_is_scoped() {
        let store = InMemoryStore::new();
        store
            .set(&WorkerType::Copy, "s1", "tone", json!("direct"))
            .await
            .unwrap();

        assert_eq!(
            store.get(&WorkerType::Copy, "s1", "tone").await.unwrap(),
            Some(json!("direct"))
        );
        assert_eq!(store.get(&WorkerType::Copy, "s2", "tone").await.unwrap(), None);
        assert_eq!(store.get(&WorkerType::Research, "s1", "tone").await.unwrap(), None);
    }

    #[test]
    fn test_ranked_documents() {
        let response = ContextResponse {
            documents: vec![
                ContextDocument { id: "a".into(), content: "low".into(), relevance: 0.2 },
                ContextDocument { id: "b".into(), content: "high".into(), relevance: 0.9 },
            ],
            total_found: 2,
        };
        let ranked = response.ranked();
        assert_eq!(ranked[0].id, "b");
    }
}
