//! Worker contract and registry

use async_trait::async_trait;
use conductor_core::error::WorkerError;
use conductor_core::goal::GoalType;
use conductor_core::payload::StepInput;
use conductor_core::types::AutonomyLevel;
use conductor_core::worker::WorkerType;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// What a worker knows about the step it is executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub plan_id: Uuid,
    pub step_id: String,
    pub goal_type: GoalType,
    pub session_id: String,
    pub autonomy_level: AutonomyLevel,
    /// 1-based
    pub attempt: u32,
}

/// Result of `Worker::execute`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub result: serde_json::Value,
    pub metrics: BTreeMap<String, f64>,
    /// Defaults to 1.0 when the worker does not say
    pub confidence: Option<f64>,
}

impl WorkerOutput {
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Result of `Worker::generate_draft`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub draft: serde_json::Value,
    pub needs_approval: bool,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn worker_type(&self) -> WorkerType;

    fn capabilities(&self) -> Vec<String> {
        self.worker_type().profile().capabilities
    }

    async fn execute(
        &self,
        input: &StepInput,
        context: &WorkerContext,
    ) -> Result<WorkerOutput, WorkerError>;

    /// Prepare the action for human review instead of performing it
    async fn generate_draft(
        &self,
        input: &StepInput,
        _context: &WorkerContext,
    ) -> Result<Draft, WorkerError> {
        let draft = serde_json::to_value(input)
            .map_err(|e| WorkerError::InvalidInput(e.to_string()))?;
        Ok(Draft {
            draft,
            needs_approval: true,
        })
    }
}

/// Workers addressable by type
#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerType, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker`, replacing any worker of the same type
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let worker_type = worker.worker_type();
        tracing::debug!(worker = %worker_type, "registering worker");
        self.workers.insert(worker_type, worker);
    }

    pub fn get(&self, worker_type: &WorkerType) -> Option<Arc<dyn Worker>> {
        self.workers.get(worker_type).map(|w| Arc::clone(w.value()))
    }

    pub fn contains(&self, worker_type: &WorkerType) -> bool {
        self.workers.contains_key(worker_type)
    }

    /// Whether the registered worker offers every required capability
    pub fn supports(&self, worker_type: &WorkerType, required: &[String]) -> bool {
        match self.get(worker_type) {
            Some(worker) => {
                let offered = worker.capabilities();
                required.iter().all(|c| offered.contains(c))
            }
            None => false,
        }
    }

    pub fn worker_types(&self) -> Vec<WorkerType> {
        let mut types: Vec<WorkerType> = self.workers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        fn worker_type(&self) -> WorkerType {
            WorkerType::Research
        }

        async fn execute(
            &self,
            input: &StepInput,
            _context: &WorkerContext,
        ) -> Result<WorkerOutput, WorkerError> {
            Ok(WorkerOutput::new(serde_json::to_value(input).unwrap_or_default()))
        }
    }

    #[test]
    fn test_registry_capabilities() {
        let registry = WorkerRegistry::new();
        registry.register(Arc::new(Echo));

        assert!(registry.contains(&WorkerType::Research));
        assert!(registry.supports(&WorkerType::Research, &["company-research".to_string()]));
        assert!(!registry.supports(&WorkerType::Research, &["copywriting".to_string()]));
        assert!(!registry.supports(&WorkerType::Copy, &[]));
        assert_eq!(registry.worker_types(), vec![WorkerType::Research]);
    }
}
