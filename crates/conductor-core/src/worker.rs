//! Worker types and their static execution profiles

use crate::types::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag identifying which kind of worker executes a step
///
/// The set is open: any upper-case tag that is not one of the known
/// workers becomes [`WorkerType::Custom`]. Serialized as its plain tag
/// (`"RESEARCH"`, `"SEND_TIME_BANDIT"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerType {
    Research,
    Revival,
    Personalization,
    Copy,
    SendTimeBandit,
    Compliance,
    CrmSync,
    Analytics,
    IcpBuilder,
    LeakageDetector,
    ChurnPredictor,
    RevenueForecaster,
    Custom(String),
}

impl WorkerType {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerType::Research => "RESEARCH",
            WorkerType::Revival => "REVIVAL",
            WorkerType::Personalization => "PERSONALIZATION",
            WorkerType::Copy => "COPY",
            WorkerType::SendTimeBandit => "SEND_TIME_BANDIT",
            WorkerType::Compliance => "COMPLIANCE",
            WorkerType::CrmSync => "CRM_SYNC",
            WorkerType::Analytics => "ANALYTICS",
            WorkerType::IcpBuilder => "ICP_BUILDER",
            WorkerType::LeakageDetector => "LEAKAGE_DETECTOR",
            WorkerType::ChurnPredictor => "CHURN_PREDICTOR",
            WorkerType::RevenueForecaster => "REVENUE_FORECASTER",
            WorkerType::Custom(tag) => tag,
        }
    }

    /// Workers whose actions reach prospects directly or mutate external systems
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            WorkerType::Revival | WorkerType::Copy | WorkerType::SendTimeBandit | WorkerType::CrmSync
        )
    }

    /// Static execution profile used when decomposing a goal into steps
    pub fn profile(&self) -> WorkerProfile {
        let (description, capabilities, priority, max_retries, timeout_ms): (
            &str,
            Vec<&str>,
            Priority,
            u32,
            u64,
        ) = match self {
            WorkerType::Research => (
                "Research target accounts and enrich contact data",
                vec!["company-research", "contact-enrichment"],
                Priority::High,
                3,
                30_000,
            ),
            WorkerType::Revival => (
                "Identify stalled opportunities worth reviving",
                vec!["opportunity-scoring", "pipeline-analysis"],
                Priority::High,
                2,
                20_000,
            ),
            WorkerType::Personalization => (
                "Build per-prospect personalization hooks",
                vec!["personalization"],
                Priority::Medium,
                2,
                20_000,
            ),
            WorkerType::Copy => (
                "Draft outreach copy for the sequence",
                vec!["copywriting"],
                Priority::Medium,
                2,
                45_000,
            ),
            WorkerType::SendTimeBandit => (
                "Choose send times that maximize engagement",
                vec!["send-time-optimization"],
                Priority::Low,
                1,
                10_000,
            ),
            WorkerType::Compliance => (
                "Check outbound content against compliance policy",
                vec!["compliance-check"],
                Priority::High,
                1,
                10_000,
            ),
            WorkerType::CrmSync => (
                "Synchronize results back to the CRM",
                vec!["crm-write"],
                Priority::Medium,
                3,
                15_000,
            ),
            WorkerType::Analytics => (
                "Analyze historical pipeline and engagement data",
                vec!["data-analysis"],
                Priority::Medium,
                2,
                60_000,
            ),
            WorkerType::IcpBuilder => (
                "Derive the ideal customer profile from won deals",
                vec!["data-analysis", "segmentation"],
                Priority::Medium,
                2,
                60_000,
            ),
            WorkerType::LeakageDetector => (
                "Locate stages where pipeline value leaks",
                vec!["data-analysis", "funnel-diagnostics"],
                Priority::Medium,
                2,
                60_000,
            ),
            WorkerType::ChurnPredictor => (
                "Score accounts by churn likelihood",
                vec!["data-analysis", "forecasting"],
                Priority::Medium,
                2,
                60_000,
            ),
            WorkerType::RevenueForecaster => (
                "Forecast revenue from the current pipeline",
                vec!["data-analysis", "forecasting"],
                Priority::Medium,
                2,
                60_000,
            ),
            WorkerType::Custom(_) => ("Execute custom task", vec![], Priority::Medium, 2, 30_000),
        };

        WorkerProfile {
            description: description.to_string(),
            capabilities: capabilities.into_iter().map(String::from).collect(),
            priority,
            max_retries,
            timeout_ms,
        }
    }
}

impl From<String> for WorkerType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "RESEARCH" => WorkerType::Research,
            "REVIVAL" => WorkerType::Revival,
            "PERSONALIZATION" => WorkerType::Personalization,
            "COPY" => WorkerType::Copy,
            "SEND_TIME_BANDIT" => WorkerType::SendTimeBandit,
            "COMPLIANCE" => WorkerType::Compliance,
            "CRM_SYNC" => WorkerType::CrmSync,
            "ANALYTICS" => WorkerType::Analytics,
            "ICP_BUILDER" => WorkerType::IcpBuilder,
            "LEAKAGE_DETECTOR" => WorkerType::LeakageDetector,
            "CHURN_PREDICTOR" => WorkerType::ChurnPredictor,
            "REVENUE_FORECASTER" => WorkerType::RevenueForecaster,
            _ => WorkerType::Custom(tag),
        }
    }
}

impl From<&str> for WorkerType {
    fn from(tag: &str) -> Self {
        WorkerType::from(tag.to_string())
    }
}

impl From<WorkerType> for String {
    fn from(worker: WorkerType) -> Self {
        worker.as_str().to_string()
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults applied to a step produced for a given worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub description: String,
    pub capabilities: Vec<String>,
    pub priority: Priority,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_serialize_as_strings() {
        let json = serde_json::to_string(&WorkerType::SendTimeBandit).unwrap();
        assert_eq!(json, "\"SEND_TIME_BANDIT\"");

        let parsed: WorkerType = serde_json::from_str("\"CRM_SYNC\"").unwrap();
        assert_eq!(parsed, WorkerType::CrmSync);

        let custom: WorkerType = serde_json::from_str("\"LEAD_SCORER\"").unwrap();
        assert_eq!(custom, WorkerType::Custom("LEAD_SCORER".into()));
        assert_eq!(custom.to_string(), "LEAD_SCORER");
    }

    #[test]
    fn test_profiles() {
        let research = WorkerType::Research.profile();
        assert_eq!(research.max_retries, 3);
        assert_eq!(research.timeout_ms, 30_000);
        assert_eq!(research.priority, Priority::High);

        let custom = WorkerType::from("ANYTHING").profile();
        assert_eq!(custom.max_retries, 2);
        assert_eq!(custom.timeout_ms, 30_000);
    }

    #[test]
    fn test_high_risk_workers() {
        assert!(WorkerType::Copy.is_high_risk());
        assert!(WorkerType::CrmSync.is_high_risk());
        assert!(!WorkerType::Research.is_high_risk());
        assert!(!WorkerType::Compliance.is_high_risk());
    }
}
