//! Outcome evaluation - metrics, quality score, recommendations and anomalies
//!
//! Everything here is pure: the runtime critic gathers outcomes and publishes
//! results, this module only computes.

use crate::config::CriticSettings;
use crate::error::{ConductorError, Result};
use crate::goal::GoalType;
use crate::outcome::{Outcome, OutcomeType};
use crate::types::{Priority, Timestamp};
use crate::worker::WorkerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Aggregate metrics over a plan's outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub total_outcomes: usize,
    pub success_rate: f64,
    pub average_confidence: f64,
    pub average_value: f64,
    /// Meetings booked per reply received
    pub conversion_rate: f64,
    /// Sum of revenue-won values
    pub revenue_impact: f64,
    pub replies: usize,
    pub meetings: usize,
    pub unsubscribes: usize,
    pub spam_reports: usize,
}

/// Per-worker slice of the metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerPerformance {
    pub outcomes: usize,
    pub success_rate: f64,
    pub average_confidence: f64,
    pub average_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationKind {
    ImproveSuccessRate,
    ImproveConfidence,
    OptimizeContent,
    EnableRevenueGeneration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub description: String,
    pub actions: Vec<String>,
}

impl Recommendation {
    fn new(kind: RecommendationKind, priority: Priority, description: &str, actions: &[&str]) -> Self {
        Self {
            kind,
            priority,
            description: description.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Whether acting on this means changing outreach content
    pub fn mentions_content(&self) -> bool {
        self.kind == RecommendationKind::OptimizeContent
            || self.description.to_lowercase().contains("content")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    SuccessRateDrop,
    SpamRateSpike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Priority,
    pub description: String,
    pub observed: f64,
    pub expected: f64,
}

/// Full critic verdict on one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvaluation {
    pub plan_id: Uuid,
    pub goal_type: Option<GoalType>,
    pub metrics: PlanMetrics,
    pub worker_performance: BTreeMap<WorkerType, WorkerPerformance>,
    pub quality: QualityAssessment,
    pub recommendations: Vec<Recommendation>,
    pub anomalies: Vec<Anomaly>,
    pub evaluated_at: Timestamp,
}

impl PlanEvaluation {
    pub fn needs_content_update(&self) -> bool {
        self.recommendations.iter().any(Recommendation::mentions_content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterventionKind {
    AutonomyReduction,
    SequencePause,
}

/// Corrective action requested without waiting for plan evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub kind: InterventionKind,
    pub plan_id: Uuid,
    pub worker_type: WorkerType,
    pub reason: String,
}

/// Real-time verdict on a single outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAssessment {
    pub outcome_id: Uuid,
    pub score: f64,
    pub intervention: Option<Intervention>,
}

/// Scoring rules, parameterized by [`CriticSettings`]
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    settings: CriticSettings,
}

impl Evaluator {
    pub fn new(settings: CriticSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CriticSettings {
        &self.settings
    }

    /// Evaluate every outcome recorded for `plan_id`
    ///
    /// # Errors
    ///
    /// Returns `Evaluation` when there is nothing to evaluate.
    pub fn evaluate(
        &self,
        plan_id: Uuid,
        goal_type: Option<GoalType>,
        outcomes: &[Outcome],
    ) -> Result<PlanEvaluation> {
        if outcomes.is_empty() {
            return Err(ConductorError::Evaluation {
                plan_id,
                reason: "no outcomes recorded".to_string(),
            });
        }

        let metrics = compute_metrics(outcomes);
        Ok(PlanEvaluation {
            plan_id,
            goal_type,
            worker_performance: worker_performance(outcomes),
            quality: assess_quality(&metrics),
            recommendations: recommend(&metrics),
            anomalies: self.detect_anomalies(outcomes, &metrics),
            metrics,
            evaluated_at: crate::types::now(),
        })
    }

    /// Compare the recent window with the whole history and check spam share
    pub fn detect_anomalies(&self, outcomes: &[Outcome], metrics: &PlanMetrics) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        if outcomes.is_empty() {
            return anomalies;
        }

        let mut ordered: Vec<&Outcome> = outcomes.iter().collect();
        ordered.sort_by_key(|o| o.timestamp);
        let window = self.settings.recent_window.min(ordered.len());
        let recent = &ordered[ordered.len() - window..];
        let recent_rate = success_rate(recent.iter().copied());

        if recent_rate < metrics.success_rate * 0.5 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::SuccessRateDrop,
                severity: Priority::High,
                description: format!(
                    "Success rate over the last {} outcomes fell to {:.2} (overall {:.2})",
                    window, recent_rate, metrics.success_rate
                ),
                observed: recent_rate,
                expected: metrics.success_rate,
            });
        }

        let spam_rate = metrics.spam_reports as f64 / metrics.total_outcomes.max(1) as f64;
        if spam_rate > self.settings.spam_rate_threshold {
            anomalies.push(Anomaly {
                kind: AnomalyKind::SpamRateSpike,
                severity: Priority::Critical,
                description: format!(
                    "Spam reports at {:.1}% of outcomes (baseline {:.1}%)",
                    spam_rate * 100.0,
                    self.settings.spam_baseline * 100.0
                ),
                observed: spam_rate,
                expected: self.settings.spam_baseline,
            });
        }

        anomalies
    }

    /// Immediate score for one outcome, scaled by its confidence
    pub fn score_outcome(&self, outcome: &Outcome) -> f64 {
        let base = match outcome.outcome_type {
            OutcomeType::MeetingBooked => {
                if outcome.value > 0.0 {
                    0.9
                } else {
                    0.2
                }
            }
            OutcomeType::ReplyReceived => outcome
                .metadata
                .get("reply_quality")
                .and_then(|v| v.as_f64())
                .unwrap_or(self.settings.default_reply_quality)
                .clamp(0.0, 1.0),
            OutcomeType::SpamReported => 0.0,
            OutcomeType::Unsubscribed => 0.1,
            OutcomeType::RevenueWon => 1.0,
        };
        (base * outcome.confidence.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }

    /// Score an outcome and decide whether it needs an immediate intervention
    pub fn assess_outcome(&self, outcome: &Outcome) -> OutcomeAssessment {
        let score = self.score_outcome(outcome);
        let low_quality = score < self.settings.low_quality_threshold;

        let intervention = match outcome.outcome_type {
            OutcomeType::SpamReported if low_quality => Some(Intervention {
                kind: InterventionKind::AutonomyReduction,
                plan_id: outcome.plan_id,
                worker_type: outcome.worker_type.clone(),
                reason: "Spam report received".to_string(),
            }),
            OutcomeType::Unsubscribed if low_quality => Some(Intervention {
                kind: InterventionKind::SequencePause,
                plan_id: outcome.plan_id,
                worker_type: outcome.worker_type.clone(),
                reason: "Recipient unsubscribed".to_string(),
            }),
            _ => None,
        };

        OutcomeAssessment {
            outcome_id: outcome.id,
            score,
            intervention,
        }
    }
}

fn success_rate<'a>(outcomes: impl Iterator<Item = &'a Outcome>) -> f64 {
    let (total, successes) = outcomes.fold((0usize, 0usize), |(t, s), o| {
        (t + 1, s + usize::from(o.is_success()))
    });
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    }
}

/// Aggregate metrics; all zero for an empty slice
pub fn compute_metrics(outcomes: &[Outcome]) -> PlanMetrics {
    let total = outcomes.len();
    if total == 0 {
        return PlanMetrics::default();
    }

    let count = |kind: OutcomeType| outcomes.iter().filter(|o| o.outcome_type == kind).count();
    let replies = count(OutcomeType::ReplyReceived);
    let meetings = count(OutcomeType::MeetingBooked);

    let conversion_rate = if replies == 0 {
        0.0
    } else {
        meetings as f64 / replies as f64
    };

    PlanMetrics {
        total_outcomes: total,
        success_rate: success_rate(outcomes.iter()),
        average_confidence: outcomes.iter().map(|o| o.confidence).sum::<f64>() / total as f64,
        average_value: outcomes.iter().map(|o| o.value).sum::<f64>() / total as f64,
        conversion_rate,
        revenue_impact: outcomes
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::RevenueWon)
            .map(|o| o.value)
            .sum(),
        replies,
        meetings,
        unsubscribes: count(OutcomeType::Unsubscribed),
        spam_reports: count(OutcomeType::SpamReported),
    }
}

/// Metrics grouped by the worker that produced each outcome
pub fn worker_performance(outcomes: &[Outcome]) -> BTreeMap<WorkerType, WorkerPerformance> {
    let mut grouped: BTreeMap<WorkerType, Vec<&Outcome>> = BTreeMap::new();
    for outcome in outcomes {
        grouped
            .entry(outcome.worker_type.clone())
            .or_default()
            .push(outcome);
    }

    grouped
        .into_iter()
        .map(|(worker, items)| {
            let n = items.len() as f64;
            let performance = WorkerPerformance {
                outcomes: items.len(),
                success_rate: success_rate(items.iter().copied()),
                average_confidence: items.iter().map(|o| o.confidence).sum::<f64>() / n,
                average_value: items.iter().map(|o| o.value).sum::<f64>() / n,
            };
            (worker, performance)
        })
        .collect()
}

/// Weighted quality score plus strengths and weaknesses
pub fn assess_quality(metrics: &PlanMetrics) -> QualityAssessment {
    let revenue_flag = if metrics.revenue_impact > 0.0 { 1.0 } else { 0.0 };
    let score = 0.4 * metrics.success_rate
        + 0.2 * metrics.average_confidence
        + 0.2 * metrics.conversion_rate.min(1.0)
        + 0.2 * revenue_flag;

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();

    if metrics.success_rate > 0.8 {
        strengths.push(format!("High success rate ({:.2})", metrics.success_rate));
    } else if metrics.success_rate < 0.5 {
        weaknesses.push(format!("Low success rate ({:.2})", metrics.success_rate));
    }

    if metrics.average_confidence > 0.8 {
        strengths.push(format!("High confidence ({:.2})", metrics.average_confidence));
    } else if metrics.average_confidence < 0.5 {
        weaknesses.push(format!("Low confidence ({:.2})", metrics.average_confidence));
    }

    if metrics.conversion_rate > 0.3 {
        strengths.push(format!("Strong reply-to-meeting conversion ({:.2})", metrics.conversion_rate));
    } else if metrics.conversion_rate < 0.1 {
        weaknesses.push(format!("Weak reply-to-meeting conversion ({:.2})", metrics.conversion_rate));
    }

    if metrics.revenue_impact > 0.0 {
        strengths.push(format!("Generated revenue ({:.2})", metrics.revenue_impact));
    } else {
        weaknesses.push("No revenue attributed".to_string());
    }

    QualityAssessment {
        score: score.clamp(0.0, 1.0),
        strengths,
        weaknesses,
    }
}

/// Rule table mapping threshold violations to recommendations
pub fn recommend(metrics: &PlanMetrics) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if metrics.success_rate < 0.7 {
        recommendations.push(Recommendation::new(
            RecommendationKind::ImproveSuccessRate,
            Priority::High,
            "Success rate is below target",
            &[
                "Tighten targeting to higher-intent accounts",
                "Review failed steps for recurring errors",
            ],
        ));
    }
    if metrics.average_confidence < 0.6 {
        recommendations.push(Recommendation::new(
            RecommendationKind::ImproveConfidence,
            Priority::Medium,
            "Workers report low confidence in their results",
            &["Enrich research inputs", "Route low-confidence steps to approval"],
        ));
    }
    if metrics.conversion_rate < 0.1 {
        recommendations.push(Recommendation::new(
            RecommendationKind::OptimizeContent,
            Priority::Medium,
            "Replies are not converting; optimize message content",
            &["A/B test call-to-action wording", "Shorten follow-up copy"],
        ));
    }
    if metrics.revenue_impact == 0.0 {
        recommendations.push(Recommendation::new(
            RecommendationKind::EnableRevenueGeneration,
            Priority::Critical,
            "No revenue has been attributed to this plan",
            &[
                "Connect closed-won tracking to outcomes",
                "Prioritize late-stage opportunities",
            ],
        ));
    }

    recommendations
}
