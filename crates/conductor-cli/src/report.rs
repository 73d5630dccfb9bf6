//! Text and JSON rendering for CLI output

use colored::{ColoredString, Colorize};
use conductor_core::config::PlannerSettings;
use conductor_core::evaluation::PlanEvaluation;
use conductor_core::plan::Plan;
use conductor_core::types::{PlanStatus, Priority, RiskLevel, StepStatus};
use serde_json::json;

pub fn print_strategies(settings: &PlannerSettings, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "strategies": settings.strategies,
                "success_edges": settings.success_edges,
            }))?
        );
        return Ok(());
    }

    println!("{}", "STRATEGIES".bold());
    for strategy in &settings.strategies {
        let workers: Vec<&str> = strategy.workers.iter().map(|w| w.as_str()).collect();
        println!(
            "  {:<18} {:<17} {}",
            strategy.goal_type.to_string().cyan(),
            format!("{:?}", strategy.approach).dimmed(),
            workers.join(" -> ")
        );
    }

    println!();
    println!("{}", "ON-SUCCESS EDGES".bold());
    for edge in &settings.success_edges {
        println!("  {} => {}", edge.from, edge.to);
    }
    Ok(())
}

pub fn print_plan(plan: &Plan, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }
    render_plan(plan);
    Ok(())
}

pub fn print_run(
    plan: &Plan,
    evaluation: Option<&PlanEvaluation>,
    as_json: bool,
) -> anyhow::Result<()> {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "plan": plan, "evaluation": evaluation }))?
        );
        return Ok(());
    }

    render_plan(plan);
    if let Some(failure) = &plan.failure {
        println!();
        println!("{} {}", "FAILURE:".red().bold(), failure.message);
    }

    match evaluation {
        Some(evaluation) => render_evaluation(evaluation),
        None => {
            println!();
            println!("{}", "No evaluation available".dimmed());
        }
    }
    Ok(())
}

fn render_plan(plan: &Plan) {
    println!("{} {}", "PLAN".bold(), plan.id);
    println!("  goal:      {}", plan.goal_type);
    println!("  status:    {}", status(plan.status));
    println!(
        "  risk:      {} ({:.2})",
        risk(plan.risk.level),
        plan.risk.score
    );
    println!("  autonomy:  {}", plan.autonomy_level);
    if plan.risk.requires_approval {
        println!("  {}", "approval required".yellow());
    }
    for (factor, mitigation) in plan.risk.factors.iter().zip(&plan.risk.mitigations) {
        println!("    - {} {}", factor, format!("({})", mitigation).dimmed());
    }

    println!();
    println!("{}", "STEPS".bold());
    for (i, step) in plan.steps.iter().enumerate() {
        let outcome = match &step.result {
            Some(result) if result.success => format!(
                "ok in {}ms, confidence {:.2}",
                result.duration_ms, result.confidence
            ),
            Some(result) => result.error_message().unwrap_or("failed").to_string(),
            None => String::new(),
        };
        println!(
            "  {}. {:<18} {:<3} {:<11} attempts {}  {}",
            i + 1,
            step.worker_type.as_str(),
            step.autonomy_level.to_string(),
            step_status(step.status),
            step.attempts.len(),
            outcome.dimmed()
        );
    }
}

fn render_evaluation(evaluation: &PlanEvaluation) {
    let metrics = &evaluation.metrics;
    println!();
    println!("{}", "EVALUATION".bold());
    println!("  outcomes:        {}", metrics.total_outcomes);
    println!("  success rate:    {:.2}", metrics.success_rate);
    println!("  avg confidence:  {:.2}", metrics.average_confidence);
    println!("  conversion:      {:.2}", metrics.conversion_rate);
    println!("  revenue impact:  {:.0}", metrics.revenue_impact);
    println!("  quality:         {}", quality(evaluation.quality.score));

    for strength in &evaluation.quality.strengths {
        println!("    {} {}", "+".green(), strength);
    }
    for weakness in &evaluation.quality.weaknesses {
        println!("    {} {}", "-".red(), weakness);
    }

    if !evaluation.recommendations.is_empty() {
        println!();
        println!("{}", "RECOMMENDATIONS".bold());
        for rec in &evaluation.recommendations {
            println!("  [{}] {}", priority(rec.priority), rec.description);
            for action in &rec.actions {
                println!("      * {}", action);
            }
        }
    }

    if !evaluation.anomalies.is_empty() {
        println!();
        println!("{}", "ANOMALIES".red().bold());
        for anomaly in &evaluation.anomalies {
            println!("  [{}] {}", priority(anomaly.severity), anomaly.description);
        }
    }
}

fn status(status: PlanStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        PlanStatus::Completed => text.green(),
        PlanStatus::Failed => text.red(),
        PlanStatus::Executing => text.yellow(),
        PlanStatus::Draft | PlanStatus::Validated => text.normal(),
    }
}

fn step_status(status: StepStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        StepStatus::Completed => text.green(),
        StepStatus::Failed => text.red(),
        StepStatus::Processing => text.yellow(),
        StepStatus::Pending => text.dimmed(),
    }
}

fn risk(level: RiskLevel) -> ColoredString {
    let text = level.to_string();
    match level {
        RiskLevel::Low => text.green(),
        RiskLevel::Medium => text.yellow(),
        RiskLevel::High => text.red(),
        RiskLevel::Critical => text.red().bold(),
    }
}

fn priority(priority: Priority) -> ColoredString {
    let text = format!("{:?}", priority).to_lowercase();
    match priority {
        Priority::Critical => text.red().bold(),
        Priority::High => text.red(),
        Priority::Medium => text.yellow(),
        Priority::Low => text.normal(),
    }
}

fn quality(score: f64) -> ColoredString {
    let text = format!("{:.2}", score);
    if score >= 0.7 {
        text.green()
    } else if score >= 0.4 {
        text.yellow()
    } else {
        text.red()
    }
}
