//! Conductor CLI
//!
//! Plans goals, runs them against simulated workers and prints the critic's
//! evaluation.
//!
//! # Usage
//! ```bash
//! conductor strategies
//! conductor plan revive-pipeline --budget 25000
//! conductor run increase-meetings --failure-rate 0.2 --outcomes 40 --seed 7
//! conductor --config conductor.toml --verbose run build-icp
//! ```

mod report;
mod simulation;

use anyhow::{ensure, Context};
use clap::{Args, Parser, Subcommand};
use conductor_core::config::ConductorConfig;
use conductor_core::goal::{Goal, GoalType};
use conductor_core::types::{AutonomyLevel, Priority};
use conductor_runtime::PlanningContext;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Conductor - goal orchestration for revenue workflows
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of a text report
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the workers and approach used for every goal type
    Strategies,

    /// Build and validate a plan without executing it
    Plan {
        #[command(flatten)]
        goal: GoalArgs,
    },

    /// Plan, execute with simulated workers, then evaluate synthetic outcomes
    Run {
        #[command(flatten)]
        goal: GoalArgs,

        /// Probability that a simulated worker attempt fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Number of synthetic outcomes fed to the critic
        #[arg(long, default_value_t = 20)]
        outcomes: usize,

        /// Seed for the simulation; random when omitted
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct GoalArgs {
    /// Goal type: revive-pipeline, increase-meetings, optimize-sequence,
    /// build-icp, detect-leakage, predict-churn, forecast-revenue
    goal_type: GoalType,

    /// Free-text description of the goal
    #[arg(short, long)]
    description: Option<String>,

    /// Budget constraint
    #[arg(long)]
    budget: Option<f64>,

    /// Requested autonomy (L0-L3)
    #[arg(long, value_parser = parse_autonomy)]
    autonomy: Option<AutonomyLevel>,

    /// Ambient autonomy inherited by steps (L0-L3)
    #[arg(long, value_parser = parse_autonomy)]
    ambient: Option<AutonomyLevel>,

    /// Goal priority: low, medium, high, critical
    #[arg(long, value_parser = parse_priority, default_value = "medium")]
    priority: Priority,

    /// Target metric as NAME=VALUE; repeatable
    #[arg(long = "metric", value_name = "NAME=VALUE", value_parser = parse_metric)]
    metrics: Vec<(String, f64)>,
}

impl GoalArgs {
    fn build(&self) -> anyhow::Result<Goal> {
        let mut builder = Goal::builder(self.goal_type).priority(self.priority);
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }
        if let Some(budget) = self.budget {
            builder = builder.budget(budget);
        }
        if let Some(level) = self.autonomy {
            builder = builder.autonomy_level(level);
        }
        for (name, value) in &self.metrics {
            builder = builder.target_metric(name.clone(), *value);
        }
        Ok(builder.build()?)
    }

    fn planning_context(&self, session_id: &str) -> PlanningContext {
        let context = PlanningContext::new(session_id);
        match self.ambient {
            Some(level) => context.with_ambient_autonomy(level),
            None => context,
        }
    }
}

fn parse_autonomy(s: &str) -> Result<AutonomyLevel, String> {
    match s.trim().to_ascii_uppercase().trim_start_matches('L') {
        "0" => Ok(AutonomyLevel::L0),
        "1" => Ok(AutonomyLevel::L1),
        "2" => Ok(AutonomyLevel::L2),
        "3" => Ok(AutonomyLevel::L3),
        _ => Err(format!("invalid autonomy level '{}', expected L0-L3", s)),
    }
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        _ => Err(format!("invalid priority '{}'", s)),
    }
}

fn parse_metric(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ConductorConfig> {
    match path {
        Some(path) => ConductorConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(ConductorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match &cli.command {
        Commands::Strategies => {
            report::print_strategies(&config.planner, cli.json)?;
        }
        Commands::Plan { goal } => {
            let conductor = simulation::conductor(config, 0.0, 0)?;
            let plan = conductor
                .plan(&goal.build()?, &goal.planning_context("cli-plan"))
                .await?;
            report::print_plan(&plan, cli.json)?;
            conductor.shutdown();
        }
        Commands::Run {
            goal,
            failure_rate,
            outcomes,
            seed,
        } => {
            ensure!(
                (0.0..=1.0).contains(failure_rate),
                "--failure-rate must be between 0 and 1"
            );
            let seed = seed.unwrap_or_else(rand::random);
            let session_id = format!("cli-run-{}", seed);
            tracing::info!(seed, "starting simulated run");

            let conductor = simulation::conductor(config, *failure_rate, seed)?;
            let mut plan = conductor
                .plan(&goal.build()?, &goal.planning_context(&session_id))
                .await?;
            let context = conductor_runtime::ExecutionContext::new(session_id.as_str());
            if let Err(e) = conductor.execute(&mut plan, &context).await {
                tracing::warn!(plan_id = %plan.id, "execution stopped: {}", e);
            }

            let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(1));
            let evaluation = if plan.failure.is_none() {
                for outcome in simulation::outcomes(&plan, *outcomes, &mut rng) {
                    conductor.process_outcome(outcome, &session_id).await;
                }
                let evaluation = conductor.evaluate(plan.id, &session_id).await;
                conductor.critic().forget_plan(plan.id).await;
                evaluation
            } else {
                None
            };

            report::print_run(&plan, evaluation.as_ref(), cli.json)?;
            conductor.shutdown();
        }
        Commands::Config { output } => {
            match output {
                Some(path) => {
                    config
                        .to_file(path)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Configuration written to {}", path.display());
                }
                None => print!("{}", config.to_toml_string()?),
            }
        }
    }

    Ok(())
}
