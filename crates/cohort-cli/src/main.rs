//! `cohort`: analyze execution plans, generate agent graphs and run them.

mod config;
mod input;

use clap::{Parser, Subcommand};
use cohort_orchestrator::{Orchestrator, SimulatedExecutor};
use cohort_planner::{CoordinationAnalyzer, SubAgentGenerator};
use cohort_state::{read_snapshot, SharedStateStore};
use config::CohortConfig;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort", about = "Cohort: multi-agent goal decomposition and orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cohort.toml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether a plan needs several agents and print the strategy
    Analyze {
        /// Plan file (JSON)
        plan: PathBuf,
    },
    /// Generate the agent dependency graph for a plan
    Plan {
        /// Plan file (JSON)
        plan: PathBuf,
        /// Goal description (overrides the one in the plan file)
        #[arg(long)]
        goal: Option<String>,
        /// Skills file (JSON array)
        #[arg(long)]
        skills: Option<PathBuf>,
    },
    /// Plan and execute with the simulated executor
    Run {
        /// Plan file (JSON)
        plan: PathBuf,
        /// Goal description (overrides the one in the plan file)
        #[arg(long)]
        goal: Option<String>,
        /// Skills file (JSON array)
        #[arg(long)]
        skills: Option<PathBuf>,
        /// Maximum agents running at once (overrides config)
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Run timeout in seconds (overrides config)
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Make the named phase fail; repeatable
        #[arg(long = "fail-phase")]
        fail_phases: Vec<String>,
        /// Per-phase delay of the simulated executor (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Write the final store snapshot here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Summarize a store snapshot
    Inspect {
        /// Snapshot file written by `run --snapshot`
        snapshot: PathBuf,
    },
}

fn init_tracing(pretty: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let config = CohortConfig::load(&cli.config).await?;
    let analyzer = CoordinationAnalyzer::new(config.analyzer.clone());
    let generator = SubAgentGenerator::from_config(&config.analyzer);

    match cli.command {
        Commands::Analyze { plan } => {
            let (_, plan) = input::load_plan(&plan, None).await?;
            print_json(&analyzer.analyze(&plan))?;
        }
        Commands::Plan { plan, goal, skills } => {
            let (goal, plan) = input::load_plan(&plan, goal.as_deref()).await?;
            let skills = input::load_skills(skills.as_deref()).await?;
            let strategy = analyzer.analyze(&plan);
            let graph = generator.generate(&goal, &plan, &skills, &strategy)?;
            println!("{}", graph.to_json()?);
        }
        Commands::Run {
            plan,
            goal,
            skills,
            max_concurrent,
            timeout_secs,
            fail_phases,
            delay_ms,
            snapshot,
        } => {
            let (goal, plan) = input::load_plan(&plan, goal.as_deref()).await?;
            let skills = input::load_skills(skills.as_deref()).await?;
            let strategy = analyzer.analyze(&plan);
            let graph = generator.generate(&goal, &plan, &skills, &strategy)?;

            let mut orchestrator_config = config.orchestrator.clone();
            if let Some(n) = max_concurrent {
                orchestrator_config.max_concurrent_agents = n;
            }
            if let Some(secs) = timeout_secs {
                orchestrator_config.timeout_secs = secs;
            }

            let delay = delay_ms.unwrap_or(config.simulation.phase_delay_ms);
            let mut executor = SimulatedExecutor::new(Duration::from_millis(delay));
            for phase in fail_phases {
                executor = executor.with_failing_phase(phase);
            }
            let store = Arc::new(SharedStateStore::with_config(config.store.clone()));
            let orchestrator = Orchestrator::new(Arc::clone(&store), Arc::new(executor))
                .with_config(orchestrator_config);

            let result = orchestrator.run(&graph).await?;
            if let Some(path) = snapshot {
                store.persist_to(&path).await?;
                info!(path = %path.display(), "Snapshot written");
            }
            print_json(&result)?;
            if !result.success {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Inspect { snapshot } => {
            let snapshot = read_snapshot(&snapshot).await?;
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for message in &snapshot.messages {
                *counts.entry(message.message_type().to_string()).or_default() += 1;
            }
            let entries: BTreeMap<&str, &serde_json::Value> = snapshot
                .entries
                .iter()
                .map(|e| (e.key.as_str(), &e.value))
                .collect();
            print_json(&json!({
                "saved_at": snapshot.saved_at,
                "entries": entries,
                "message_count": snapshot.messages.len(),
                "messages_by_type": counts,
            }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
