mod config;
mod runner;
mod tui;

use std::sync::Arc;

use anyhow::{Context, Result};
use apex_core::config::GovernanceConfig;
use apex_core::dag::Dag;
use apex_core::limiter::RateLimiterGroup;
use apex_core::planfile;
use apex_core::scheduler::{run_to_completion, SchedulerConfig};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use runner::ShellRunner;

#[derive(Parser)]
#[command(name = "apex", about = "Dependency-graph task-execution runtime for agent fleets")]
struct Cli {
    /// Path to an `apex.toml` governance config file (overrides APEX_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file to completion
    Run {
        /// Path to the plan TOML file
        plan: String,
        /// Named rate limit group to apply to every task (must also be
        /// defined under `[[rate_limits]]` in the governance config)
        #[arg(long)]
        rate_limit: Option<String>,
    },
    /// Plan file inspection
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Launch the interactive status dashboard while a plan runs
    Dashboard {
        /// Path to the plan TOML file
        plan: String,
    },
    /// Governance config file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the resolved governance config to the default config path
    /// (`~/.config/apex/apex.toml`), creating it if missing
    Init,
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Validate a plan file: parse, check references, check acyclicity
    Validate {
        /// Path to the plan TOML file
        file: String,
    },
    /// Print a plan's nodes in topological order
    Show {
        /// Path to the plan TOML file
        file: String,
    },
}

fn load_governance(cli_config: Option<&str>) -> Result<GovernanceConfig> {
    config::resolve(cli_config)
}

async fn build_runner(config: &GovernanceConfig, rate_limit_name: Option<&str>) -> Result<Arc<ShellRunner>> {
    let mut runner = ShellRunner::new();

    if let Some(name) = rate_limit_name {
        let group = Arc::new(RateLimiterGroup::new());
        let spec = config
            .rate_limits
            .iter()
            .find(|g| g.name == name)
            .with_context(|| format!("no rate_limits entry named {name:?} in governance config"))?;
        group.add(spec.name.clone(), spec.rate, spec.burst).await;
        runner = runner.with_rate_limiter(group, name.to_string());
    }

    Ok(Arc::new(runner))
}

async fn cmd_run(plan_path: &str, rate_limit: Option<&str>, config: &GovernanceConfig) -> Result<()> {
    let content = std::fs::read_to_string(plan_path)
        .with_context(|| format!("failed to read plan file {plan_path}"))?;
    let dag = Arc::new(planfile::load_dag(&content).with_context(|| format!("invalid plan file {plan_path}"))?);

    let runner = build_runner(config, rate_limit).await?;
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, cancelling run");
        cancel_clone.cancel();
    });

    let scheduler_config = SchedulerConfig {
        max_concurrent: config.max_concurrent,
        retry_policy: Some(config.retry_policy()),
    };

    match run_to_completion(cancel, Arc::clone(&dag), runner, scheduler_config).await {
        Ok(()) => {
            print_summary(&dag).await;
            if dag.has_failure().await {
                anyhow::bail!("one or more nodes failed");
            }
            Ok(())
        }
        Err(_) => {
            print_summary(&dag).await;
            anyhow::bail!("run cancelled")
        }
    }
}

async fn print_summary(dag: &Dag) {
    for node in dag.node_slice().await {
        println!("{:<20} {:?}", node.id, node.status);
        if let Some(err) = node.error {
            println!("  error: {err}");
        }
    }
}

fn cmd_plan_validate(file: &str) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    planfile::load_dag(&content).with_context(|| format!("{file} is invalid"))?;
    println!("{file}: ok");
    Ok(())
}

async fn cmd_plan_show(file: &str) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    let dag = planfile::load_dag(&content).with_context(|| format!("{file} is invalid"))?;
    for node in dag.node_slice().await {
        let deps = if node.depends.is_empty() {
            String::new()
        } else {
            format!(" <- {}", node.depends.join(", "))
        };
        println!("{}{}", node.id, deps);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    apex_core::telemetry::init();

    let cli = Cli::parse();
    let config = load_governance(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { plan, rate_limit } => cmd_run(&plan, rate_limit.as_deref(), &config).await,
        Commands::Plan { command } => match command {
            PlanCommands::Validate { file } => cmd_plan_validate(&file),
            PlanCommands::Show { file } => cmd_plan_show(&file).await,
        },
        Commands::Dashboard { plan } => {
            let content = std::fs::read_to_string(&plan).with_context(|| format!("failed to read {plan}"))?;
            let dag = Arc::new(planfile::load_dag(&content).with_context(|| format!("{plan} is invalid"))?);
            let runner = build_runner(&config, None).await?;
            let cancel = CancellationToken::new();
            let scheduler_config = SchedulerConfig {
                max_concurrent: config.max_concurrent,
                retry_policy: Some(config.retry_policy()),
            };

            let dag_for_run = Arc::clone(&dag);
            let cancel_for_run = cancel.clone();
            let run_handle = tokio::spawn(async move {
                let _ = run_to_completion(cancel_for_run, dag_for_run, runner, scheduler_config).await;
            });

            tui::run_dashboard(dag, cancel.clone()).await?;
            cancel.cancel();
            let _ = run_handle.await;
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Init => {
                config::save(&config)?;
                println!("wrote {}", config::config_path().display());
                Ok(())
            }
        },
    }
}
