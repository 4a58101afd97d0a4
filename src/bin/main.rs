use anyhow::Result;
use batch_orchestrator::plan_file::load_plan;
use batch_orchestrator::{
    BatchSelection, CapabilityCatalog, OrchestratorConfig, PlanEvent, TimingPolicy,
    spawn_with_builtins, validate_plan,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batch-orchestrator")]
#[command(about = "Run batched work plans against capability executors")]
struct Cli {
    /// Path to an orchestrator config file (JSON)
    #[arg(long, env = "ORCHESTRATOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file against the built-in capabilities (echo, sleep, fail)
    Run {
        #[arg(long)]
        plan: PathBuf,
        /// Override the configured batch selection rule
        #[arg(long, value_enum)]
        batch_selection: Option<BatchSelectionArg>,
        /// Enforce earliest-start and deadline timestamps
        #[arg(long, default_value_t = false)]
        enforce_timing: bool,
    },
    /// Validate a plan file without running it
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BatchSelectionArg {
    ContiguousRun,
    PositionCoupled,
}

impl From<BatchSelectionArg> for BatchSelection {
    fn from(arg: BatchSelectionArg) -> Self {
        match arg {
            BatchSelectionArg::ContiguousRun => BatchSelection::ContiguousRun,
            BatchSelectionArg::PositionCoupled => BatchSelection::PositionCoupled,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("batch_orchestrator=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            batch_selection,
            enforce_timing,
        } => {
            let mut config = OrchestratorConfig::load(cli.config.as_deref())?;
            if let Some(rule) = batch_selection {
                config.batch_selection = rule.into();
            }
            if enforce_timing {
                config.timing = TimingPolicy::Enforce;
            }

            let plan = load_plan(&plan)?;
            info!("Loaded plan {} with {} items", plan.id(), plan.len());

            let orchestrator = spawn_with_builtins(config);
            let mut events = orchestrator.subscribe_events();
            let plan_id = orchestrator.submit(plan).await?;

            loop {
                match events.recv().await {
                    Ok(PlanEvent::BatchDispatched { plan_id: id, batch, items }) if id == plan_id => {
                        info!("Batch {} dispatched: {:?}", batch, items);
                    }
                    Ok(PlanEvent::ItemCompleted(c)) if c.plan_id == plan_id => {
                        if c.success {
                            info!("Item {} succeeded: {}", c.item_id, c.message);
                        } else {
                            warn!("Item {} failed: {}", c.item_id, c.message);
                        }
                    }
                    Ok(PlanEvent::PlanCompleted { plan_id: id, .. }) if id == plan_id => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} events, waiting for completion without progress logs", skipped);
                        break;
                    }
                    Err(RecvError::Closed) => {
                        error!("Orchestrator stopped before plan {} completed", plan_id);
                        break;
                    }
                }
            }

            let status = orchestrator.wait_for_completion(plan_id).await?;
            info!(
                "Plan {} complete: {} succeeded, {} failed",
                plan_id, status.succeeded, status.failed
            );
            orchestrator.shutdown().await;

            if status.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Validate { plan } => {
            let config = OrchestratorConfig::load(cli.config.as_deref())?;
            let plan = load_plan(&plan)?;
            validate_plan(&plan, config.batch_selection)?;

            let catalog = CapabilityCatalog::with_builtins();
            if let Some(item) = plan
                .items()
                .iter()
                .find(|item| !catalog.contains(&item.capability))
            {
                return Err(anyhow::anyhow!(
                    "Item {} targets unknown capability `{}`",
                    item.id,
                    item.capability
                ));
            }

            info!("Plan {} is valid ({} items)", plan.id(), plan.len());
        }
    }

    Ok(())
}
