use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use berth_core::lifecycle::LifecycleManager;
use berth_core::reservation::{RedbReservationStore, ReservationReleaseSweeper};
use berth_core::types::DataCenterId;
use berth_core::{
    BerthConfig, DeploymentPlan, DeploymentPlanningManager, ExcludeList, InMemoryInventory,
    PlannerDependencies, VirtualMachineProfile,
};

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "VM deployment planner", long_about = None)]
struct Cli {
    /// Configuration file (TOML); environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Inventory snapshot (YAML)
    #[arg(long, global = true, default_value = "./inventory.yaml")]
    inventory: PathBuf,

    /// Reservation database; reservations are kept in memory when omitted
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Find a destination for one VM
    Plan {
        /// Placement request (YAML) holding the VM profile and the plan
        #[arg(long)]
        request: PathBuf,

        /// Record the destination as the VM's reservation
        #[arg(long)]
        reserve: bool,
    },
    /// Release host reservations that no longer hold any VM
    Sweep {
        /// Zones whose hosts are registered with the ledger
        #[arg(long, value_delimiter = ',', default_value = "1")]
        zones: Vec<DataCenterId>,

        /// Run a single sweep and exit
        #[arg(long)]
        once: bool,
    },
}

/// One placement request as read from disk
#[derive(Debug, Deserialize)]
struct PlacementRequest {
    profile: VirtualMachineProfile,
    plan: DeploymentPlan,
    #[serde(default)]
    avoid: ExcludeList,
    /// Planner to use instead of the one the offering or config names
    #[serde(default)]
    planner: Option<String>,
}

impl PlacementRequest {
    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid placement request {}", path.display()))
    }
}

fn load_config(path: Option<&Path>) -> Result<BerthConfig> {
    let config = match path {
        Some(path) => BerthConfig::from_file(path)?,
        None => BerthConfig::from_env()?,
    };
    Ok(config)
}

fn build_manager(cli: &Cli, config: BerthConfig) -> Result<DeploymentPlanningManager> {
    let inventory = Arc::new(
        InMemoryInventory::from_yaml_file(&cli.inventory, config.storage.clone())
            .with_context(|| format!("Failed to load inventory {}", cli.inventory.display()))?,
    );
    let deps = PlannerDependencies::from_source(inventory);

    let mut builder = DeploymentPlanningManager::builder(deps, config);
    if let Some(db) = &cli.db {
        let store = RedbReservationStore::open(db)
            .with_context(|| format!("Failed to open reservation database {}", db.display()))?;
        builder = builder.with_reservation_store(Arc::new(store));
    }
    Ok(builder.with_default_components().build()?)
}

fn plan(manager: &DeploymentPlanningManager, request: PlacementRequest, reserve: bool) -> Result<()> {
    let PlacementRequest {
        profile,
        plan,
        mut avoid,
        planner,
    } = request;

    let registered = match planner.as_deref() {
        Some(name) => Some(
            manager
                .planner(name)
                .with_context(|| format!("No planner named {}", name))?,
        ),
        None => None,
    };

    let hosts = manager.register_zone_hosts(plan.data_center_id)?;
    info!("Registered {} hosts of zone {}", hosts, plan.data_center_id);

    let outcome = if reserve {
        manager
            .plan_and_reserve(&profile, &plan, &mut avoid, registered)?
            .map(|(destination, id)| {
                serde_json::json!({ "destination": destination, "reservation_id": id })
            })
    } else {
        manager
            .plan_deployment(&profile, &plan, &mut avoid, registered)?
            .map(|destination| serde_json::json!({ "destination": destination }))
    };

    match outcome {
        Some(found) => println!("{}", serde_json::to_string_pretty(&found)?),
        None => {
            info!("No destination for VM {}, avoided {}", profile.id(), avoid);
            println!("{}", serde_json::json!({ "destination": null, "avoid": avoid }));
        }
    }
    Ok(())
}

async fn sweep(manager: &DeploymentPlanningManager, zones: &[DataCenterId], once: bool) -> Result<()> {
    for zone in zones {
        let hosts = manager.register_zone_hosts(*zone)?;
        info!("Registered {} hosts of zone {}", hosts, zone);
    }

    let mut sweeper =
        ReservationReleaseSweeper::new(manager.ledger().clone(), &manager.config().reservation);
    if once {
        let released = sweeper.sweep_once()?;
        println!("{}", serde_json::to_string(&released)?);
        return Ok(());
    }

    sweeper.start().await?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    sweeper.stop().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("berth=info".parse().context("Invalid log directive")?)
        .add_directive("berth_core=info".parse().context("Invalid log directive")?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let manager = build_manager(&cli, config)?;

    match &cli.command {
        Commands::Plan { request, reserve } => {
            let request = PlacementRequest::from_file(request)?;
            plan(&manager, request, *reserve)
        }
        Commands::Sweep { zones, once } => sweep(&manager, zones, *once).await,
    }
}
