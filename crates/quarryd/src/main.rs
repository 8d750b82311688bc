//! quarryd — the Quarry control plane daemon.
//!
//! Single binary that assembles the control plane:
//! - Node inventory (redb)
//! - Provisioner + registry-backed deployer
//! - Reservation expirer, retired expirer, rebooter
//! - Management API
//!
//! # Usage
//!
//! ```text
//! quarryd run --listen 0.0.0.0:7080 --data-dir /var/lib/quarry
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use quarry_core::{Environment, FlavorCatalog, Zone};
use quarry_maintenance::{
    PermissiveOrchestrator, Rebooter, ReservationExpirer, RetiredExpirer, run_maintainer,
};
use quarry_provision::{ProvisionConfig, Provisioner, RegistryDeployer};
use quarry_state::{Clock, NodeStore};

#[derive(Parser)]
#[command(name = "quarryd", about = "Quarry control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Data directory for the node inventory.
    #[arg(long, default_value = "/var/lib/quarry")]
    data_dir: PathBuf,

    /// Address the management API listens on.
    #[arg(long, default_value = "0.0.0.0:7080")]
    listen: SocketAddr,

    /// Zone environment: production, staging, dev or test.
    #[arg(long, default_value = "production")]
    environment: String,

    /// Flavor catalog file (TOML). Without one, node registrations must
    /// carry explicit resources.
    #[arg(long)]
    flavors: Option<PathBuf>,

    /// Seconds a reservation may sit unclaimed before it expires.
    #[arg(long, default_value = "1200")]
    reservation_expiry: u64,

    /// Seconds a retirement drains before removal.
    #[arg(long, default_value = "14400")]
    retirement_window: u64,

    /// Seconds between scheduled reboots of a physical node.
    #[arg(long, default_value = "2592000")]
    reboot_window: u64,

    /// Seconds between maintenance passes.
    #[arg(long, default_value = "60")]
    maintenance_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quarryd=debug,quarry=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!("Quarry control plane starting");

    let environment = Environment::parse(&args.environment)
        .with_context(|| format!("unknown environment '{}'", args.environment))?;

    // ── Inventory ──────────────────────────────────────────────

    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join("quarry.redb");
    let store = NodeStore::open(&db_path, Clock::system())?;
    info!(path = ?db_path, "node inventory opened");

    let flavors = match &args.flavors {
        Some(path) => FlavorCatalog::from_file(path)
            .with_context(|| format!("loading flavor catalog {}", path.display()))?,
        None => FlavorCatalog::default(),
    };
    info!(flavors = flavors.flavors().len(), "flavor catalog loaded");

    // ── Deployment path ────────────────────────────────────────

    let provisioner = Provisioner::new(
        store.clone(),
        ProvisionConfig::new(Zone::new(environment)),
    );
    let deployer = Arc::new(RegistryDeployer::new(provisioner));
    let orchestrator = Arc::new(PermissiveOrchestrator);
    info!(environment = environment.label(), "provisioner initialized");

    // ── Maintainers ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_secs(args.maintenance_interval);

    let reservations = ReservationExpirer::new(
        store.clone(),
        Duration::from_secs(args.reservation_expiry),
    );
    let reservation_handle =
        tokio::spawn(run_maintainer(reservations, interval, shutdown_rx.clone()));

    let retirements = RetiredExpirer::new(
        store.clone(),
        deployer,
        orchestrator,
        Duration::from_secs(args.retirement_window),
    );
    let retirement_handle =
        tokio::spawn(run_maintainer(retirements, interval, shutdown_rx.clone()));

    let rebooter = Rebooter::new(
        store.clone(),
        Duration::from_secs(args.reboot_window),
        interval,
    );
    let reboot_handle = tokio::spawn(run_maintainer(rebooter, interval, shutdown_rx));

    // ── Management API ─────────────────────────────────────────

    let router = quarry_api::build_router(store, Arc::new(flavors));

    info!(addr = %args.listen, "management api starting");
    let listener = tokio::net::TcpListener::bind(args.listen).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the maintainers.
    let _ = reservation_handle.await;
    let _ = retirement_handle.await;
    let _ = reboot_handle.await;

    info!("Quarry control plane stopped");
    Ok(())
}
