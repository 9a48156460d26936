//! botfleet: fleet supervisor plus control-surface gateway
//!
//! Usage:
//!   botfleet                          → start with ./botfleet.toml (or defaults)
//!   botfleet --config fleet.toml      → start with a specific config
//!   botfleet --print-config           → print the effective config as TOML

use botfleet::Fleet;
use botfleet_agent::sim::SimConnector;
use botfleet_agent::AccountStore;
use botfleet_core::FleetConfig;
use botfleet_gateway::{start_gateway, GatewayState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "botfleet",
    about = "Supervisor for a fleet of scripted game agents",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "botfleet.toml")]
    config: PathBuf,

    /// Gateway bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Account store path (overrides config)
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// World tick interval in milliseconds
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Print the effective config and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = FleetConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.control.bind = bind;
    }
    if let Some(port) = cli.port {
        config.control.port = port;
    }
    if let Some(accounts) = cli.accounts {
        config.supervisor.accounts_file = accounts;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let connector = Arc::new(SimConnector::new().with_ticks(Duration::from_millis(cli.tick_ms.max(1))));
    let accounts = Arc::new(AccountStore::new(&config.supervisor.accounts_file));
    let control = config.control.clone();

    info!(
        server = %format!("{}:{}", config.server.host, config.server.port),
        accounts = %accounts.path().display(),
        "starting fleet"
    );
    let fleet = Fleet::start(config, connector, Some(accounts));
    let state = Arc::new(GatewayState::new(Arc::new(fleet.handle()), fleet.events()));

    tokio::select! {
        result = start_gateway(&control, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    fleet.shutdown().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "botfleet=info,botfleet_agent=info,botfleet_gateway=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
