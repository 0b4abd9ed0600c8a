//! Routing daemon (v1)
//!
//! Listens for routing events on a STOMP topic and keeps an Apache load
//! balancer's pools, aliases and certificates in sync with them.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                     ROUTING DAEMON                        │
//!                 │                                                           │
//!   Broker        │  ┌─────────┐   ┌──────────┐   ┌────────┐   ┌──────────┐  │
//!   ──────────────┼─▶│ broker  │──▶│ consumer │──▶│ events │──▶│ dispatch │  │
//!   (STOMP 1.1)   │  │ + net   │   │ ack/nack │   │ decode │   │  rules   │  │
//!                 │  └─────────┘   └──────────┘   └────────┘   └────┬─────┘  │
//!                 │                                                 │        │
//!                 │                                                 ▼        │
//!   Apache        │  ┌──────────────┐   ┌────────────────┐   ┌────────────┐  │
//!   ◀─────────────┼──│   service    │◀──│ load_balancer  │◀──│ controller │  │
//!   reload        │  │ reload/start │   │ apache records │   │  pool map  │  │
//!                 │  └──────────────┘   └────────────────┘   └────────────┘  │
//!                 │                                                           │
//!                 │  config · observability · resilience · lifecycle          │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;

use routing_daemon::config::load_config;
use routing_daemon::lifecycle::{signals, startup, Shutdown};
use routing_daemon::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "routing-daemon", version, about = "Load balancer routing daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/openshift/routing-daemon.toml")]
    config: PathBuf,

    /// Validate the configuration and broker TLS material, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.check {
        startup::check(&config).context("broker configuration is unusable")?;
        println!("{}: configuration OK", cli.config.display());
        return Ok(());
    }

    logging::init_logging(&config.observability).context("failed to initialize logging")?;
    tracing::info!(config = %cli.config.display(), "routing-daemon v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .with_context(|| format!("invalid metrics address {}", config.observability.metrics_address))?;
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
    }

    tracing::info!(
        hosts = config.broker.hosts.len(),
        destination = %config.broker.destination,
        managed_dir = %config.apache.conf_dir.join(&config.apache.managed_subdir).display(),
        "Configuration loaded"
    );

    let mut consumer = startup::build(&config).await?;

    let shutdown = Shutdown::new();
    let listener = signals::spawn_signal_listener(shutdown.clone());
    let result = consumer.run(shutdown.subscribe()).await;
    listener.abort();
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}
