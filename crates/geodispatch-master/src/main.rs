use clap::Parser;
use geodispatch_master::{api::serve_status_api, MasterConfig, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "geodispatch-master")]
#[command(about = "Geocoding work distribution master", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "master.yaml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Input dataset
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output dataset
    #[arg(long)]
    output: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Status API port
    #[arg(long)]
    status_port: Option<u16>,

    /// Keep listening after every row has completed
    #[arg(long)]
    keep_running: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        MasterConfig::from_file(&args.config)?
    } else {
        MasterConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(input) = args.input {
        config.data.input_path = input;
    }
    if let Some(output) = args.output {
        config.data.output_path = output;
    }
    if let Some(checkpoint) = args.checkpoint {
        config.checkpoint.checkpoint_path = checkpoint;
    }
    if let Some(status_port) = args.status_port {
        config.monitoring.status_port = Some(status_port);
    }
    if args.keep_running {
        config.shutdown.exit_when_drained = false;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting master with config: {:?}", config);

    let scheduler = Arc::new(Scheduler::build(config.clone())?);

    // Ctrl-C stops accepting work and writes the final checkpoint
    let shutdown = scheduler.shutdown().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    if let Some(port) = config.monitoring.status_port {
        let api_scheduler = scheduler.clone();
        let addr = format!("{}:{}", config.network.host, port);
        tokio::spawn(async move {
            if let Err(e) = serve_status_api(api_scheduler, addr).await {
                tracing::error!("Status API error: {}", e);
            }
        });
    }

    let summary = scheduler.run().await?;
    if summary.pending > 0 || summary.in_flight > 0 {
        tracing::warn!(
            "{} rows left unprocessed; rerun to resume from row {}",
            summary.pending + summary.in_flight,
            summary.checkpoint
        );
    }

    Ok(())
}
