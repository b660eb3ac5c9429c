use clap::Parser;
use geodispatch_worker::{Geocoder, LookupGeocoder, NullGeocoder, Worker, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "geodispatch-worker")]
#[command(about = "Reference geocoding worker", long_about = None)]
struct Args {
    /// Master address
    #[arg(short, long)]
    master: Option<String>,

    /// CSV table of endereco,latitude,longitude used to answer requests
    #[arg(long)]
    lookup: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(master) = args.master {
        config.master_address = master;
    }
    if let Some(lookup) = args.lookup {
        config.lookup_path = Some(lookup);
    }

    let geocoder: Arc<dyn Geocoder> = match &config.lookup_path {
        Some(path) => {
            let lookup = LookupGeocoder::load(path)?;
            tracing::info!("Loaded {} addresses from {:?}", lookup.len(), path);
            Arc::new(lookup)
        }
        None => {
            tracing::warn!("No lookup table configured, every address will be reported as not found");
            Arc::new(NullGeocoder)
        }
    };

    let worker = Worker::new(config, geocoder);

    // Handle shutdown signals
    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    let answered = worker.run().await?;
    tracing::info!("Answered {} requests", answered);

    Ok(())
}
