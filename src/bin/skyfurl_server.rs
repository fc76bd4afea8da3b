use std::path::PathBuf;

use clap::Parser;
use skyfurl::{config::Config, errors::AppError, manifest::Manifest, server};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Unfurls Bluesky links in Slack", long_about = None)]
struct Args {
    /// Overrides PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides MANIFEST_PATH.
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(manifest) = args.manifest {
        config.manifest_path = manifest;
    }

    let manifest = Manifest::load(&config.manifest_path).await?;

    let result = server::serve(config, manifest, shutdown_signal()).await;
    if let Err(err) = &result {
        error!(error = %err, "Server failed");
    }

    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!("Shutting down");
}
