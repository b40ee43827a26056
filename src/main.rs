mod classifier;
mod config;
mod ingest;
mod models;
mod pipeline;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classifier::GeminiClassifier;
use config::Config;
use pipeline::Pipeline;
use storage::ReviewStore;

#[derive(Parser)]
#[command(name = "reviewsense")]
#[command(about = "Batch sentiment analysis pipeline for product reviews", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "reviewsense.toml")]
    config: PathBuf,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk-load reviews from a CSV file into the database
    Load {
        /// Path to the reviews CSV
        csv: PathBuf,

        /// Keep only rows with this brand_name (overrides config)
        #[arg(long)]
        brand: Option<String>,
    },

    /// Run the classification pipeline until interrupted
    Run,

    /// Show load/analysis progress counts
    Status,
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("reviewsense={}", log_level).into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Cancellation token wired to SIGINT/SIGTERM for graceful shutdown.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, initiating graceful shutdown");
            }
        }
        handler_token.cancel();
    });

    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(&cli.config)?;
    let store = ReviewStore::new(&config.db_path).await?;
    store.init_schema().await?;

    match cli.command {
        Commands::Load { csv, brand } => {
            let brand = brand.or_else(|| config.brand_filter.clone());
            let loaded = ingest::load_csv(&store, &csv, brand.as_deref()).await?;
            println!("Loaded {} reviews into {}", loaded, config.db_path);
        }

        Commands::Run => {
            // Fail fast on a missing credential instead of looping on a
            // permanently broken gateway.
            let classifier = match GeminiClassifier::new(&config, Config::api_key()) {
                Ok(c) => Arc::new(c),
                Err(e) => {
                    tracing::error!(error = %e, "classifier initialization failed");
                    anyhow::bail!("classifier initialization failed: {}", e);
                }
            };

            let pipeline = Pipeline::new(store, classifier, &config);
            pipeline.run(shutdown_token()).await;
        }

        Commands::Status => {
            store.health_check().await?;
            let total = store.count_reviews().await?;
            let analyzed = store.count_analyzed().await?;
            println!("Reviews:   {}", total);
            println!("Analyzed:  {}", analyzed);
            println!("Remaining: {}", total - analyzed);
        }
    }

    Ok(())
}
