use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use docshelf::app::{router, AppState};
use docshelf::config::{AppConfig, Backend};
use docshelf::db::memory::InMemoryDocumentRepository;
use docshelf::db::repository::{DocumentRepository, MongoDocumentRepository};
use docshelf::lifecycle::sweeper::ArchivalSweeper;
use docshelf::storage::client::{S3StorageClient, StorageClient};
use docshelf::storage::memory::InMemoryStorageClient;

#[derive(Parser)]
#[command(name = "docshelf", version, about = "Document lifecycle service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the archival sweeper in the background (default).
    Serve,
    /// Run a single sweep cycle and exit.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docshelf=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let (repo, storage) = build_backends(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, repo, storage).await,
        Command::Sweep => {
            if config.backend == Backend::Memory {
                tracing::warn!("Sweeping the in-memory backend has nothing to work on");
            }
            let sweeper = ArchivalSweeper::new(repo, storage, config.sweep_settings());
            let report = sweeper.run_cycle(chrono::Utc::now()).await;
            tracing::info!(
                archived = report.archived,
                purged = report.purged,
                failed_passes = report.failed_passes,
                "Sweep finished"
            );
            if report.failed_passes > 0 {
                anyhow::bail!("{} sweep pass(es) failed", report.failed_passes);
            }
            Ok(())
        }
    }
}

async fn build_backends(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn DocumentRepository>, Arc<dyn StorageClient>)> {
    match config.backend {
        Backend::Memory => {
            tracing::info!("Using in-memory backend");
            let repo: Arc<dyn DocumentRepository> = Arc::new(InMemoryDocumentRepository::new());
            let storage: Arc<dyn StorageClient> = Arc::new(InMemoryStorageClient::new());
            Ok((repo, storage))
        }
        Backend::Mongo => {
            let client = mongodb::Client::with_uri_str(&config.mongodb_uri)
                .await
                .context("Failed to connect to MongoDB")?;
            let repo = MongoDocumentRepository::new(&client.database(&config.mongodb_database));
            repo.ensure_indexes().await?;
            tracing::info!("Connected to MongoDB at {}", config.mongodb_uri);

            let storage =
                S3StorageClient::connect(config.s3_bucket.clone(), config.s3_endpoint.as_deref())
                    .await;
            tracing::info!(bucket = %config.s3_bucket, "S3 storage client initialized");

            let repo: Arc<dyn DocumentRepository> = Arc::new(repo);
            let storage: Arc<dyn StorageClient> = Arc::new(storage);
            Ok((repo, storage))
        }
    }
}

async fn serve(
    config: &AppConfig,
    repo: Arc<dyn DocumentRepository>,
    storage: Arc<dyn StorageClient>,
) -> anyhow::Result<()> {
    let sweeper = ArchivalSweeper::new(repo.clone(), storage.clone(), config.sweep_settings()).spawn();

    let app = router(AppState::new(repo, storage, config.public_base_url()?));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.shutdown().await;
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining requests");
}
