use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deckforge_core::config::GeneratorConfig;
use deckforge_core::{
    load_config, validate_config, ArtifactStore, Config, ContentGenerator, DatabaseBackend,
    ExecutorSet, FsArtifactStore, GeneratorBackend, HttpGenerator, InMemoryDispatchQueue,
    InMemoryTaskStore, Orchestrator, SqliteTaskStore, StatusFacade, TaskStore, TemplateGenerator,
};
use deckforge_server::api::create_router;
use deckforge_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("DECKFORGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );

    let store = create_task_store(&config)?;

    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.artifacts.root));
    info!("Artifact store at {:?}", config.artifacts.root);

    let generator = create_generator(&config.generator)?;

    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        config.limits.clone(),
        config.locks.clone(),
        Arc::clone(&store),
        Arc::new(InMemoryDispatchQueue::new()),
        ExecutorSet::new(generator, Arc::clone(&artifacts)),
    );
    orchestrator.start();

    let status = StatusFacade::new(store, artifacts);

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), orchestrator.clone(), status));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop().await;
    info!("Server shut down");

    Ok(())
}

fn create_task_store(config: &Config) -> Result<Arc<dyn TaskStore>> {
    let store: Arc<dyn TaskStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Database path: {:?}", config.database.path);
            Arc::new(
                SqliteTaskStore::new(&config.database.path)
                    .context("Failed to create task store")?,
            )
        }
        DatabaseBackend::Memory => {
            info!("Using in-memory task store, tasks will not survive a restart");
            Arc::new(InMemoryTaskStore::new())
        }
    };
    Ok(store)
}

fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn ContentGenerator>> {
    match config.backend {
        GeneratorBackend::Template => {
            info!("Using template generator");
            Ok(Arc::new(TemplateGenerator::new()))
        }
        GeneratorBackend::Http => {
            let http = config
                .http
                .as_ref()
                .context("HTTP generator selected but no [generator.http] section provided")?;
            info!("Initializing HTTP generator at {}", http.url);

            let mut generator =
                HttpGenerator::new(&http.url, Duration::from_secs(http.timeout_secs))
                    .context("Failed to create HTTP generator")?;
            if let Some(api_key) = &http.api_key {
                generator = generator.with_api_key(api_key);
            }
            Ok(Arc::new(generator))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
