use crate::batch::{AssignmentPolicy, BatchAssigner, BatchRegistry};
use crate::catalog::{FsImageSource, ImageCache, ImageSource};
use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::session::{ResultsStore, SessionManager};
use crate::storage::duckdb::DuckDbTableStore;
use crate::storage::traits::TableStore;
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("catalog root {0} is not a directory")]
    CatalogRoot(PathBuf),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

/// Everything the server and the admin commands share, wired from config.
pub struct Services {
    pub store: Arc<dyn TableStore>,
    pub assigner: Arc<BatchAssigner>,
    pub sessions: Arc<SessionManager>,
}

impl Services {
    /// Wire the services over an already opened store and image source.
    pub fn new(
        config: &Config,
        store: Arc<dyn TableStore>,
        source: Arc<dyn ImageSource>,
        root_id: &str,
    ) -> Self {
        let results = Arc::new(ResultsStore::new(
            store.clone(),
            config.storage.results_table.clone(),
            config.storage.submit_strategies.clone(),
            config.results.offset(),
        ));
        let registry = BatchRegistry::new(store.clone(), config.storage.batches_table.clone());
        let assigner = Arc::new(BatchAssigner::new(
            source.clone(),
            root_id,
            registry,
            results,
            AssignmentPolicy::from(&config.assignment),
            config.assignment.seed,
        ));
        let cache = Arc::new(ImageCache::new(source, config.catalog.cache_entries));
        let sessions = Arc::new(SessionManager::new(
            assigner.clone(),
            cache,
            config.results.export_dir.clone(),
        ));

        Self {
            store,
            assigner,
            sessions,
        }
    }

    /// Open the DuckDB store and the filesystem catalog named in `config`.
    pub async fn open(config: &Config) -> Result<Self, RunError> {
        if !config.catalog.root.is_dir() {
            return Err(RunError::CatalogRoot(config.catalog.root.clone()));
        }

        info!(path = %config.storage.path.display(), "Initializing storage");
        let store = Arc::new(DuckDbTableStore::new(&config.storage.path)?);
        store.init_schema().await?;

        info!(root = %config.catalog.root.display(), "Opening image catalog");
        let source = Arc::new(FsImageSource::new(
            config.catalog.root.clone(),
            &config.catalog.extensions,
        ));

        Ok(Self::new(config, store, source, FsImageSource::ROOT_ID))
    }
}

/// Load the config at `config_path`, or explain where one was looked for.
pub fn require_config(config_path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    let config_path = config_path.ok_or(
        "config not found; searched ~/.config/imgrate/config.yml and /etc/imgrate/config.yml.\n\
         Use --config <path> to specify a config file, or run 'imgrate config init' to generate one.",
    )?;
    info!(config_path = %config_path.display(), "Loading configuration");
    Ok(load_config(&config_path)?)
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    serve(config).await.map_err(|e| e.into())
}

async fn serve(config: Config) -> Result<(), RunError> {
    let services = Services::open(&config).await?;
    log_catalog_summary(&services, &config.catalog.root).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        sessions: services.sessions.clone(),
        guidelines: Arc::new(config.guidelines.clone()),
    };
    let web_config = config.web.clone();
    info!("Starting web server on {}", web_config.listen);
    let web_handle = tokio::spawn(async move {
        run_server(state, web_config, shutdown_rx)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Rating service started, press Ctrl+C to shutdown");
    signal::ctrl_c()
        .await
        .map_err(|e| RunError::WebServer(e.to_string()))?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    match web_handle.await? {
        Ok(()) => info!("Web server stopped"),
        Err(e) => error!(error = %e, "Web server error"),
    }

    info!(
        active_users = services.sessions.active_users().await,
        "Shutdown complete"
    );
    Ok(())
}

async fn log_catalog_summary(services: &Services, root: &Path) {
    match services.assigner.catalog().await {
        Ok(catalog) => info!(
            root = %root.display(),
            images = catalog.len(),
            datasets = catalog.dataset_count(),
            "Catalog ready"
        ),
        Err(e) => error!(root = %root.display(), error = %e, kind = %e.kind(), "Catalog not usable yet"),
    }
}
