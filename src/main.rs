use dotenv::dotenv;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod clients;
mod config;
mod error;
mod models;
mod services;
mod utils;

use crate::clients::batch_api_client::BatchApiClient;
use crate::clients::qdrant_client::QdrantClient;
use crate::config::AppSettings;
use crate::services::backfill_service::BackfillService;
use crate::services::batch_service::NarrativeBatchService;
use crate::services::embedding::create_embedding_provider;
use crate::services::import_service::ImportService;
use crate::services::narrative_service::NarrativeService;
use crate::services::state_store::StateStore;
use crate::services::watcher_service::WatcherService;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings from environment
    let settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings from environment: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };
    log::info!(
        "Starting {} ({})",
        settings.app.name,
        settings.app.environment
    );

    // Embedding provider: explicit selection or first configured key.
    let provider = match create_embedding_provider(&settings.embedding) {
        Ok(provider) => provider,
        Err(e) => {
            log::error!("Failed to initialize embedding provider: {}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "Embedding provider: {} ({}d)",
        provider.provider_name(),
        provider.dimension()
    );

    // Ingestion state, shared by the importer and the narrative worker.
    let state = match StateStore::open(settings.storage.state_file.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            log::error!("Failed to load ingestion state: {}", e);
            std::process::exit(1);
        }
    };

    let qdrant = Arc::new(QdrantClient::new(
        &settings.qdrant.url,
        settings.qdrant.timeout_secs,
    ));

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let import = Arc::new(ImportService::new(
        provider.clone(),
        qdrant.clone(),
        state.clone(),
        settings.import.clone(),
        shutdown_flag.clone(),
    ));
    let watcher = WatcherService::new(
        import,
        state.clone(),
        settings.storage.logs_dir.clone(),
        settings.import.scan_interval_secs,
        settings.import.max_files_per_cycle,
    );

    let watcher_shutdown = shutdown_rx.clone();
    let watcher_handle = tokio::spawn(async move {
        watcher.run(watcher_shutdown).await;
    });

    // The narrative worker only runs with batch API credentials.
    let worker_handle = match settings.embedding.dashscope_api_key.as_deref() {
        Some(key) => {
            let batches = Arc::new(NarrativeBatchService::new(
                BatchApiClient::new(key, &settings.embedding.dashscope_endpoint),
                state.clone(),
                settings.storage.batch_state_dir.clone(),
                settings.storage.batch_files_dir.clone(),
            ));
            let narratives = Arc::new(NarrativeService::new(
                qdrant.clone(),
                provider.clone(),
                state.clone(),
            ));
            let backfill = Arc::new(BackfillService::new(
                batches,
                narratives,
                settings.narrative.poll_interval_secs,
                settings.narrative.newest_first,
            ));

            // Startup cleanup of state entries whose files were deleted.
            let (checked, removed) = state.remove_orphans().await;
            log::info!("Initial cleanup: {}/{} orphaned entries removed", removed, checked);

            let cfg = settings.narrative.clone();
            let worker_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                backfill
                    .run_worker(
                        cfg.batch_size,
                        cfg.min_batch,
                        cfg.model,
                        Duration::from_secs(cfg.check_interval_secs),
                        worker_shutdown,
                    )
                    .await;
            }))
        }
        None => {
            log::info!("No DASHSCOPE_API_KEY configured; narrative worker disabled");
            None
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutdown signal received"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown_flag.store(true, Ordering::SeqCst);
    let _ = shutdown_tx.send(true);

    let _ = watcher_handle.await;
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    log::info!("Shutdown complete");
}
