use anyhow::{anyhow, Context};
use parcel_intake::auth::{CredentialService, CredentialStore, GoogleOAuth, RateLimits};
use parcel_intake::config::IntakeConfig;
use parcel_intake::events::{EventBus, OcrWorker};
use parcel_intake::http::{self, AppState};
use parcel_intake::ocr::OcrService;
use parcel_intake::parcels::{ParcelIntakeService, ParcelStore};
use parcel_intake::shutdown::ShutdownCoordinator;
use parcel_intake::storage::{StorageRegistry, UploadLimits};
use parcel_intake::{database, logging};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IntakeConfig::load().context("Failed to load configuration")?;

    let logs_dir = config.logs_dir()?;
    logging::init_logging(&logs_dir, &config.server.log_level)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let db_path = config.database_path()?;
    let conn = database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "Database ready");

    let registry =
        StorageRegistry::from_config(&config.storage, UploadLimits::from(&config.uploads));
    if !registry.is_provider_configured(registry.default_provider_name()) {
        tracing::warn!(
            provider = registry.default_provider_name(),
            "Default storage provider is not configured; uploads without a provider override will fail"
        );
    }
    tracing::info!(
        default = registry.default_provider_name(),
        configured = ?registry.configured_providers(),
        "Storage providers registered"
    );

    let uploads_dir = config.storage.local.root.clone();
    std::fs::create_dir_all(&uploads_dir)
        .with_context(|| format!("Failed to create {}", uploads_dir.display()))?;

    let shutdown = ShutdownCoordinator::new();
    let event_bus = EventBus::default();
    let ocr = Arc::new(OcrService::new());
    let parcel_store = ParcelStore::new(conn.clone())?;

    let worker = OcrWorker::new(
        event_bus.clone(),
        parcel_store.clone(),
        ocr.clone(),
        shutdown.clone(),
    )
    .start();

    let parcels = ParcelIntakeService::new(
        parcel_store,
        Arc::new(registry),
        ocr,
        event_bus,
        config.uploads.max_parcel_images,
    );
    let credentials = CredentialService::new(CredentialStore::new(conn)?, &config.auth)?;

    let google = GoogleOAuth::from_config(&config.google, config.google_callback_url()).map(Arc::new);
    if google.is_none() {
        tracing::info!("Google sign-in disabled (no client credentials)");
    }

    let state = AppState {
        parcels,
        credentials,
        google,
        rate_limits: Arc::new(RateLimits::from_config(&config.rate_limit)),
        uploads: Arc::new(config.uploads.clone()),
        uploads_dir,
        cors_origin: config.server.cors_origin.clone(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let server = http::serve(state, addr, shutdown.signalled());

    shutdown.wait_for_signal().await;

    if let Err(e) = server.await {
        tracing::error!(error = %e, "HTTP server task failed");
    }
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "OCR worker task failed");
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}
