//! JSON HTTP API on warp.
//!
//! `/auth/*` handles sign-up, login, Google sign-in and password resets;
//! `/api/v1/*` is the bearer-protected parcel and storage API; `/uploads/*`
//! serves files written by the local storage provider.

pub mod auth_routes;
pub mod filters;
pub mod multipart;
pub mod parcel_routes;
pub mod response;

use crate::auth::{CredentialService, GoogleOAuth, RateLimits};
use crate::config::UploadsConfig;
use crate::logging::log_info;
use crate::parcels::ParcelIntakeService;
use filters::with_state;
use response::handle_rejection;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Reply};

pub use response::{reject, ApiRejection, Pagination};

/// Everything the handlers need, cloned into each request
#[derive(Clone)]
pub struct AppState {
    pub parcels: ParcelIntakeService,
    pub credentials: CredentialService,
    pub google: Option<Arc<GoogleOAuth>>,
    pub rate_limits: Arc<RateLimits>,
    pub uploads: Arc<UploadsConfig>,
    /// Directory served under `/uploads`
    pub uploads_dir: PathBuf,
    pub cors_origin: String,
}

fn health(state: AppState) -> BoxedFilter<(Response,)> {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .map(|state: AppState| {
            response::ok(&json!({
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "defaultProvider": state.parcels.storage().default_provider_name(),
                "googleSignIn": state.google.is_some(),
            }))
        })
        .boxed()
}

fn uploads(state: &AppState) -> BoxedFilter<(Response,)> {
    warp::path("uploads")
        .and(warp::get())
        .and(warp::fs::dir(state.uploads_dir.clone()))
        .map(|file: warp::fs::File| file.into_response())
        .boxed()
}

fn cors(origin: &str) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type", "x-requested-with"]);
    if origin == "*" {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(origin.split(',').map(str::trim).filter(|o| !o.is_empty()))
    }
}

/// The full route tree with CORS, request logging and JSON rejections
pub fn routes(state: AppState) -> BoxedFilter<(impl Reply,)> {
    let access_log = warp::log::custom(|info| {
        tracing::info!(
            method = %info.method(),
            path = info.path(),
            status = info.status().as_u16(),
            elapsed_ms = info.elapsed().as_millis() as u64,
            "request"
        );
    });

    health(state.clone())
        .or(auth_routes::routes(state.clone()))
        .unify()
        .or(parcel_routes::routes(state.clone()))
        .unify()
        .or(parcel_routes::storage_routes(state.clone()))
        .unify()
        .or(uploads(&state))
        .unify()
        .recover(handle_rejection)
        .unify()
        .with(cors(&state.cors_origin))
        .with(access_log)
        .boxed()
}

/// Bind the API and run it until `shutdown` resolves
pub fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tracing::info!(address = %addr, "Starting HTTP server");

    let (bound, server) = warp::serve(routes(state)).bind_with_graceful_shutdown(addr, shutdown);
    let handle = tokio::spawn(server);

    tracing::info!(address = %bound, "HTTP server started");
    log_info("http", &format!("Listening on {}", bound)).unwrap_or_default();
    handle
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::CredentialStore;
    use crate::config::{AuthConfig, RateLimitConfig};
    use crate::events::EventBus;
    use crate::ocr::OcrService;
    use crate::parcels::ParcelStore;
    use crate::storage::{LocalProvider, StorageRegistry, UploadLimits};
    use std::path::Path;

    pub const JWT_SECRET: &str = "test-secret-at-least-16-chars";

    pub fn state(uploads_dir: &Path) -> AppState {
        let uploads = UploadsConfig::default();
        let mut registry =
            StorageRegistry::new("local").with_limits(UploadLimits::from(&uploads));
        registry.register(Arc::new(LocalProvider::new(
            uploads_dir,
            "http://localhost:3000/uploads",
        )));

        let parcels = ParcelIntakeService::new(
            ParcelStore::open_in_memory().unwrap(),
            Arc::new(registry),
            Arc::new(OcrService::new()),
            EventBus::default(),
            uploads.max_parcel_images,
        );
        let auth = AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            ..AuthConfig::default()
        };
        let credentials =
            CredentialService::new(CredentialStore::open_in_memory().unwrap(), &auth).unwrap();

        AppState {
            parcels,
            credentials,
            google: None,
            rate_limits: Arc::new(RateLimits::from_config(&RateLimitConfig::default())),
            uploads: Arc::new(uploads),
            uploads_dir: uploads_dir.to_path_buf(),
            cors_origin: "*".to_string(),
        }
    }
}
