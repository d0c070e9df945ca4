//! Gateway HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hub_chart::ChartResolver;
use hub_common::{Error, Result};
use hub_release::ReleaseOrchestrator;
use tracing::info;

use crate::auth::CredentialResolver;
use crate::boms::{self, BomStore};
use crate::proxy::{self, UpstreamClient};
use crate::releases;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM; plain HTTP when absent
    pub cert_pem: Option<String>,
    /// TLS private key PEM
    pub key_pem: Option<String>,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Request credential resolution
    pub credentials: Arc<CredentialResolver>,
    /// HTTP forwarding to clusters
    pub upstream: Arc<dyn UpstreamClient>,
    /// Release lifecycle
    pub orchestrator: Arc<ReleaseOrchestrator>,
    /// Chart lookup for create and upgrade
    pub charts: Arc<ChartResolver>,
    /// ClusterBom access
    pub boms: Arc<dyn BomStore>,
    /// External URL of the gateway, sent as `Origin` on WebSocket dials
    pub host_url: String,
}

/// All gateway routes
pub fn router(state: AppState) -> Router {
    Router::new()
        // Liveness and readiness
        .route("/live", get(|| async { StatusCode::OK }))
        .route("/ready", get(|| async { StatusCode::OK }))
        // Releases
        .route(
            "/{cluster_namespace}/{access_key}/helm/v1/releases",
            get(releases::list_all),
        )
        .route(
            "/{cluster_namespace}/{access_key}/helm/v1/namespaces/{namespace}/releases",
            get(releases::list).post(releases::create),
        )
        .route(
            "/{cluster_namespace}/{access_key}/helm/v1/namespaces/{namespace}/releases/{release_name}",
            get(releases::get)
                .put(releases::update)
                .delete(releases::delete),
        )
        // ClusterBoms
        .route(
            "/{cluster_namespace}/{access_key}/hub/v1/clusterboms",
            get(boms::list),
        )
        .route(
            "/{cluster_namespace}/{access_key}/hub/v1/clusterboms/{bom_name}",
            get(boms::get).put(boms::update),
        )
        // Reverse proxy; the resource cluster mount must win over the catch-all
        .route(
            "/{cluster_namespace}/{access_key}/reverse-proxy/v1/resourcecluster",
            any(proxy::resource_cluster),
        )
        .route(
            "/{cluster_namespace}/{access_key}/reverse-proxy/v1/resourcecluster/{*path}",
            any(proxy::resource_cluster),
        )
        .route(
            "/{cluster_namespace}/{access_key}/reverse-proxy/v1/{*path}",
            any(proxy::target_cluster),
        )
        .with_state(state)
}

/// Serve the gateway until `handle` is told to shut down
pub async fn start_server(config: ServerConfig, state: AppState, handle: Handle) -> Result<()> {
    let app = router(state);

    match (config.cert_pem, config.key_pem) {
        (Some(cert), Some(key)) => {
            let tls_config = RustlsConfig::from_pem(cert.into_bytes(), key.into_bytes())
                .await
                .map_err(|e| Error::internal(format!("TLS config error: {}", e)))?;

            info!(addr = %config.addr, "Starting gateway with TLS");
            axum_server::bind_rustls(config.addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        _ => {
            info!(addr = %config.addr, "Starting gateway");
            axum_server::bind(config.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    }
    .map_err(|e| Error::internal(format!("Server error: {}", e)))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
