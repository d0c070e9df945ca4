//! Reverse proxy to cluster API servers
//!
//! Two mounts share one forwarding path:
//! - `/{ns}/{key}/reverse-proxy/v1/resourcecluster/...` reaches the resource
//!   cluster as the caller
//! - `/{ns}/{key}/reverse-proxy/v1/...` reaches the target cluster with the
//!   credential stored for `{ns}/{key}`
//!
//! The mount prefix is stripped exactly, the caller's credential is replaced
//! by the resolved one, and the outbound TLS trust store holds only the
//! resolved CA. `watch=true` selects the WebSocket relay.

pub mod http;
pub mod websocket;

use axum::extract::{FromRequestParts, Path, Request, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use hub_common::{ClusterAccess, Error};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::auth::WS_SUBPROTOCOL;
use crate::error::ApiResult;
use crate::routing::{resource_cluster_prefix, reverse_proxy_prefix, upstream_path};
use crate::server::AppState;

pub use self::http::{ReqwestUpstream, UpstreamClient, UpstreamRequest, UpstreamResponse};

#[cfg(test)]
pub use self::http::MockUpstreamClient;

/// `{clusterNamespace}` and `{accessKey}` path segments
#[derive(Debug, Deserialize)]
pub struct ClusterParams {
    /// Namespace of the stored credential on the resource cluster
    pub cluster_namespace: String,
    /// Name of the stored credential
    pub access_key: String,
}

/// Whether the query asks for a watch, which is served over WebSocket
pub fn is_watch(query: Option<&str>) -> bool {
    query.is_some_and(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, v)| k == "watch" && v == "true"))
}

/// Forward to the resource cluster with the caller's own token
#[instrument(skip(state, request), fields(otel.kind = "server"))]
pub async fn resource_cluster(
    State(state): State<AppState>,
    Path(params): Path<ClusterParams>,
    request: Request,
) -> ApiResult<Response> {
    let prefix = resource_cluster_prefix(&params.cluster_namespace, &params.access_key)?;
    let websocket = is_watch(request.uri().query());
    let access = state.credentials.bearer(request.headers(), websocket)?;
    forward(&state, access, &prefix, request, websocket).await
}

/// Forward to the target cluster with its stored credential
#[instrument(skip(state, request), fields(otel.kind = "server"))]
pub async fn target_cluster(
    State(state): State<AppState>,
    Path(params): Path<ClusterParams>,
    request: Request,
) -> ApiResult<Response> {
    let prefix = reverse_proxy_prefix(&params.cluster_namespace, &params.access_key)?;
    let websocket = is_watch(request.uri().query());
    let access = state
        .credentials
        .stored(
            request.headers(),
            &params.cluster_namespace,
            &params.access_key,
            websocket,
        )
        .await?;
    forward(&state, access, &prefix, request, websocket).await
}

async fn forward(
    state: &AppState,
    access: ClusterAccess,
    prefix: &str,
    request: Request,
    websocket: bool,
) -> ApiResult<Response> {
    let (mut parts, body) = request.into_parts();
    let path = upstream_path(parts.uri.path(), prefix)
        .ok_or_else(|| Error::not_found(format!("no route for {}", parts.uri.path())))?;
    let url = http::upstream_url(&access.endpoint.server, &path, parts.uri.query());

    if websocket {
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        let headers = websocket::dial_headers(&parts.headers, &access, &state.host_url)?;
        let upstream = websocket::dial(&access.endpoint, &url, headers).await?;
        info!(path = %path, "relaying websocket");
        return Ok(upgrade
            .protocols([WS_SUBPROTOCOL])
            .on_upgrade(move |socket| websocket::relay(socket, upstream)));
    }

    let body = axum::body::to_bytes(body, http::MAX_BODY_SIZE)
        .await
        .map_err(|e| Error::bad_request(format!("Failed to read request body: {}", e)))?;
    let response = state
        .upstream
        .send(
            &access.endpoint,
            UpstreamRequest {
                method: parts.method,
                url,
                headers: http::forward_headers(&parts.headers, &access)?,
                body,
            },
        )
        .await?;
    Ok(http::into_response(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_requires_true() {
        assert!(is_watch(Some("watch=true")));
        assert!(is_watch(Some("labelSelector=a%3Db&watch=true")));
        assert!(!is_watch(Some("watch=false")));
        assert!(!is_watch(Some("watcher=true")));
        assert!(!is_watch(None));
    }
}
