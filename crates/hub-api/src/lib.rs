//! HTTP surface of the hub gateway
//!
//! Serves release operations, ClusterBom access and a reverse proxy to
//! cluster API servers. Every route below `/{clusterNamespace}/{accessKey}`
//! resolves the caller's credential first.
//!
//! ```text
//! client ──► gateway ──► CredentialResolver ──┬──► ReleaseOrchestrator ──► installer
//!                                             ├──► ClusterBoms (resource cluster)
//!                                             └──► reverse proxy ──► cluster API
//! ```
//!
//! # Endpoints
//!
//! - `GET .../helm/v1/releases`
//! - `GET|POST .../helm/v1/namespaces/{namespace}/releases`
//! - `GET|PUT|DELETE .../helm/v1/namespaces/{namespace}/releases/{releaseName}`
//! - `GET .../hub/v1/clusterboms`, `GET|PUT .../hub/v1/clusterboms/{name}`
//! - `* .../reverse-proxy/v1/resourcecluster/*`, `* .../reverse-proxy/v1/*`
//! - `GET /live`, `GET /ready`

#![deny(missing_docs)]

pub mod auth;
pub mod boms;
pub mod envelope;
pub mod error;
pub mod proxy;
pub mod releases;
pub mod routing;
pub mod server;

pub use auth::{CredentialResolver, CredentialStore, KubeCredentialStore};
pub use boms::{BomStore, ClusterBom, KubeBomStore};
pub use error::{ApiError, ApiResult};
pub use proxy::{ReqwestUpstream, UpstreamClient};
pub use server::{router, start_server, AppState, ServerConfig};
