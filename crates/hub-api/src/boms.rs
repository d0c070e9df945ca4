//! ClusterBom routes under `/{clusterNamespace}/{accessKey}/hub/v1`
//!
//! ClusterBoms live on the resource cluster in the namespace of the stored
//! credential and are read with the caller's own token. A BOM belongs to the
//! cluster named by its `spec.secretRef`; BOMs of other clusters are
//! reported as missing.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use hub_common::{ClusterAccess, Error, Result};
use kube::api::{ListParams, PostParams};
use kube::{Api, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::ApiResult;
use crate::server::AppState;

/// Label naming the cluster a BOM deploys to
pub const CLUSTER_NAME_LABEL: &str = "hub.k8s.sap.com/cluster-name";

/// Automatic deletion of a BOM
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoDelete {
    /// Age in minutes after which an empty BOM is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_bom_age: Option<i64>,
}

/// Spec of a `ClusterBom`
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hub.k8s.sap.com",
    version = "v1",
    kind = "ClusterBom",
    plural = "clusterboms",
    namespaced,
    status = "ClusterBomStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBomSpec {
    /// Name of the stored credential of the target cluster
    #[serde(default)]
    pub secret_ref: String,
    /// Applications to deploy, passed through untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_configs: Vec<Value>,
    /// Automatic deletion settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<AutoDelete>,
}

/// Status of a `ClusterBom` as reported by its controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBomStatus {
    /// Per-application states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_states: Vec<Value>,
    /// Aggregated state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_state: Option<String>,
    /// Time of the last aggregated state change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_time: Option<String>,
    /// Human readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Value>,
    /// Generation the status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Number of deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_num_of_deployments: Option<i64>,
    /// Number of ready deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_num_of_ready_deployments: Option<i64>,
    /// Progress in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_progress: Option<i64>,
}

/// Access to ClusterBoms on the resource cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BomStore: Send + Sync {
    /// BOMs in `namespace` labelled for cluster `key`
    async fn list(&self, reader: &ClusterAccess, namespace: &str, key: &str) -> Result<Vec<ClusterBom>>;

    /// One BOM by name
    async fn get(&self, reader: &ClusterAccess, namespace: &str, name: &str) -> Result<ClusterBom>;

    /// Replace a BOM, returning the stored object
    async fn replace(&self, reader: &ClusterAccess, namespace: &str, bom: ClusterBom) -> Result<ClusterBom>;
}

/// [`BomStore`] backed by the kube API
#[derive(Clone, Default)]
pub struct KubeBomStore;

impl KubeBomStore {
    async fn api(reader: &ClusterAccess, namespace: &str) -> Result<Api<ClusterBom>> {
        Ok(Api::namespaced(reader.client().await?, namespace))
    }
}

#[async_trait]
impl BomStore for KubeBomStore {
    async fn list(&self, reader: &ClusterAccess, namespace: &str, key: &str) -> Result<Vec<ClusterBom>> {
        let selector = format!("{}={}", CLUSTER_NAME_LABEL, key);
        let boms = Self::api(reader, namespace)
            .await?
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(boms.items)
    }

    async fn get(&self, reader: &ClusterAccess, namespace: &str, name: &str) -> Result<ClusterBom> {
        Ok(Self::api(reader, namespace).await?.get(name).await?)
    }

    async fn replace(&self, reader: &ClusterAccess, namespace: &str, bom: ClusterBom) -> Result<ClusterBom> {
        let name = bom.name_any();
        Ok(Self::api(reader, namespace)
            .await?
            .replace(&name, &PostParams::default(), &bom)
            .await?)
    }
}

/// `{clusterNamespace}`, `{accessKey}` and optionally `{bomName}`
#[derive(Debug, Deserialize)]
pub struct BomPath {
    /// Namespace holding the BOMs
    pub cluster_namespace: String,
    /// Stored credential the BOMs must reference
    pub access_key: String,
    /// BOM name
    #[serde(default)]
    pub bom_name: String,
}

fn reader(state: &AppState, headers: &HeaderMap) -> Result<ClusterAccess> {
    state
        .credentials
        .bearer(headers, false)
        .map_err(|e| Error::Unauthorized(e.to_string()))
}

fn owned_by(bom: ClusterBom, key: &str) -> Result<ClusterBom> {
    if bom.spec.secret_ref == key {
        Ok(bom)
    } else {
        Err(Error::not_found(format!(
            "bom {} not found for cluster {}",
            bom.name_any(),
            key
        )))
    }
}

/// `GET .../clusterboms`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn list(
    State(state): State<AppState>,
    Path(path): Path<BomPath>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let reader = reader(&state, &headers)?;
    let items = state
        .boms
        .list(&reader, &path.cluster_namespace, &path.access_key)
        .await?;
    debug!(count = items.len(), "listed cluster boms");

    Ok(Json(serde_json::json!({
        "apiVersion": "hub.k8s.sap.com/v1",
        "kind": "ClusterBomList",
        "metadata": {},
        "items": items,
    })))
}

/// `GET .../clusterboms/{bomName}`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn get(
    State(state): State<AppState>,
    Path(path): Path<BomPath>,
    headers: HeaderMap,
) -> ApiResult<Json<ClusterBom>> {
    let reader = reader(&state, &headers)?;
    let bom = state
        .boms
        .get(&reader, &path.cluster_namespace, &path.bom_name)
        .await?;
    Ok(Json(owned_by(bom, &path.access_key)?))
}

/// `PUT .../clusterboms/{bomName}`
#[instrument(skip(state, headers, body), fields(otel.kind = "server"))]
pub async fn update(
    State(state): State<AppState>,
    Path(path): Path<BomPath>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ClusterBom>> {
    let bom: ClusterBom = serde_json::from_slice(&body)
        .map_err(|e| Error::bad_request(format!("Unable to parse ClusterBom: {}", e)))?;
    if bom.name_any() != path.bom_name {
        return Err(Error::bad_request("BoM name in url and body don't match. Please fix this and try again").into());
    }

    let reader = reader(&state, &headers)?;
    let current = state
        .boms
        .get(&reader, &path.cluster_namespace, &path.bom_name)
        .await?;
    owned_by(current, &path.access_key)?;
    let bom = owned_by(bom, &path.access_key)?;

    let stored = state
        .boms
        .replace(&reader, &path.cluster_namespace, bom)
        .await?;
    Ok(Json(stored))
}
