//! Release routes under `/{clusterNamespace}/{accessKey}/helm/v1`

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use hub_chart::ChartCoordinates;
use hub_common::yaml::parse_values;
use hub_common::{Error, Result};
use hub_release::{AppOverview, Release, ReleaseSpec};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::envelope::{data, Data};
use crate::error::ApiResult;
use crate::server::AppState;

/// Path segments of the release routes
#[derive(Debug, Deserialize)]
pub struct ReleasePath {
    /// Namespace of the stored credential
    pub cluster_namespace: String,
    /// Name of the stored credential
    pub access_key: String,
    /// Namespace of the release on the target cluster
    #[serde(default)]
    pub namespace: String,
    /// Release name
    #[serde(default)]
    pub release_name: String,
}

/// `?statuses=`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Status filter, `all` or absent for every status
    pub statuses: Option<String>,
}

/// `?action=&revision=`
#[derive(Debug, Default, Deserialize)]
pub struct UpdateQuery {
    /// `upgrade` (default) or `rollback`
    pub action: Option<String>,
    /// Revision to roll back to
    pub revision: Option<String>,
}

/// `?keepHistory=`
#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    /// `1` or `true` keeps the release history
    #[serde(rename = "keepHistory")]
    pub keep_history: Option<String>,
}

/// What a PUT on a release does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    /// Install a new chart or values
    Upgrade,
    /// Return to an earlier revision
    Rollback,
}

impl UpdateAction {
    /// Anything but `rollback` upgrades
    pub fn parse(action: Option<&str>) -> Self {
        match action {
            Some("rollback") => UpdateAction::Rollback,
            _ => UpdateAction::Upgrade,
        }
    }
}

/// Parse the mandatory rollback revision
pub fn parse_revision(revision: Option<&str>) -> Result<i64> {
    let raw = revision
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::UnprocessableEntity("Missing revision to rollback in request".to_string()))?;
    raw.trim()
        .parse()
        .map_err(|_| Error::UnprocessableEntity("Could not parse revision".to_string()))
}

fn keep_history(query: &DeleteQuery) -> bool {
    matches!(query.keep_history.as_deref(), Some("1") | Some("true"))
}

/// Resolve the chart named in a create or upgrade body
async fn release_spec(state: &AppState, name: Option<&str>, namespace: &str, body: &[u8]) -> Result<ReleaseSpec> {
    let coordinates = ChartCoordinates::parse(body)?;
    let name = name.unwrap_or(coordinates.release_name.as_str()).to_string();
    if name.is_empty() {
        return Err(Error::bad_request("A release name is required"));
    }
    let values = parse_values(&coordinates.values)?;
    let chart = state.charts.resolve(&coordinates).await?;

    Ok(ReleaseSpec {
        name,
        namespace: namespace.to_string(),
        chart: Arc::new(chart),
        values,
    })
}

/// `GET .../releases`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn list_all(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Data<Vec<AppOverview>>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;
    let apps = state
        .orchestrator
        .list(&actor, None, query.statuses.as_deref())
        .await?;
    Ok(data(apps))
}

/// `GET .../namespaces/{namespace}/releases`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn list(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Data<Vec<AppOverview>>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;
    let apps = state
        .orchestrator
        .list(&actor, Some(&path.namespace), query.statuses.as_deref())
        .await?;
    Ok(data(apps))
}

/// `POST .../namespaces/{namespace}/releases`
#[instrument(skip(state, headers, body), fields(otel.kind = "server"))]
pub async fn create(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<Release>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;
    let spec = release_spec(&state, None, &path.namespace, &body).await?;
    let release = state.orchestrator.create(&actor, &spec).await?;
    info!(release = %release.name, namespace = %path.namespace, "installed release");
    Ok(data(release))
}

/// `GET .../namespaces/{namespace}/releases/{releaseName}`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn get(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    headers: HeaderMap,
) -> ApiResult<Json<Data<Release>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;
    let release = state
        .orchestrator
        .get(&actor, &path.release_name, &path.namespace)
        .await?;
    Ok(data(release))
}

/// `PUT .../namespaces/{namespace}/releases/{releaseName}?action=upgrade|rollback`
#[instrument(skip(state, headers, body), fields(otel.kind = "server"))]
pub async fn update(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    Query(query): Query<UpdateQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Data<Release>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;

    let release = match UpdateAction::parse(query.action.as_deref()) {
        UpdateAction::Rollback => {
            let revision = parse_revision(query.revision.as_deref())?;
            state
                .orchestrator
                .rollback(&actor, &path.release_name, &path.namespace, revision)
                .await?
        }
        UpdateAction::Upgrade => {
            let spec = release_spec(&state, Some(&path.release_name), &path.namespace, &body).await?;
            state.orchestrator.upgrade(&actor, &spec).await?
        }
    };
    Ok(data(release))
}

/// `DELETE .../namespaces/{namespace}/releases/{releaseName}?keepHistory=`
#[instrument(skip(state, headers), fields(otel.kind = "server"))]
pub async fn delete(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
    Query(query): Query<DeleteQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Data<&'static str>>> {
    let actor = state
        .credentials
        .actor(&headers, &path.cluster_namespace, &path.access_key)
        .await?;
    state
        .orchestrator
        .delete(&actor, &path.release_name, &path.namespace, keep_history(&query))
        .await?;
    Ok(data("OK"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_defaults_to_upgrade() {
        assert_eq!(UpdateAction::parse(None), UpdateAction::Upgrade);
        assert_eq!(UpdateAction::parse(Some("upgrade")), UpdateAction::Upgrade);
        assert_eq!(UpdateAction::parse(Some("bogus")), UpdateAction::Upgrade);
        assert_eq!(UpdateAction::parse(Some("rollback")), UpdateAction::Rollback);
    }

    #[test]
    fn revision_is_mandatory() {
        assert_eq!(parse_revision(Some("3")).unwrap(), 3);

        let missing = parse_revision(None).unwrap_err();
        assert_eq!(missing.status_code(), 422);
        assert_eq!(missing.to_string(), "Missing revision to rollback in request");

        let garbage = parse_revision(Some("three")).unwrap_err();
        assert_eq!(garbage.status_code(), 422);
        assert_eq!(garbage.to_string(), "Could not parse revision");
    }

    #[test]
    fn keep_history_accepts_one_and_true() {
        let query = |v: Option<&str>| DeleteQuery {
            keep_history: v.map(str::to_string),
        };
        assert!(keep_history(&query(Some("1"))));
        assert!(keep_history(&query(Some("true"))));
        assert!(!keep_history(&query(Some("yes"))));
        assert!(!keep_history(&query(None)));
    }
}
