//! Collaborator interfaces used by the orchestrator
//!
//! [`Installer`] is the opaque release engine; it reports failures as plain
//! text which only [`hub_common::classify_installer_error`] interprets.
//! [`ClusterOps`] covers the direct API calls the orchestrator and the
//! manifest gate make against the target cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hub_chart::Chart;
use hub_common::{ClusterAccess, Result};
use serde_json::{Map, Value};

use crate::release::{Release, ReleaseStatus};

/// Failure reported by the installer, carrying its raw message
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InstallerError(pub String);

impl InstallerError {
    /// Create an installer error from any message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Result of an installer call
pub type InstallerResult<T> = std::result::Result<T, InstallerError>;

/// Input for install and upgrade
#[derive(Clone, Debug)]
pub struct ReleaseRequest {
    /// Release name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Chart to install
    pub chart: Arc<Chart>,
    /// User values overriding chart defaults
    pub values: Map<String, Value>,
    /// Render against the cluster without applying
    pub dry_run: bool,
}

/// Release engine operating on a cluster described by a [`ClusterAccess`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install a new release
    async fn install(&self, access: &ClusterAccess, request: &ReleaseRequest) -> InstallerResult<Release>;

    /// Upgrade an existing release, keeping at most `max_history` revisions
    async fn upgrade(
        &self,
        access: &ClusterAccess,
        request: &ReleaseRequest,
        max_history: u32,
    ) -> InstallerResult<Release>;

    /// Roll a release back to `revision`
    async fn rollback(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
        revision: i64,
        max_history: u32,
    ) -> InstallerResult<()>;

    /// Uninstall a release
    async fn uninstall(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
        keep_history: bool,
    ) -> InstallerResult<()>;

    /// Current revision of a release
    async fn get(&self, access: &ClusterAccess, name: &str, namespace: &str) -> InstallerResult<Release>;

    /// Latest revision of at most `max` releases in any status.
    ///
    /// An empty `namespace` lists all namespaces.
    async fn list(&self, access: &ClusterAccess, namespace: &str, max: usize) -> InstallerResult<Vec<Release>>;

    /// Status summary of a release
    async fn status(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
    ) -> InstallerResult<ReleaseStatus>;
}

/// Group/version/kind of a manifest document
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// `apiVersion`, e.g. `apps/v1`
    pub api_version: String,
    /// `kind`, e.g. `Deployment`
    pub kind: String,
}

/// How the API server names and scopes a kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    /// API group, empty for core
    pub group: String,
    /// Plural resource name
    pub plural: String,
    /// Whether objects live in a namespace
    pub namespaced: bool,
}

/// A single permission question
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccessCheck {
    /// API group, empty for core
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace, `None` for cluster scope
    pub namespace: Option<String>,
    /// Verb, e.g. `create`
    pub verb: String,
}

/// Direct API operations against a target cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, access: &ClusterAccess, namespace: &str) -> Result<()>;

    /// Resolve plural names and scope for each kind, in input order
    async fn resolve_resources(
        &self,
        access: &ClusterAccess,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceInfo>>;

    /// Ask the API server whether the actor may perform each check, in input order
    async fn can_i(&self, access: &ClusterAccess, checks: &[AccessCheck]) -> Result<Vec<bool>>;

    /// Create or replace a secret
    async fn upsert_secret(
        &self,
        access: &ClusterAccess,
        namespace: &str,
        name: &str,
        type_: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()>;

    /// Delete a secret; a missing secret is not an error
    async fn delete_secret(&self, access: &ClusterAccess, namespace: &str, name: &str) -> Result<()>;
}
