//! In-memory installer and cluster for tests
//!
//! [`FakeInstaller`] keeps release history the way the real installer does:
//! names are unique per namespace, upgrades and rollbacks add revisions and
//! uninstalling with history keeps the release as `uninstalled`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use hub_common::kube_utils::{is_cluster_scoped_kind, parse_api_version, pluralize_kind};
use hub_common::{ClusterAccess, Result};
use tokio::sync::Mutex;

use crate::installer::{
    AccessCheck, ClusterOps, Installer, InstallerError, InstallerResult, ReleaseRequest, ResourceInfo,
    ResourceKind,
};
use crate::release::{
    Release, ReleaseChart, ReleaseInfo, ReleaseStatus, STATUS_DEPLOYED, STATUS_UNINSTALLED,
};

/// Render the manifest a fake release carries: one ConfigMap named after it
pub fn fake_manifest(chart: &str, release: &str) -> String {
    format!(
        "\n---\n# Source: {chart}/templates/configmap.yaml\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {release}\n"
    )
}

/// Installer keeping every revision in memory
#[derive(Debug, Default)]
pub struct FakeInstaller {
    revisions: Mutex<Vec<Release>>,
}

impl FakeInstaller {
    /// Create an installer with no releases
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a revision as if it had been installed earlier
    pub async fn seed(&self, release: Release) {
        self.revisions.lock().await.push(release);
    }

    /// Every stored revision
    pub async fn revisions(&self) -> Vec<Release> {
        self.revisions.lock().await.clone()
    }

    fn render(request: &ReleaseRequest, version: i64, description: &str) -> Release {
        let metadata = request.chart.metadata.clone();
        Release {
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            version,
            info: ReleaseInfo {
                description: description.to_string(),
                status: STATUS_DEPLOYED.to_string(),
                ..Default::default()
            },
            manifest: fake_manifest(&metadata.name, &request.name),
            chart: Some(ReleaseChart {
                metadata,
                values: request.chart.values.clone(),
            }),
            config: request.values.clone(),
        }
    }
}

fn latest<'a>(revisions: &'a [Release], name: &str, namespace: &str) -> Option<&'a Release> {
    revisions
        .iter()
        .filter(|r| r.name == name && r.namespace == namespace)
        .max_by_key(|r| r.version)
}

fn release_not_found() -> InstallerError {
    InstallerError::new("release: not found")
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(&self, _access: &ClusterAccess, request: &ReleaseRequest) -> InstallerResult<Release> {
        let mut revisions = self.revisions.lock().await;
        if latest(&revisions, &request.name, &request.namespace).is_some() {
            return Err(InstallerError::new(
                "INSTALLATION FAILED: cannot re-use a name that is still in use",
            ));
        }
        let release = Self::render(request, 1, "Install complete");
        if !request.dry_run {
            revisions.push(release.clone());
        }
        Ok(release)
    }

    async fn upgrade(
        &self,
        _access: &ClusterAccess,
        request: &ReleaseRequest,
        _max_history: u32,
    ) -> InstallerResult<Release> {
        let mut revisions = self.revisions.lock().await;
        let current = latest(&revisions, &request.name, &request.namespace)
            .filter(|r| r.info.status != STATUS_UNINSTALLED)
            .map(|r| r.version)
            .ok_or_else(|| {
                InstallerError::new(format!("UPGRADE FAILED: {:?} has no deployed releases", request.name))
            })?;

        let release = Self::render(request, current + 1, "Upgrade complete");
        if !request.dry_run {
            for r in revisions
                .iter_mut()
                .filter(|r| r.name == request.name && r.namespace == request.namespace)
            {
                r.info.status = "superseded".to_string();
            }
            revisions.push(release.clone());
        }
        Ok(release)
    }

    async fn rollback(
        &self,
        _access: &ClusterAccess,
        name: &str,
        namespace: &str,
        revision: i64,
        _max_history: u32,
    ) -> InstallerResult<()> {
        let mut revisions = self.revisions.lock().await;
        let next = latest(&revisions, name, namespace)
            .map(|r| r.version + 1)
            .ok_or_else(release_not_found)?;
        let mut target = revisions
            .iter()
            .find(|r| r.name == name && r.namespace == namespace && r.version == revision)
            .cloned()
            .ok_or_else(release_not_found)?;

        for r in revisions
            .iter_mut()
            .filter(|r| r.name == name && r.namespace == namespace)
        {
            r.info.status = "superseded".to_string();
        }
        target.version = next;
        target.info.status = STATUS_DEPLOYED.to_string();
        target.info.description = format!("Rollback to {}", revision);
        revisions.push(target);
        Ok(())
    }

    async fn uninstall(
        &self,
        _access: &ClusterAccess,
        name: &str,
        namespace: &str,
        keep_history: bool,
    ) -> InstallerResult<()> {
        let mut revisions = self.revisions.lock().await;
        let version = latest(&revisions, name, namespace)
            .map(|r| r.version)
            .ok_or_else(|| InstallerError::new(format!("uninstall: Release not loaded: {}: release: not found", name)))?;

        if keep_history {
            if let Some(r) = revisions
                .iter_mut()
                .find(|r| r.name == name && r.namespace == namespace && r.version == version)
            {
                r.info.status = STATUS_UNINSTALLED.to_string();
                r.info.description = "Uninstallation complete".to_string();
            }
        } else {
            revisions.retain(|r| !(r.name == name && r.namespace == namespace));
        }
        Ok(())
    }

    async fn get(&self, _access: &ClusterAccess, name: &str, namespace: &str) -> InstallerResult<Release> {
        let revisions = self.revisions.lock().await;
        latest(&revisions, name, namespace)
            .cloned()
            .ok_or_else(release_not_found)
    }

    async fn list(&self, _access: &ClusterAccess, namespace: &str, max: usize) -> InstallerResult<Vec<Release>> {
        let revisions = self.revisions.lock().await;
        let mut names = BTreeSet::new();
        Ok(revisions
            .iter()
            .filter(|r| namespace.is_empty() || r.namespace == namespace)
            .filter(|r| {
                let key = (r.namespace.as_str(), r.name.as_str());
                names.contains(&key) || (names.len() < max && names.insert(key))
            })
            .cloned()
            .collect())
    }

    async fn status(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
    ) -> InstallerResult<ReleaseStatus> {
        self.get(access, name, namespace)
            .await
            .map(|r| ReleaseStatus::from(&r))
    }
}

/// Cluster that allows everything except explicitly denied resource/verb pairs
#[derive(Debug, Default)]
pub struct FakeCluster {
    namespaces: Mutex<BTreeSet<String>>,
    secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
    denied: Mutex<BTreeSet<(String, String)>>,
}

impl FakeCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny `verb` on the plural `resource` in every namespace
    pub async fn deny(&self, resource: &str, verb: &str) {
        self.denied
            .lock()
            .await
            .insert((resource.to_string(), verb.to_string()));
    }

    /// Namespaces created so far
    pub async fn namespaces(&self) -> BTreeSet<String> {
        self.namespaces.lock().await.clone()
    }

    /// Data of a stored secret
    pub async fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.secrets
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn ensure_namespace(&self, _access: &ClusterAccess, namespace: &str) -> Result<()> {
        self.namespaces.lock().await.insert(namespace.to_string());
        Ok(())
    }

    async fn resolve_resources(
        &self,
        _access: &ClusterAccess,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceInfo>> {
        Ok(kinds
            .iter()
            .map(|k| ResourceInfo {
                group: parse_api_version(&k.api_version).0,
                plural: pluralize_kind(&k.kind),
                namespaced: !is_cluster_scoped_kind(&k.kind),
            })
            .collect())
    }

    async fn can_i(&self, _access: &ClusterAccess, checks: &[AccessCheck]) -> Result<Vec<bool>> {
        let denied = self.denied.lock().await;
        Ok(checks
            .iter()
            .map(|c| !denied.contains(&(c.resource.clone(), c.verb.clone())))
            .collect())
    }

    async fn upsert_secret(
        &self,
        _access: &ClusterAccess,
        namespace: &str,
        name: &str,
        _type_: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.secrets
            .lock()
            .await
            .insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn delete_secret(&self, _access: &ClusterAccess, namespace: &str, name: &str) -> Result<()> {
        self.secrets
            .lock()
            .await
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
