//! Release lifecycle
//!
//! Every operation on a release name runs under that name's lock from
//! [`ReleaseLocks`]: the existence check, the authorization gate, the
//! installer call and the pull secret bookkeeping all happen while the
//! guard is held, so two requests for the same name never interleave.
//!
//! ```text
//! Absent ──create──► Present ──upgrade/rollback──► Present
//!                       │
//!                       └──delete──► Absent (or uninstalled with history)
//! ```

use std::sync::Arc;

use hub_chart::Chart;
use hub_common::yaml::merge_values;
use hub_common::{classify_installer_error, ClusterAccess, Error, Result};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::gate::ManifestAuthGate;
use crate::installer::{ClusterOps, Installer, ReleaseRequest};
use crate::lock::ReleaseLocks;
use crate::pull_secret::{PullSecretPolicy, PULL_SECRET_NAME, PULL_SECRET_TYPE};
use crate::release::{latest_revisions, status_matches, AppOverview, Release};

/// Revisions kept per release on upgrade and rollback
pub const MAX_HISTORY: u32 = 10;

/// Releases returned by a list call unless configured otherwise
pub const DEFAULT_LIST_MAX: usize = 256;

/// The identity an operation runs as
#[derive(Clone, Debug)]
pub struct Actor {
    /// Cluster and credential the installer and the gate use
    pub access: ClusterAccess,
    /// Whether manifest authorization applies to this actor
    pub gated: bool,
}

impl Actor {
    /// An actor whose manifests are authorized before any change
    pub fn gated(access: ClusterAccess) -> Self {
        Self { access, gated: true }
    }

    /// An actor trusted to act without manifest authorization
    pub fn trusted(access: ClusterAccess) -> Self {
        Self {
            access,
            gated: false,
        }
    }
}

/// Chart and values for create and upgrade
#[derive(Clone, Debug)]
pub struct ReleaseSpec {
    /// Release name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Resolved chart
    pub chart: Arc<Chart>,
    /// User values
    pub values: Map<String, Value>,
}

impl ReleaseSpec {
    fn request(&self, dry_run: bool) -> ReleaseRequest {
        ReleaseRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            chart: Arc::clone(&self.chart),
            values: self.values.clone(),
            dry_run,
        }
    }

    /// Chart defaults overlaid with user values
    fn merged_values(&self) -> Map<String, Value> {
        let mut merged = self.chart.values.clone();
        merge_values(&mut merged, &self.values);
        merged
    }
}

/// Drives create, upgrade, rollback, delete, get and list
pub struct ReleaseOrchestrator {
    installer: Arc<dyn Installer>,
    cluster: Arc<dyn ClusterOps>,
    gate: ManifestAuthGate,
    locks: Arc<ReleaseLocks>,
    pull_secret: Option<PullSecretPolicy>,
    list_max: usize,
}

fn not_found(name: &str, namespace: &str) -> Error {
    Error::not_found(format!("Release {:?} not found in namespace {:?}", name, namespace))
}

fn mutation_error(context: &str) -> impl Fn(crate::installer::InstallerError) -> Error + '_ {
    move |e| classify_installer_error(format!("{}: {}", context, e), Error::UnprocessableEntity)
}

fn read_error(context: &str) -> impl Fn(crate::installer::InstallerError) -> Error + '_ {
    move |e| classify_installer_error(format!("{}: {}", context, e), Error::Internal)
}

impl ReleaseOrchestrator {
    /// Create an orchestrator.
    ///
    /// `locks` is shared with every other orchestrator of the process.
    /// `auth_enabled = false` turns the manifest gate off for all actors.
    pub fn new(
        installer: Arc<dyn Installer>,
        cluster: Arc<dyn ClusterOps>,
        locks: Arc<ReleaseLocks>,
        auth_enabled: bool,
    ) -> Self {
        Self {
            installer,
            gate: ManifestAuthGate::new(Arc::clone(&cluster), auth_enabled),
            cluster,
            locks,
            pull_secret: None,
            list_max: DEFAULT_LIST_MAX,
        }
    }

    /// Maintain the shared pull secret for releases that request it
    pub fn with_pull_secret(mut self, policy: Option<PullSecretPolicy>) -> Self {
        self.pull_secret = policy;
        self
    }

    /// Cap the number of releases a list returns
    pub fn with_list_max(mut self, list_max: usize) -> Self {
        self.list_max = list_max;
        self
    }

    fn gated(&self, actor: &Actor) -> bool {
        actor.gated && self.gate.enabled()
    }

    /// Current revision of `name` in `namespace`, `None` when absent
    async fn existing(&self, actor: &Actor, name: &str, namespace: &str) -> Result<Option<Release>> {
        match self.installer.get(&actor.access, name, namespace).await {
            Ok(release) if release.namespace.is_empty() || release.namespace == namespace => {
                Ok(Some(release))
            }
            Ok(_) => Ok(None),
            Err(e) => match classify_installer_error(e.0, Error::Internal) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn require(&self, actor: &Actor, name: &str, namespace: &str) -> Result<Release> {
        self.existing(actor, name, namespace)
            .await?
            .ok_or_else(|| not_found(name, namespace))
    }

    async fn authorize(&self, actor: &Actor, namespace: &str, action: &str, manifest: &str) -> Result<()> {
        if !self.gated(actor) {
            return Ok(());
        }
        self.gate
            .authorize(&actor.access, namespace, action, manifest.trim_start_matches('\n'))
            .await
    }

    /// Log the status of a release after a mutation; failures are only logged
    pub async fn log_status(&self, actor: &Actor, name: &str, namespace: &str) {
        match self.installer.status(&actor.access, name, namespace).await {
            Ok(status) => info!(
                release = %name,
                namespace = %namespace,
                status = %status.status,
                revision = status.revision,
                description = %status.description,
                "release status"
            ),
            Err(e) => warn!(release = %name, namespace = %namespace, error = %e, "unable to fetch release status"),
        }
    }

    /// Install a new release.
    ///
    /// Fails with Conflict when the name is already taken in the namespace,
    /// without calling the installer's install.
    pub async fn create(&self, actor: &Actor, spec: &ReleaseSpec) -> Result<Release> {
        let _guard = self.locks.acquire(&spec.name).await;
        info!(release = %spec.name, namespace = %spec.namespace, "installing release");

        if self.existing(actor, &spec.name, &spec.namespace).await?.is_some() {
            return Err(Error::Conflict(format!(
                "Unable to create the release: cannot re-use a name that is still in use: {:?} already exists in namespace {:?}",
                spec.name, spec.namespace
            )));
        }

        self.cluster
            .ensure_namespace(&actor.access, &spec.namespace)
            .await?;

        if self.gated(actor) {
            let rendered = self
                .installer
                .install(&actor.access, &spec.request(true))
                .await
                .map_err(mutation_error("Could not run install dry run"))?;
            self.authorize(actor, &spec.namespace, "create", &rendered.manifest)
                .await?;
        }

        let release = self
            .installer
            .install(&actor.access, &spec.request(false))
            .await
            .map_err(mutation_error("Unable to create the release"))?;

        if let Some(policy) = &self.pull_secret {
            if PullSecretPolicy::requested_by(&spec.merged_values()) {
                self.cluster
                    .upsert_secret(
                        &actor.access,
                        &spec.namespace,
                        PULL_SECRET_NAME,
                        PULL_SECRET_TYPE,
                        policy.secret_data(),
                    )
                    .await
                    .map_err(|e| Error::internal(format!("Unable to create image pull secret: {}", e)))?;
                debug!(namespace = %spec.namespace, "image pull secret written");
            }
        }

        self.log_status(actor, &spec.name, &spec.namespace).await;
        info!(release = %spec.name, namespace = %spec.namespace, "release installed");
        Ok(release)
    }

    /// Upgrade an existing release to a new chart and values
    pub async fn upgrade(&self, actor: &Actor, spec: &ReleaseSpec) -> Result<Release> {
        let _guard = self.locks.acquire(&spec.name).await;
        self.require(actor, &spec.name, &spec.namespace).await?;
        info!(release = %spec.name, namespace = %spec.namespace, "upgrading release");

        if self.gated(actor) {
            let rendered = self
                .installer
                .upgrade(&actor.access, &spec.request(true), MAX_HISTORY)
                .await
                .map_err(mutation_error("Could not run upgrade dry run"))?;
            self.authorize(actor, &spec.namespace, "upgrade", &rendered.manifest)
                .await?;
        }

        let release = self
            .installer
            .upgrade(&actor.access, &spec.request(false), MAX_HISTORY)
            .await
            .map_err(mutation_error("Unable to update the release"))?;

        self.log_status(actor, &spec.name, &spec.namespace).await;
        Ok(release)
    }

    /// Roll a release back to `revision`.
    ///
    /// The stored manifest is authorized with the upgrade verbs, since a
    /// rollback may create, change or remove resources just like an upgrade.
    pub async fn rollback(&self, actor: &Actor, name: &str, namespace: &str, revision: i64) -> Result<Release> {
        let _guard = self.locks.acquire(name).await;
        let current = self.require(actor, name, namespace).await?;
        info!(release = %name, namespace = %namespace, revision, "rolling back release");

        self.authorize(actor, namespace, "upgrade", &current.manifest)
            .await?;

        self.installer
            .rollback(&actor.access, name, namespace, revision, MAX_HISTORY)
            .await
            .map_err(mutation_error("Unable to rollback the release"))?;

        self.log_status(actor, name, namespace).await;
        self.require(actor, name, namespace).await
    }

    /// Uninstall a release.
    ///
    /// With `keep_history` the release stays listed as uninstalled. The
    /// shared pull secret is removed once no release is left in the namespace.
    pub async fn delete(&self, actor: &Actor, name: &str, namespace: &str, keep_history: bool) -> Result<()> {
        let _guard = self.locks.acquire(name).await;
        let current = self.require(actor, name, namespace).await?;
        info!(release = %name, namespace = %namespace, keep_history, "deleting release");

        self.authorize(actor, namespace, "delete", &current.manifest)
            .await?;

        self.installer
            .uninstall(&actor.access, name, namespace, keep_history)
            .await
            .map_err(mutation_error("Unable to delete the release"))?;

        if self.pull_secret.is_some() {
            let remaining = self
                .installer
                .list(&actor.access, namespace, 1)
                .await
                .map_err(read_error(
                    "Unable to list release to check if imagepullsecret has to be deleted",
                ))?;
            if latest_revisions(remaining, Some(namespace)).is_empty() {
                self.cluster
                    .delete_secret(&actor.access, namespace, PULL_SECRET_NAME)
                    .await
                    .map_err(|e| Error::internal(format!("Unable to delete image pull secret: {}", e)))?;
                debug!(namespace = %namespace, "image pull secret removed");
            }
        }

        info!(release = %name, namespace = %namespace, "release deleted");
        Ok(())
    }

    /// Current revision of a release the actor may read
    pub async fn get(&self, actor: &Actor, name: &str, namespace: &str) -> Result<Release> {
        let _guard = self.locks.acquire(name).await;
        let release = self.require(actor, name, namespace).await?;
        self.authorize(actor, namespace, "get", &release.manifest)
            .await?;
        Ok(release)
    }

    /// Latest revision of each release, optionally scoped to a namespace and
    /// filtered by status.
    ///
    /// Releases the actor may not read are left out.
    pub async fn list(
        &self,
        actor: &Actor,
        namespace: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<AppOverview>> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        let releases = self
            .installer
            .list(&actor.access, namespace.unwrap_or_default(), self.list_max)
            .await
            .map_err(read_error("Unable to list helm releases"))?;

        let mut overviews = Vec::new();
        for release in latest_revisions(releases, namespace) {
            if overviews.len() >= self.list_max {
                break;
            }
            if !status_matches(&release, status) {
                continue;
            }
            if self.gated(actor) {
                let forbidden = self
                    .gate
                    .forbidden_actions(&actor.access, &release.namespace, "get", &release.manifest)
                    .await?;
                if !forbidden.is_empty() {
                    debug!(release = %release.name, namespace = %release.namespace, "omitting unreadable release");
                    continue;
                }
            }
            overviews.push(AppOverview::from(&release));
        }
        Ok(overviews)
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
