//! [`Installer`] backed by the helm command line
//!
//! Each call gets a private temporary directory holding the kubeconfig
//! rendered from the [`ClusterAccess`], plus the chart archive and values
//! when needed. The directory is removed when the call returns.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use hub_common::{classify_installer_error, ClusterAccess, Error};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::installer::{Installer, InstallerError, InstallerResult, ReleaseRequest};
use crate::release::{Release, ReleaseStatus};

/// Release storage backend used when none is configured
pub const DEFAULT_DRIVER: &str = "secret";

/// `helm status` processes running at once while listing
pub const STATUS_CONCURRENCY: usize = 4;

/// Runs helm as a child process
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: PathBuf,
    driver: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm", DEFAULT_DRIVER)
    }
}

/// Files backing a single helm invocation
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    async fn new(access: &ClusterAccess) -> InstallerResult<Self> {
        let dir = TempDir::new()
            .map_err(|e| InstallerError::new(format!("failed to create work directory: {}", e)))?;
        let workspace = Self { dir };
        let kubeconfig = access.to_kubeconfig();
        workspace.write("kubeconfig", kubeconfig.as_bytes()).await?;
        Ok(workspace)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn write(&self, name: &str, content: &[u8]) -> InstallerResult<PathBuf> {
        let path = self.path(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| InstallerError::new(format!("failed to write {}: {}", name, e)))?;
        Ok(path)
    }

    async fn write_request(&self, request: &ReleaseRequest) -> InstallerResult<(PathBuf, PathBuf)> {
        let chart = self.write("chart.tgz", &request.chart.archive).await?;
        let values = serde_json::to_vec(&request.values)
            .map_err(|e| InstallerError::new(format!("failed to encode values: {}", e)))?;
        let values = self.write("values.json", &values).await?;
        Ok((chart, values))
    }
}

/// Entry of `helm list -o json`
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    namespace: String,
}

impl HelmCli {
    /// Use `binary` with the given release storage driver
    pub fn new(binary: impl Into<PathBuf>, driver: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            driver: driver.into(),
        }
    }

    async fn run(&self, workspace: &Workspace, args: Vec<String>) -> InstallerResult<Vec<u8>> {
        debug!(command = %args.first().map(String::as_str).unwrap_or_default(), "running helm");

        let output = Command::new(&self.binary)
            .args(&args)
            .arg("--kubeconfig")
            .arg(workspace.path("kubeconfig"))
            .env("HELM_DRIVER", &self.driver)
            .env_remove("KUBECONFIG")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| InstallerError::new(format!("failed to run {}: {}", self.binary.display(), e)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(InstallerError::new(error_message(&output.stderr)))
        }
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(
        &self,
        workspace: &Workspace,
        args: Vec<String>,
    ) -> InstallerResult<T> {
        let stdout = self.run(workspace, args).await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| InstallerError::new(format!("failed to decode helm output: {}", e)))
    }

    async fn status_in(&self, workspace: &Workspace, name: &str, namespace: &str) -> InstallerResult<Release> {
        self.run_json(workspace, status_args(name, namespace)).await
    }
}

/// Fetch the release behind each list entry, [`STATUS_CONCURRENCY`] at a time.
///
/// Releases removed since the listing are left out; any other failure fails
/// the whole list.
async fn fetch_listed<F, Fut>(entries: Vec<ListEntry>, fetch: F) -> InstallerResult<Vec<Release>>
where
    F: Fn(ListEntry) -> Fut,
    Fut: Future<Output = InstallerResult<Release>>,
{
    let mut statuses = stream::iter(entries)
        .map(|entry| {
            let name = entry.name.clone();
            let status = fetch(entry);
            async move { (name, status.await) }
        })
        .buffered(STATUS_CONCURRENCY);

    let mut releases = Vec::new();
    while let Some((name, result)) = statuses.next().await {
        match result {
            Ok(release) => releases.push(release),
            Err(e) if matches!(classify_installer_error(e.0.clone(), Error::Internal), Error::NotFound(_)) => {
                debug!(release = %name, "release disappeared while listing");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(releases)
}

/// Message from helm's stderr without the `Error: ` prefix
fn error_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    text.strip_prefix("Error: ").unwrap_or(text).to_string()
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn install_args(request: &ReleaseRequest, chart: &Path, values: &Path) -> Vec<String> {
    let mut args = strings(["install", &request.name]);
    args.push(chart.display().to_string());
    args.extend(strings(["--namespace", &request.namespace, "--output", "json"]));
    args.push("--values".to_string());
    args.push(values.display().to_string());
    if request.dry_run {
        args.push("--dry-run=server".to_string());
    }
    args
}

fn upgrade_args(request: &ReleaseRequest, chart: &Path, values: &Path, max_history: u32) -> Vec<String> {
    let mut args = strings(["upgrade", &request.name]);
    args.push(chart.display().to_string());
    args.extend(strings(["--namespace", &request.namespace, "--output", "json"]));
    args.push("--values".to_string());
    args.push(values.display().to_string());
    args.push(format!("--history-max={}", max_history));
    if request.dry_run {
        args.push("--dry-run=server".to_string());
    }
    args
}

fn rollback_args(name: &str, namespace: &str, revision: i64, max_history: u32) -> Vec<String> {
    let mut args = strings(["rollback", name]);
    args.push(revision.to_string());
    args.extend(strings(["--namespace", namespace]));
    args.push(format!("--history-max={}", max_history));
    args
}

fn uninstall_args(name: &str, namespace: &str, keep_history: bool) -> Vec<String> {
    let mut args = strings(["uninstall", name, "--namespace", namespace]);
    if keep_history {
        args.push("--keep-history".to_string());
    }
    args
}

fn status_args(name: &str, namespace: &str) -> Vec<String> {
    strings(["status", name, "--namespace", namespace, "--output", "json"])
}

fn list_args(namespace: &str, max: usize) -> Vec<String> {
    let mut args = strings(["list", "--all", "--output", "json"]);
    args.push(format!("--max={}", max));
    if namespace.is_empty() {
        args.push("--all-namespaces".to_string());
    } else {
        args.extend(strings(["--namespace", namespace]));
    }
    args
}

#[async_trait]
impl Installer for HelmCli {
    async fn install(&self, access: &ClusterAccess, request: &ReleaseRequest) -> InstallerResult<Release> {
        let workspace = Workspace::new(access).await?;
        let (chart, values) = workspace.write_request(request).await?;
        self.run_json(&workspace, install_args(request, &chart, &values)).await
    }

    async fn upgrade(
        &self,
        access: &ClusterAccess,
        request: &ReleaseRequest,
        max_history: u32,
    ) -> InstallerResult<Release> {
        let workspace = Workspace::new(access).await?;
        let (chart, values) = workspace.write_request(request).await?;
        self.run_json(&workspace, upgrade_args(request, &chart, &values, max_history))
            .await
    }

    async fn rollback(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
        revision: i64,
        max_history: u32,
    ) -> InstallerResult<()> {
        let workspace = Workspace::new(access).await?;
        self.run(&workspace, rollback_args(name, namespace, revision, max_history))
            .await
            .map(|_| ())
    }

    async fn uninstall(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
        keep_history: bool,
    ) -> InstallerResult<()> {
        let workspace = Workspace::new(access).await?;
        self.run(&workspace, uninstall_args(name, namespace, keep_history))
            .await
            .map(|_| ())
    }

    async fn get(&self, access: &ClusterAccess, name: &str, namespace: &str) -> InstallerResult<Release> {
        let workspace = Workspace::new(access).await?;
        self.status_in(&workspace, name, namespace).await
    }

    async fn list(&self, access: &ClusterAccess, namespace: &str, max: usize) -> InstallerResult<Vec<Release>> {
        let workspace = Workspace::new(access).await?;
        let mut entries: Vec<ListEntry> = self.run_json(&workspace, list_args(namespace, max)).await?;
        entries.truncate(max);

        // `helm list` omits chart metadata; fetch the full release for each entry.
        let workspace = &workspace;
        fetch_listed(entries, move |entry| async move {
            self.status_in(workspace, &entry.name, &entry.namespace).await
        })
        .await
    }

    async fn status(
        &self,
        access: &ClusterAccess,
        name: &str,
        namespace: &str,
    ) -> InstallerResult<ReleaseStatus> {
        let release = self.get(access, name, namespace).await?;
        Ok(ReleaseStatus::from(&release))
    }
}
