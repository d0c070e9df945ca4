//! Hub gateway - authenticated multi-cluster reverse proxy and release gateway

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::Handle;
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hub_api::{
    start_server, AppState, CredentialResolver, KubeBomStore, KubeCredentialStore, ReqwestUpstream,
    ServerConfig,
};
use hub_chart::{ArchiveLoader, ChartIndexCache, ChartResolver, KubeRepositoryStore, ReqwestRepositoryClient};
use hub_common::ClusterEndpoint;
use hub_release::{HelmCli, KubeClusterOps, PullSecretPolicy, ReleaseLocks, ReleaseOrchestrator};

/// CA bundle mounted into every pod with a service account
const IN_CLUSTER_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// How long in-flight requests may finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Hub gateway - releases, ClusterBoms and API access for registered clusters
#[derive(Parser, Debug)]
#[command(name = "hub-gateway", version, about, long_about = None)]
struct Cli {
    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// TLS certificate (PEM); HTTPS is served when both cert and key are set
    #[arg(long, env = "TLS_CERT_PATH")]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "TLS_KEY_PATH")]
    tls_key: Option<PathBuf>,

    /// Skip manifest authorization for callers using their own token
    #[arg(long, env = "DISABLE_AUTH")]
    disable_auth: bool,

    /// Maximum number of releases returned by a list
    #[arg(long, env = "LIST_MAX", default_value_t = hub_release::DEFAULT_LIST_MAX)]
    list_max: usize,

    /// Comment appended to the chart repository User-Agent
    #[arg(long, env = "USER_AGENT_COMMENT", default_value = "")]
    user_agent_comment: String,

    /// Version reported in the chart repository User-Agent
    #[arg(long, env = "APP_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    app_version: String,

    /// External URL of the gateway, sent as Origin on WebSocket dials
    #[arg(long, env = "HOST_URL", default_value = "http://localhost")]
    host_url: String,

    /// API server of the resource cluster; defaults to the in-cluster API
    #[arg(long, env = "RESOURCE_CLUSTER_URL")]
    resource_cluster_url: Option<String>,

    /// Base64 PEM CA of the resource cluster; defaults to the in-cluster CA
    #[arg(long, env = "RESOURCE_CLUSTER_CA")]
    resource_cluster_ca: Option<String>,

    /// Run release operations as the stored cluster credential
    #[arg(long, env = "MEMBERSHIP_AUTH")]
    membership_auth: bool,

    /// Honour the disableAuth and targetKubeconfig headers
    #[arg(long, env = "TRUST_KUBECONFIG_HEADER")]
    trust_kubeconfig_header: bool,

    /// Namespace holding AppRepository resources
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    pod_namespace: String,

    /// Base64 dockerconfigjson written as the hubsec pull secret
    #[arg(long = "pull-secret-dockerconfigjson", env = "HUBSEC_DOCKERCONFIGJSON")]
    pull_secret: Option<String>,

    /// Installer executable
    #[arg(long, env = "HELM_BINARY", default_value = "helm")]
    helm_binary: PathBuf,

    /// Release storage backend (secret, configmap, memory)
    #[arg(long, env = "HELM_DRIVER", default_value = hub_release::helm::DEFAULT_DRIVER)]
    helm_driver: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let resource_cluster = resource_cluster(&cli)?;
    info!(server = %resource_cluster.server, "resource cluster");

    let client = kube::Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let user_agent = user_agent(&cli.app_version, &cli.user_agent_comment);
    let charts = ChartResolver::new(
        Arc::new(ChartIndexCache::new()),
        Arc::new(KubeRepositoryStore::new(client, cli.pod_namespace.clone())),
        Arc::new(ReqwestRepositoryClient::new(user_agent)),
        Arc::new(ArchiveLoader),
    );

    let pull_secret = cli
        .pull_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(PullSecretPolicy::from_base64)
        .transpose()
        .context("invalid pull secret")?;
    if pull_secret.is_none() {
        info!("no pull secret configured");
    }

    if cli.disable_auth {
        warn!("manifest authorization disabled");
    }
    let orchestrator = ReleaseOrchestrator::new(
        Arc::new(HelmCli::new(cli.helm_binary.clone(), cli.helm_driver.clone())),
        Arc::new(KubeClusterOps),
        Arc::new(ReleaseLocks::new()),
        !cli.disable_auth,
    )
    .with_pull_secret(pull_secret)
    .with_list_max(cli.list_max);

    let credentials = CredentialResolver::new(resource_cluster, Arc::new(KubeCredentialStore))
        .with_trusted_override(cli.trust_kubeconfig_header)
        .with_membership(cli.membership_auth);

    let state = AppState {
        credentials: Arc::new(credentials),
        upstream: Arc::new(ReqwestUpstream),
        orchestrator: Arc::new(orchestrator),
        charts: Arc::new(charts),
        boms: Arc::new(KubeBomStore),
        host_url: cli.host_url.clone(),
    };

    let (cert_pem, key_pem) = match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => (
            Some(
                std::fs::read_to_string(cert)
                    .with_context(|| format!("failed to read {}", cert.display()))?,
            ),
            Some(
                std::fs::read_to_string(key)
                    .with_context(|| format!("failed to read {}", key.display()))?,
            ),
        ),
        (None, None) => (None, None),
        _ => anyhow::bail!("--tls-cert and --tls-key must be set together"),
    };
    let config = ServerConfig {
        addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port),
        cert_pem,
        key_pem,
    };

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    start_server(config, state, handle).await?;
    info!("gateway stopped");
    Ok(())
}

/// `hub-gateway/<version> (<comment>)`, without the parenthesis when there is no comment
fn user_agent(version: &str, comment: &str) -> String {
    if comment.is_empty() {
        format!("hub-gateway/{}", version)
    } else {
        format!("hub-gateway/{} ({})", version, comment)
    }
}

/// Endpoint of the resource cluster from flags, falling back to the in-cluster API
fn resource_cluster(cli: &Cli) -> anyhow::Result<ClusterEndpoint> {
    let server = match &cli.resource_cluster_url {
        Some(url) => url.clone(),
        None => {
            let host = std::env::var("KUBERNETES_SERVICE_HOST")
                .context("--resource-cluster-url is not set and not running in a cluster")?;
            let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
            in_cluster_url(&host, &port)
        }
    };

    let ca_pem = match &cli.resource_cluster_ca {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .context("resource cluster CA is not valid base64")?,
        None => std::fs::read(IN_CLUSTER_CA)
            .with_context(|| format!("--resource-cluster-ca is not set and {} is unreadable", IN_CLUSTER_CA))?,
    };
    if ca_pem.is_empty() {
        anyhow::bail!("resource cluster CA is empty");
    }

    Ok(ClusterEndpoint { server, ca_pem })
}

fn in_cluster_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{}]:{}", host, port)
    } else {
        format!("https://{}:{}", host, port)
    }
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
