use std::sync::Arc;

use hub_chart::{Chart, ChartMetadata};
use hub_common::{ClusterEndpoint, Credential};
use serde_json::json;
use zeroize::Zeroizing;

use super::*;
use crate::fake::{FakeCluster, FakeInstaller};
use crate::installer::{InstallerError, MockClusterOps, MockInstaller};
use crate::pull_secret::PULL_SECRET_KEY;
use crate::release::{ReleaseInfo, STATUS_UNINSTALLED};

fn access() -> ClusterAccess {
    ClusterAccess {
        endpoint: ClusterEndpoint {
            server: "https://api.example.com".to_string(),
            ca_pem: Vec::new(),
        },
        credential: Credential::Bearer(Zeroizing::new("user-token".to_string())),
    }
}

fn chart(values: Value) -> Arc<Chart> {
    Arc::new(Chart {
        metadata: ChartMetadata {
            name: "foo".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        },
        values: values.as_object().cloned().unwrap_or_default(),
        archive: Vec::new(),
    })
}

fn spec(name: &str, namespace: &str) -> ReleaseSpec {
    ReleaseSpec {
        name: name.to_string(),
        namespace: namespace.to_string(),
        chart: chart(json!({})),
        values: Map::new(),
    }
}

fn existing(name: &str, namespace: &str) -> Release {
    Release {
        name: name.to_string(),
        namespace: namespace.to_string(),
        version: 1,
        info: ReleaseInfo {
            status: "deployed".to_string(),
            ..Default::default()
        },
        manifest: crate::fake::fake_manifest("foo", name),
        ..Default::default()
    }
}

struct Harness {
    installer: Arc<FakeInstaller>,
    cluster: Arc<FakeCluster>,
    orchestrator: Arc<ReleaseOrchestrator>,
}

fn harness(auth_enabled: bool, pull_secret: Option<PullSecretPolicy>) -> Harness {
    let installer = Arc::new(FakeInstaller::new());
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = ReleaseOrchestrator::new(
        installer.clone(),
        cluster.clone(),
        Arc::new(ReleaseLocks::new()),
        auth_enabled,
    )
    .with_pull_secret(pull_secret);
    Harness {
        installer,
        cluster,
        orchestrator: Arc::new(orchestrator),
    }
}

fn mock_orchestrator(installer: MockInstaller, cluster: MockClusterOps) -> ReleaseOrchestrator {
    ReleaseOrchestrator::new(
        Arc::new(installer),
        Arc::new(cluster),
        Arc::new(ReleaseLocks::new()),
        false,
    )
}

// =============================================================================
// Existence checks
// =============================================================================

#[tokio::test]
async fn create_on_existing_name_is_conflict_without_install() {
    let mut installer = MockInstaller::new();
    installer
        .expect_get()
        .returning(|_, name, ns| Ok(existing(name, ns)));
    installer.expect_install().times(0);
    let mut cluster = MockClusterOps::new();
    cluster.expect_ensure_namespace().times(0);

    let orchestrator = mock_orchestrator(installer, cluster);
    let err = orchestrator
        .create(&Actor::gated(access()), &spec("foobar", "default"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);
}

#[tokio::test]
async fn operations_on_missing_release_are_not_found() {
    let mut installer = MockInstaller::new();
    installer
        .expect_get()
        .times(4)
        .returning(|_, _, _| Err(InstallerError::new("release: not found")));
    installer.expect_upgrade().times(0);
    installer.expect_rollback().times(0);
    installer.expect_uninstall().times(0);

    let orchestrator = mock_orchestrator(installer, MockClusterOps::new());
    let actor = Actor::gated(access());

    let upgrade = orchestrator.upgrade(&actor, &spec("ghost", "default")).await;
    let rollback = orchestrator.rollback(&actor, "ghost", "default", 1).await;
    let delete = orchestrator.delete(&actor, "ghost", "default", false).await;
    let get = orchestrator.get(&actor, "ghost", "default").await;

    for result in [upgrade.map(|_| ()), rollback.map(|_| ()), delete, get.map(|_| ())] {
        match result {
            Err(Error::NotFound(msg)) => {
                assert_eq!(msg, r#"Release "ghost" not found in namespace "default""#)
            }
            other => panic!("expected not found, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn release_in_other_namespace_is_not_found() {
    let mut installer = MockInstaller::new();
    installer
        .expect_get()
        .returning(|_, name, _| Ok(existing(name, "elsewhere")));

    let orchestrator = mock_orchestrator(installer, MockClusterOps::new());
    let err = orchestrator
        .get(&Actor::gated(access()), "foobar", "default")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn lookup_failures_other_than_not_found_propagate() {
    let mut installer = MockInstaller::new();
    installer
        .expect_get()
        .returning(|_, _, _| Err(InstallerError::new("Kubernetes cluster unreachable")));
    installer.expect_install().times(0);

    let orchestrator = mock_orchestrator(installer, MockClusterOps::new());
    let err = orchestrator
        .create(&Actor::gated(access()), &spec("foobar", "default"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

// =============================================================================
// Installer error classification
// =============================================================================

async fn create_failing_with(message: &'static str) -> Error {
    let mut installer = MockInstaller::new();
    installer
        .expect_get()
        .returning(|_, _, _| Err(InstallerError::new("release: not found")));
    installer
        .expect_install()
        .returning(move |_, _| Err(InstallerError::new(message)));
    let mut cluster = MockClusterOps::new();
    cluster.expect_ensure_namespace().returning(|_, _| Ok(()));

    mock_orchestrator(installer, cluster)
        .create(&Actor::gated(access()), &spec("foobar", "default"))
        .await
        .unwrap_err()
}

#[tokio::test]
async fn install_failures_are_classified() {
    assert!(matches!(
        create_failing_with("release foobar failed, and has been uninstalled due to atomic").await,
        Error::UnprocessableEntity(_)
    ));
    assert!(matches!(
        create_failing_with("Unauthorized").await,
        Error::Forbidden { .. }
    ));
    assert!(matches!(
        create_failing_with("rendered manifests contain a resource that already exists").await,
        Error::Conflict(_)
    ));
    let fallback = create_failing_with("template: foo/templates/x.yaml:3: bad").await;
    assert!(matches!(fallback, Error::UnprocessableEntity(_)));
    assert!(fallback.to_string().starts_with("Unable to create the release: "));
}

#[tokio::test]
async fn list_failure_defaults_to_internal() {
    let mut installer = MockInstaller::new();
    installer
        .expect_list()
        .returning(|_, _, _| Err(InstallerError::new("connection refused")));

    let err = mock_orchestrator(installer, MockClusterOps::new())
        .list(&Actor::gated(access()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

// =============================================================================
// Lifecycle against the in-memory installer
// =============================================================================

#[tokio::test]
async fn create_upgrade_rollback_delete() {
    let h = harness(true, None);
    let actor = Actor::gated(access());

    let created = h
        .orchestrator
        .create(&actor, &spec("foobar", "apps"))
        .await
        .unwrap();
    assert_eq!(created.version, 1);
    assert!(h.cluster.namespaces().await.contains("apps"));

    let upgraded = h
        .orchestrator
        .upgrade(&actor, &spec("foobar", "apps"))
        .await
        .unwrap();
    assert_eq!(upgraded.version, 2);

    let rolled_back = h
        .orchestrator
        .rollback(&actor, "foobar", "apps", 1)
        .await
        .unwrap();
    assert_eq!(rolled_back.version, 3);
    assert_eq!(rolled_back.info.description, "Rollback to 1");

    h.orchestrator
        .delete(&actor, "foobar", "apps", false)
        .await
        .unwrap();
    assert!(h.installer.revisions().await.is_empty());
}

#[tokio::test]
async fn delete_with_history_keeps_uninstalled_release() {
    let h = harness(false, None);
    let actor = Actor::gated(access());
    h.orchestrator
        .create(&actor, &spec("foobar", "default"))
        .await
        .unwrap();

    h.orchestrator
        .delete(&actor, "foobar", "default", true)
        .await
        .unwrap();

    let listed = h.orchestrator.list(&actor, None, Some("all")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, STATUS_UNINSTALLED);
}

#[tokio::test]
async fn concurrent_creates_of_one_name_yield_one_release() {
    let h = harness(false, None);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .create(&Actor::gated(access()), &spec("foobar", "default"))
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 3);
    assert_eq!(h.installer.revisions().await.len(), 1);
}

// =============================================================================
// Authorization gate
// =============================================================================

#[tokio::test]
async fn denied_create_installs_nothing() {
    let h = harness(true, None);
    h.cluster.deny("configmaps", "create").await;

    let err = h
        .orchestrator
        .create(&Actor::gated(access()), &spec("foobar", "default"))
        .await
        .unwrap_err();

    match err {
        Error::Forbidden { actions, .. } => {
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].resource, "configmaps");
            assert_eq!(actions[0].namespace, "default");
            assert_eq!(actions[0].verbs, vec!["create"]);
        }
        other => panic!("expected forbidden, got {:?}", other),
    }
    assert!(h.installer.revisions().await.is_empty());
}

#[tokio::test]
async fn trusted_actor_and_disabled_gate_skip_checks() {
    let h = harness(true, None);
    h.cluster.deny("configmaps", "create").await;
    h.orchestrator
        .create(&Actor::trusted(access()), &spec("a", "default"))
        .await
        .unwrap();

    let open = harness(false, None);
    open.cluster.deny("configmaps", "create").await;
    open.orchestrator
        .create(&Actor::gated(access()), &spec("a", "default"))
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_checks_all_mutating_verbs() {
    let h = harness(true, None);
    let actor = Actor::gated(access());
    h.orchestrator
        .create(&actor, &spec("foobar", "default"))
        .await
        .unwrap();
    h.cluster.deny("configmaps", "delete").await;

    let err = h
        .orchestrator
        .upgrade(&actor, &spec("foobar", "default"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(h.installer.revisions().await.len(), 1);
}

#[tokio::test]
async fn list_omits_releases_the_actor_cannot_read() {
    let h = harness(true, None);
    h.installer.seed(existing("a", "default")).await;
    h.installer.seed(existing("b", "default")).await;
    h.cluster.deny("configmaps", "get").await;

    let gated = h
        .orchestrator
        .list(&Actor::gated(access()), Some("default"), None)
        .await
        .unwrap();
    assert!(gated.is_empty());

    let trusted = h
        .orchestrator
        .list(&Actor::trusted(access()), Some("default"), None)
        .await
        .unwrap();
    assert_eq!(trusted.len(), 2);
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn list_keeps_latest_revision_filters_and_limits() {
    let h = harness(false, None);
    let mut old = existing("a", "default");
    old.info.status = "superseded".to_string();
    h.installer.seed(old).await;
    let mut newest = existing("a", "default");
    newest.version = 2;
    h.installer.seed(newest).await;
    let mut failed = existing("b", "default");
    failed.info.status = "failed".to_string();
    h.installer.seed(failed).await;
    h.installer.seed(existing("c", "other")).await;

    let actor = Actor::gated(access());

    let all = h.orchestrator.list(&actor, None, None).await.unwrap();
    let names: Vec<_> = all.iter().map(|o| o.release_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(all[0].status, "deployed");

    let deployed = h
        .orchestrator
        .list(&actor, Some("default"), Some("DEPLOYED"))
        .await
        .unwrap();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].release_name, "a");

    let limited = ReleaseOrchestrator::new(
        h.installer.clone(),
        h.cluster.clone(),
        Arc::new(ReleaseLocks::new()),
        false,
    )
    .with_list_max(2)
    .list(&actor, None, Some("all"))
    .await
    .unwrap();
    assert_eq!(limited.len(), 2);
}

// =============================================================================
// Pull secret
// =============================================================================

fn policy() -> PullSecretPolicy {
    PullSecretPolicy::new(br#"{"auths":{}}"#.to_vec())
}

fn requesting(name: &str) -> ReleaseSpec {
    ReleaseSpec {
        chart: chart(json!({"hubsec": {"enabled": false}})),
        values: json!({"hubsec": {"enabled": true}})
            .as_object()
            .cloned()
            .unwrap_or_default(),
        ..spec(name, "default")
    }
}

#[tokio::test]
async fn pull_secret_written_when_values_request_it() {
    let h = harness(false, Some(policy()));
    let actor = Actor::gated(access());

    h.orchestrator
        .create(&actor, &spec("plain", "default"))
        .await
        .unwrap();
    assert!(h.cluster.secret("default", PULL_SECRET_NAME).await.is_none());

    h.orchestrator
        .create(&actor, &requesting("wants-secret"))
        .await
        .unwrap();
    let data = h.cluster.secret("default", PULL_SECRET_NAME).await.unwrap();
    assert_eq!(data[PULL_SECRET_KEY], br#"{"auths":{}}"#.to_vec());
}

#[tokio::test]
async fn pull_secret_removed_with_last_release() {
    let h = harness(false, Some(policy()));
    let actor = Actor::gated(access());
    h.orchestrator.create(&actor, &requesting("a")).await.unwrap();
    h.orchestrator.create(&actor, &requesting("b")).await.unwrap();

    h.orchestrator.delete(&actor, "a", "default", false).await.unwrap();
    assert!(h.cluster.secret("default", PULL_SECRET_NAME).await.is_some());

    h.orchestrator.delete(&actor, "b", "default", true).await.unwrap();
    assert!(
        h.cluster.secret("default", PULL_SECRET_NAME).await.is_some(),
        "an uninstalled release with history still counts"
    );
}

#[tokio::test]
async fn pull_secret_removed_when_namespace_is_empty() {
    let h = harness(false, Some(policy()));
    let actor = Actor::gated(access());
    h.orchestrator.create(&actor, &requesting("a")).await.unwrap();

    h.orchestrator.delete(&actor, "a", "default", false).await.unwrap();
    assert!(h.cluster.secret("default", PULL_SECRET_NAME).await.is_none());
}
