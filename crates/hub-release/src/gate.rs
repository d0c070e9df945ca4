//! Manifest authorization gate
//!
//! Before the gateway acts on a release it renders the manifest the action
//! would produce and asks the target cluster, as the acting identity, whether
//! every resource in it may be touched with the relevant verbs. The result is
//! the list of denied actions; an empty list means the action is authorized.
//!
//! ```text
//! manifest ──► documents ──► (group, resource, namespace) ──► SelfSubjectAccessReview × verbs
//!                                                                   │
//!                                               denied ◄────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use hub_common::yaml::parse_yaml_multi;
use hub_common::{ClusterAccess, Error, ForbiddenAction, Result};
use tracing::{debug, info};

use crate::installer::{AccessCheck, ClusterOps, ResourceKind};

/// Verbs checked for an action.
///
/// An upgrade may create, change or remove resources; every other action
/// checks its own name as the verb.
pub fn verbs_for_action(action: &str) -> Vec<String> {
    match action {
        "upgrade" => vec!["create".to_string(), "update".to_string(), "delete".to_string()],
        other => vec![other.to_string()],
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Target {
    group: String,
    resource: String,
    namespace: Option<String>,
}

/// Computes forbidden actions for rendered manifests
pub struct ManifestAuthGate {
    cluster: Arc<dyn ClusterOps>,
    enabled: bool,
}

impl ManifestAuthGate {
    /// Create a gate; a disabled gate authorizes everything without API calls
    pub fn new(cluster: Arc<dyn ClusterOps>, enabled: bool) -> Self {
        Self { cluster, enabled }
    }

    /// Whether the gate performs checks
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Actions in `manifest` the actor may not perform.
    ///
    /// Documents without `metadata.namespace` are checked in `namespace`.
    pub async fn forbidden_actions(
        &self,
        actor: &ClusterAccess,
        namespace: &str,
        action: &str,
        manifest: &str,
    ) -> Result<Vec<ForbiddenAction>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let documents = parse_yaml_multi(manifest)?;

        // (kind, namespace) pairs in manifest order, without duplicates
        let mut objects: Vec<(ResourceKind, String)> = Vec::new();
        for doc in &documents {
            let kind = doc["kind"].as_str().unwrap_or_default();
            let api_version = doc["apiVersion"].as_str().unwrap_or_default();
            if kind.is_empty() || api_version.is_empty() {
                continue;
            }
            let doc_namespace = doc["metadata"]["namespace"]
                .as_str()
                .filter(|ns| !ns.is_empty())
                .unwrap_or(namespace);
            let entry = (
                ResourceKind {
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                },
                doc_namespace.to_string(),
            );
            if !objects.contains(&entry) {
                objects.push(entry);
            }
        }
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let mut kinds: Vec<ResourceKind> = Vec::new();
        for (kind, _) in &objects {
            if !kinds.contains(kind) {
                kinds.push(kind.clone());
            }
        }
        let infos = self.cluster.resolve_resources(actor, &kinds).await?;
        if infos.len() != kinds.len() {
            return Err(Error::internal("resource discovery returned an incomplete answer"));
        }
        let info_by_kind: HashMap<&ResourceKind, _> = kinds.iter().zip(infos.iter()).collect();

        let mut targets: Vec<Target> = Vec::new();
        for (kind, ns) in &objects {
            let Some(info) = info_by_kind.get(kind) else {
                continue;
            };
            let target = Target {
                group: info.group.clone(),
                resource: info.plural.clone(),
                namespace: info.namespaced.then(|| ns.clone()),
            };
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        let verbs = verbs_for_action(action);
        let checks: Vec<AccessCheck> = targets
            .iter()
            .flat_map(|target| {
                verbs.iter().map(move |verb| AccessCheck {
                    group: target.group.clone(),
                    resource: target.resource.clone(),
                    namespace: target.namespace.clone(),
                    verb: verb.clone(),
                })
            })
            .collect();

        let allowed = self.cluster.can_i(actor, &checks).await?;
        if allowed.len() != checks.len() {
            return Err(Error::internal("access review returned an incomplete answer"));
        }

        let mut forbidden: Vec<ForbiddenAction> = Vec::new();
        for (check, allowed) in checks.iter().zip(allowed) {
            if allowed {
                continue;
            }
            let namespace = check.namespace.clone().unwrap_or_default();
            let cluster_wide = check.namespace.is_none();
            match forbidden.iter_mut().find(|f| {
                f.api_group == check.group
                    && f.resource == check.resource
                    && f.namespace == namespace
                    && f.cluster_wide == cluster_wide
            }) {
                Some(existing) => existing.verbs.push(check.verb.clone()),
                None => forbidden.push(ForbiddenAction {
                    api_group: check.group.clone(),
                    resource: check.resource.clone(),
                    namespace,
                    cluster_wide,
                    verbs: vec![check.verb.clone()],
                }),
            }
        }

        debug!(
            action = %action,
            namespace = %namespace,
            checks = checks.len(),
            denied = forbidden.len(),
            "evaluated manifest permissions"
        );
        Ok(forbidden)
    }

    /// Fail with [`Error::Forbidden`] listing the denied actions, if any
    pub async fn authorize(
        &self,
        actor: &ClusterAccess,
        namespace: &str,
        action: &str,
        manifest: &str,
    ) -> Result<()> {
        let forbidden = self
            .forbidden_actions(actor, namespace, action, manifest)
            .await?;
        if forbidden.is_empty() {
            Ok(())
        } else {
            info!(action = %action, namespace = %namespace, denied = forbidden.len(), "manifest authorization denied");
            Err(Error::forbidden_actions(forbidden))
        }
    }
}
