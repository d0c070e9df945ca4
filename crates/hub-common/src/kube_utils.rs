//! Kubernetes helpers shared by the release and API crates

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use crate::error::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "hub-gateway";

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and doesn't
/// race with concurrent creators.
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Read one key of a secret
pub async fn get_secret_data(
    client: &Client,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<Vec<u8>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(name).await?;

    secret
        .data
        .and_then(|mut d| d.remove(key))
        .map(|data| data.0)
        .ok_or_else(|| Error::not_found(format!("Secret {}/{} missing key {}", namespace, name, key)))
}

/// Create a secret, or replace its type and data when it already exists
pub async fn upsert_secret(
    client: &Client,
    name: &str,
    namespace: &str,
    type_: &str,
    data: BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(type_.to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v)))
                .collect(),
        ),
        ..Default::default()
    };

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => {
            debug!(secret = %name, namespace = %namespace, "created secret");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            let mut existing = secrets.get(name).await?;
            existing.type_ = secret.type_;
            existing.data = secret.data;
            secrets
                .replace(name, &PostParams::default(), &existing)
                .await?;
            debug!(secret = %name, namespace = %namespace, "updated secret");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a secret, treating "not found" as success
pub async fn delete_secret(client: &Client, name: &str, namespace: &str) -> Result<()> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match secrets.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use hub_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Irregular plurals of kinds commonly found in charts
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("priorityclass", "priorityclasses"),
    ("storageclass", "storageclasses"),
    ("ingressclass", "ingressclasses"),
    ("runtimeclass", "runtimeclasses"),
];

/// Kinds that are cluster scoped when discovery cannot tell us
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "apiservice",
    "clusterrole",
    "clusterrolebinding",
    "customresourcedefinition",
    "ingressclass",
    "mutatingwebhookconfiguration",
    "namespace",
    "node",
    "persistentvolume",
    "podsecuritypolicy",
    "priorityclass",
    "runtimeclass",
    "storageclass",
    "validatingwebhookconfiguration",
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x') {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether a kind is known to be cluster scoped
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    let lower = kind.to_lowercase();
    CLUSTER_SCOPED_KINDS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_regular_kinds() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Service"), "services");
        assert_eq!(pluralize_kind("ConfigMap"), "configmaps");
    }

    #[test]
    fn pluralizes_irregular_kinds() {
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
        assert_eq!(pluralize_kind("StorageClass"), "storageclasses");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
    }

    #[test]
    fn parses_grouped_and_core_versions() {
        assert_eq!(
            parse_api_version("rbac.authorization.k8s.io/v1"),
            ("rbac.authorization.k8s.io".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn knows_common_cluster_scoped_kinds() {
        assert!(is_cluster_scoped_kind("ClusterRole"));
        assert!(is_cluster_scoped_kind("Namespace"));
        assert!(!is_cluster_scoped_kind("Role"));
        assert!(!is_cluster_scoped_kind("Deployment"));
    }
}
