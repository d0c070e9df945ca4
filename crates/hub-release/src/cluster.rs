//! kube-backed [`ClusterOps`]

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use hub_common::kube_utils::{
    delete_secret, ensure_namespace, is_cluster_scoped_kind, parse_api_version, pluralize_kind,
    upsert_secret,
};
use hub_common::{ClusterAccess, Result};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{GroupVersionKind, PostParams};
use kube::discovery::{pinned_kind, Scope};
use kube::{Api, Client};
use tracing::debug;

use crate::installer::{AccessCheck, ClusterOps, ResourceInfo, ResourceKind};

/// SelfSubjectAccessReviews in flight at once
pub const REVIEW_CONCURRENCY: usize = 8;

/// Run `review` for every check, a bounded number at a time, answers in check order
async fn review_all<'a, F, Fut>(checks: &'a [AccessCheck], review: F) -> Result<Vec<bool>>
where
    F: Fn(&'a AccessCheck) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    stream::iter(checks)
        .map(review)
        .buffered(REVIEW_CONCURRENCY)
        .try_collect()
        .await
}

/// Pins the closure's signature as higher-ranked so the enclosing future can be proven `Send`
fn reviewer<F>(f: F) -> F
where
    F: for<'c> Fn(&'c AccessCheck) -> BoxFuture<'c, Result<bool>>,
{
    f
}

/// Talks to the target cluster with the actor's own credential
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeClusterOps;

impl KubeClusterOps {
    async fn resolve_one(client: &Client, kind: &ResourceKind) -> ResourceInfo {
        let (group, version) = parse_api_version(&kind.api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, &kind.kind);

        match pinned_kind(client, &gvk).await {
            Ok((resource, caps)) => ResourceInfo {
                group: resource.group,
                plural: resource.plural,
                namespaced: matches!(caps.scope, Scope::Namespaced),
            },
            Err(e) => {
                // Kinds introduced by the same manifest (CRDs) are not served yet.
                debug!(api_version = %kind.api_version, kind = %kind.kind, error = %e, "discovery miss, using fallback naming");
                ResourceInfo {
                    group,
                    plural: pluralize_kind(&kind.kind),
                    namespaced: !is_cluster_scoped_kind(&kind.kind),
                }
            }
        }
    }

    async fn review(api: &Api<SelfSubjectAccessReview>, check: &AccessCheck) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(check.group.clone()),
                    resource: Some(check.resource.clone()),
                    namespace: check.namespace.clone(),
                    verb: Some(check.verb.clone()),
                    ..Default::default()
                }),
                non_resource_attributes: None,
            },
            ..Default::default()
        };

        let created = api.create(&PostParams::default(), &review).await?;
        Ok(created.status.is_some_and(|s| s.allowed))
    }
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn ensure_namespace(&self, access: &ClusterAccess, namespace: &str) -> Result<()> {
        let client = access.client().await?;
        ensure_namespace(&client, namespace).await
    }

    async fn resolve_resources(
        &self,
        access: &ClusterAccess,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceInfo>> {
        let client = access.client().await?;
        let mut resolved = Vec::with_capacity(kinds.len());
        for kind in kinds {
            resolved.push(Self::resolve_one(&client, kind).await);
        }
        Ok(resolved)
    }

    async fn can_i(&self, access: &ClusterAccess, checks: &[AccessCheck]) -> Result<Vec<bool>> {
        let client = access.client().await?;
        let api: Api<SelfSubjectAccessReview> = Api::all(client);
        review_all(checks, reviewer(move |check| {
            let api = api.clone();
            Box::pin(async move { Self::review(&api, check).await })
        }))
        .await
    }

    async fn upsert_secret(
        &self,
        access: &ClusterAccess,
        namespace: &str,
        name: &str,
        type_: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let client = access.client().await?;
        upsert_secret(&client, name, namespace, type_, data).await
    }

    async fn delete_secret(&self, access: &ClusterAccess, namespace: &str, name: &str) -> Result<()> {
        let client = access.client().await?;
        delete_secret(&client, name, namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn check(resource: &str) -> AccessCheck {
        AccessCheck {
            group: String::new(),
            resource: resource.to_string(),
            namespace: Some("default".to_string()),
            verb: "create".to_string(),
        }
    }

    #[tokio::test]
    async fn reviews_are_bounded_and_keep_order() {
        let checks: Vec<_> = (0..30).map(|i| check(&format!("r{}", i))).collect();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let answers = review_all(&checks, |check| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(check.resource != "r3")
            }
        })
        .await
        .unwrap();

        assert_eq!(answers.len(), 30);
        assert!(!answers[3]);
        assert!(answers.iter().enumerate().all(|(i, allowed)| *allowed == (i != 3)));
        assert!(peak.load(Ordering::SeqCst) <= REVIEW_CONCURRENCY);
    }

    #[tokio::test]
    async fn review_failure_fails_the_batch() {
        let checks = vec![check("pods"), check("secrets")];
        let err = review_all(&checks, |check| async move {
            if check.resource == "secrets" {
                Err(hub_common::Error::internal("review rejected"))
            } else {
                Ok(true)
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "review rejected");
    }
}
