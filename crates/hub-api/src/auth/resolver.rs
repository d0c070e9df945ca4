//! Cluster access resolution

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hub_common::kube_utils::get_secret_data;
use hub_common::{CallerCredential, ClusterAccess, ClusterEndpoint, Error, Result};
use hub_release::Actor;
use tracing::debug;
use zeroize::Zeroizing;

use super::headers::{caller_token, trusted_override};

/// Secret key holding a stored kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Lookup of kubeconfig documents stored on the resource cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Kubeconfig stored under `{namespace}/{key}`, read as `reader`
    async fn kubeconfig(&self, reader: &ClusterAccess, namespace: &str, key: &str) -> Result<Vec<u8>>;
}

/// Reads Secret `{namespace}/{key}` with the caller's own credential
#[derive(Clone, Default)]
pub struct KubeCredentialStore;

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn kubeconfig(&self, reader: &ClusterAccess, namespace: &str, key: &str) -> Result<Vec<u8>> {
        let client = reader.client().await?;
        get_secret_data(&client, key, namespace, KUBECONFIG_KEY).await
    }
}

/// Resolves request credentials into cluster access descriptors
pub struct CredentialResolver {
    resource_cluster: ClusterEndpoint,
    store: Arc<dyn CredentialStore>,
    trust_override: bool,
    membership: bool,
}

impl CredentialResolver {
    /// Create a resolver for callers whose tokens are valid on `resource_cluster`
    pub fn new(resource_cluster: ClusterEndpoint, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            resource_cluster,
            store,
            trust_override: false,
            membership: false,
        }
    }

    /// Honour `disableAuth` + `targetKubeconfig`
    pub fn with_trusted_override(mut self, enabled: bool) -> Self {
        self.trust_override = enabled;
        self
    }

    /// Run release operations as the stored cluster credential instead of the caller
    pub fn with_membership(mut self, enabled: bool) -> Self {
        self.membership = enabled;
        self
    }

    /// The resource cluster's endpoint
    pub fn resource_cluster(&self) -> &ClusterEndpoint {
        &self.resource_cluster
    }

    /// The caller's token bound to the resource cluster
    pub fn bearer(&self, headers: &HeaderMap, websocket: bool) -> Result<ClusterAccess> {
        let token = caller_token(headers, websocket)?;
        ClusterAccess::from_credential(CallerCredential::Bearer(token), &self.resource_cluster)
    }

    /// Credential stored for `{namespace}/{key}`, looked up with the caller's token
    pub async fn stored(
        &self,
        headers: &HeaderMap,
        namespace: &str,
        key: &str,
        websocket: bool,
    ) -> Result<ClusterAccess> {
        if namespace.is_empty() || key.is_empty() {
            return Err(Error::bad_request("namespace and secretName are missing in path"));
        }
        let token = caller_token(headers, websocket)?;
        self.membership_access(token, namespace, key).await
    }

    async fn membership_access(
        &self,
        token: Zeroizing<String>,
        namespace: &str,
        key: &str,
    ) -> Result<ClusterAccess> {
        let reader = ClusterAccess::from_credential(CallerCredential::Bearer(token), &self.resource_cluster)?;
        let doc = self.store.kubeconfig(&reader, namespace, key).await?;
        debug!(namespace = %namespace, key = %key, "loaded stored kubeconfig");
        ClusterAccess::from_credential(CallerCredential::Structured(doc), &self.resource_cluster)
    }

    /// Identity a release operation runs as.
    ///
    /// Order: trusted override, then membership, then the caller's own token.
    /// Only the last is subject to manifest authorization.
    pub async fn actor(&self, headers: &HeaderMap, namespace: &str, key: &str) -> Result<Actor> {
        if self.trust_override {
            if let Some(doc) = trusted_override(headers)? {
                debug!("using inlined kubeconfig");
                let access =
                    ClusterAccess::from_credential(CallerCredential::Structured(doc), &self.resource_cluster)?;
                return Ok(Actor::trusted(access));
            }
        }

        if self.membership {
            let token = caller_token(headers, false).map_err(|e| Error::Unauthorized(e.to_string()))?;
            if namespace.is_empty() || key.is_empty() {
                return Err(Error::bad_request("namespace and secretName are missing in path"));
            }
            let access = self.membership_access(token, namespace, key).await?;
            return Ok(Actor::trusted(access));
        }

        Ok(Actor::gated(self.bearer(headers, false)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use hub_common::Credential;

    const STORED: &str = "clusters:\n- name: shoot\n  cluster:\n    server: https://api.shoot.example.com\nusers:\n- name: admin\n  user:\n    token: shoot-token\n";

    fn endpoint() -> ClusterEndpoint {
        ClusterEndpoint {
            server: "https://hub.example.com".to_string(),
            ca_pem: b"hub-ca".to_vec(),
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    fn store() -> MockCredentialStore {
        let mut store = MockCredentialStore::new();
        store
            .expect_kubeconfig()
            .withf(|reader, ns, key| {
                reader.credential.authorization_header().as_str() == "Bearer caller"
                    && ns == "garden-dev"
                    && key == "shoot1"
            })
            .returning(|_, _, _| Ok(STORED.as_bytes().to_vec()));
        store
    }

    fn token_of(access: &ClusterAccess) -> String {
        match &access.credential {
            Credential::Bearer(t) => t.to_string(),
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[test]
    fn bearer_targets_resource_cluster() {
        let resolver = CredentialResolver::new(endpoint(), Arc::new(MockCredentialStore::new()));
        let access = resolver
            .bearer(&headers(&[("authorization", "Bearer caller")]), false)
            .unwrap();
        assert_eq!(access.endpoint, endpoint());
        assert_eq!(token_of(&access), "caller");
    }

    #[tokio::test]
    async fn stored_credential_uses_its_own_endpoint() {
        let resolver = CredentialResolver::new(endpoint(), Arc::new(store()));
        let access = resolver
            .stored(&headers(&[("authorization", "Bearer caller")]), "garden-dev", "shoot1", false)
            .await
            .unwrap();
        assert_eq!(access.endpoint.server, "https://api.shoot.example.com");
        assert_eq!(token_of(&access), "shoot-token");
    }

    #[tokio::test]
    async fn stored_credential_lookup_errors_pass_through() {
        let mut store = MockCredentialStore::new();
        store
            .expect_kubeconfig()
            .returning(|_, _, _| Err(Error::forbidden("secrets is forbidden")));
        let resolver = CredentialResolver::new(endpoint(), Arc::new(store));
        let err = resolver
            .stored(&headers(&[("authorization", "Bearer caller")]), "garden-dev", "shoot1", false)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn actor_defaults_to_gated_caller() {
        let resolver = CredentialResolver::new(endpoint(), Arc::new(MockCredentialStore::new()));
        let actor = resolver
            .actor(&headers(&[("authorization", "Bearer caller")]), "garden-dev", "shoot1")
            .await
            .unwrap();
        assert!(actor.gated);
        assert_eq!(token_of(&actor.access), "caller");
    }

    #[tokio::test]
    async fn membership_actor_is_trusted() {
        let resolver = CredentialResolver::new(endpoint(), Arc::new(store())).with_membership(true);
        let actor = resolver
            .actor(&headers(&[("authorization", "Bearer caller")]), "garden-dev", "shoot1")
            .await
            .unwrap();
        assert!(!actor.gated);
        assert_eq!(token_of(&actor.access), "shoot-token");
    }

    #[tokio::test]
    async fn membership_without_token_is_unauthorized() {
        let resolver = CredentialResolver::new(endpoint(), Arc::new(MockCredentialStore::new())).with_membership(true);
        let err = resolver.actor(&headers(&[]), "garden-dev", "shoot1").await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn override_ignored_unless_enabled() {
        let encoded = STANDARD.encode(STORED);
        let h = headers(&[("disableauth", "true"), ("targetkubeconfig", encoded.as_str())]);

        let resolver = CredentialResolver::new(endpoint(), Arc::new(MockCredentialStore::new()));
        let err = resolver.actor(&h, "garden-dev", "shoot1").await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let resolver = resolver.with_trusted_override(true);
        let actor = resolver.actor(&h, "garden-dev", "shoot1").await.unwrap();
        assert!(!actor.gated);
        assert_eq!(actor.access.endpoint.server, "https://api.shoot.example.com");
    }
}
