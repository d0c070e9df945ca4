//! Chart repository metadata and HTTP access
//!
//! Repositories are declared as `AppRepository` resources in the gateway's
//! own namespace. The resource names the repository URL and, optionally, the
//! secrets holding an `Authorization` header value and extra CA certificates.

use std::time::Duration;

use async_trait::async_trait;
use hub_common::kube_utils::get_secret_data;
use hub_common::{Error, Result};
use kube::{Api, Client, CustomResource};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

/// Timeout for index and archive downloads
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Largest index or archive the gateway will download (20 MiB)
pub const MAX_DOWNLOAD_SIZE: usize = 20 * 1024 * 1024;

/// Reference to one key of a secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// A value sourced from a secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    /// Secret key holding the value
    pub secret_key_ref: SecretKeyRef,
}

/// Authentication settings of a repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AppRepositoryAuth {
    /// Secret holding the `Authorization` header value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<SecretSource>,
    /// Secret holding additional PEM CA certificates
    #[serde(default, rename = "customCA", skip_serializing_if = "Option::is_none")]
    pub custom_ca: Option<SecretSource>,
}

/// Spec of an `AppRepository`
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeapps.com",
    version = "v1alpha1",
    kind = "AppRepository",
    plural = "apprepositories",
    namespaced
)]
pub struct AppRepositorySpec {
    /// Repository base URL
    pub url: String,
    /// Repository type, `helm` when absent
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Authentication settings
    #[serde(default)]
    pub auth: AppRepositoryAuth,
}

/// Everything needed to talk to one repository
#[derive(Clone, Debug, Default)]
pub struct RepositoryConfig {
    /// AppRepository name
    pub name: String,
    /// Repository base URL
    pub url: String,
    /// `Authorization` header value
    pub auth_header: Option<Zeroizing<String>>,
    /// Additional PEM CA certificates
    pub custom_ca: Option<Vec<u8>>,
}

impl RepositoryConfig {
    /// URL of the repository's `index.yaml`
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.url.trim().trim_end_matches('/'))
    }
}

/// Lookup of repository metadata by AppRepository name
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Load the repository and its secrets
    async fn repository(&self, name: &str) -> Result<RepositoryConfig>;
}

/// Reads AppRepository resources and their secrets from one namespace
pub struct KubeRepositoryStore {
    client: Client,
    namespace: String,
}

impl KubeRepositoryStore {
    /// Create a store reading from `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn secret_value(&self, source: &SecretSource) -> Result<Vec<u8>> {
        get_secret_data(
            &self.client,
            &source.secret_key_ref.name,
            &self.namespace,
            &source.secret_key_ref.key,
        )
        .await
    }
}

#[async_trait]
impl RepositoryStore for KubeRepositoryStore {
    async fn repository(&self, name: &str) -> Result<RepositoryConfig> {
        let api: Api<AppRepository> = Api::namespaced(self.client.clone(), &self.namespace);
        let repo = api.get(name).await?;

        let auth_header = match &repo.spec.auth.header {
            Some(source) => {
                let raw = self.secret_value(source).await?;
                let value = String::from_utf8(raw)
                    .map_err(|_| Error::internal("repository auth header is not valid UTF-8"))?;
                Some(Zeroizing::new(value))
            }
            None => None,
        };

        let custom_ca = match &repo.spec.auth.custom_ca {
            Some(source) => Some(self.secret_value(source).await?),
            None => None,
        };

        debug!(repository = %name, url = %repo.spec.url, "loaded repository metadata");

        Ok(RepositoryConfig {
            name: name.to_string(),
            url: repo.spec.url,
            auth_header,
            custom_ca,
        })
    }
}

/// Downloads documents from a chart repository
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// GET `url` with the repository's headers and trust settings
    async fn fetch(&self, repo: &RepositoryConfig, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed repository client
pub struct ReqwestRepositoryClient {
    user_agent: String,
}

impl ReqwestRepositoryClient {
    /// Create a client sending `user_agent` on every request
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    fn client_for(&self, repo: &RepositoryConfig) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = &repo.auth_header {
            let mut value = HeaderValue::from_str(auth.as_str())
                .map_err(|_| Error::internal("repository auth header is not a valid header value"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .user_agent(self.user_agent.as_str())
            .default_headers(headers);

        if let Some(pem) = &repo.custom_ca {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| Error::internal(format!("Invalid repository CA certificate: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        builder
            .build()
            .map_err(|e| Error::internal(format!("Failed to create repository client: {}", e)))
    }
}

#[async_trait]
impl RepositoryClient for ReqwestRepositoryClient {
    async fn fetch(&self, repo: &RepositoryConfig, url: &str) -> Result<Vec<u8>> {
        let client = self.client_for(repo)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::internal(format!("chart download request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            debug!(url = %url, status = %response.status(), "repository returned non-200");
            return Err(Error::internal("chart download request failed"));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_DOWNLOAD_SIZE as u64)
        {
            return Err(Error::internal(format!(
                "repository document at {} exceeds {} bytes",
                url, MAX_DOWNLOAD_SIZE
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::internal(format!("failed to read repository response: {}", e)))?;
        Ok(body.to_vec())
    }
}
