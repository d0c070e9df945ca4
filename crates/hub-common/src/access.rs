//! Cluster access descriptors
//!
//! A [`ClusterAccess`] names the API server, the CA that server's certificate
//! must chain to, and the credential to present. Descriptors are built per
//! request and never persisted.
//!
//! Callers hand in a [`CallerCredential`]: either a raw bearer token that is
//! valid against a known endpoint, or a structured kubeconfig document that
//! carries its own endpoint. [`ClusterAccess::from_credential`] is the single
//! place both shapes are turned into a descriptor.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::config::{KubeConfigOptions, Kubeconfig as KubeKubeconfig};
use kube::{Client, Config};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::kubeconfig::Kubeconfig;

/// Default connect timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Credential presented to a cluster
#[derive(Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>`
    Bearer(Zeroizing<String>),
    /// `Authorization: Basic <base64(user:password)>`
    Basic {
        /// Username
        username: String,
        /// Password
        password: Zeroizing<String>,
    },
}

impl Credential {
    /// Value of the `Authorization` header for this credential
    pub fn authorization_header(&self) -> Zeroizing<String> {
        match self {
            Credential::Bearer(token) => Zeroizing::new(format!("Bearer {}", token.as_str())),
            Credential::Basic { username, password } => {
                let raw = Zeroizing::new(format!("{}:{}", username, password.as_str()));
                Zeroizing::new(format!("Basic {}", STANDARD.encode(raw.as_bytes())))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// API server location plus the CA its serving certificate chains to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// API server URL, e.g. `https://api.example.com:6443`
    pub server: String,
    /// PEM encoded CA bundle
    pub ca_pem: Vec<u8>,
}

/// Credential material supplied by a caller
pub enum CallerCredential {
    /// A bearer token valid against an endpoint the gateway already knows
    Bearer(Zeroizing<String>),
    /// A kubeconfig document carrying its own endpoint and credential
    Structured(Vec<u8>),
}

impl fmt::Debug for CallerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerCredential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            CallerCredential::Structured(doc) => write!(f, "Structured({} bytes)", doc.len()),
        }
    }
}

/// Resolved access to one cluster as one identity
#[derive(Clone, Debug)]
pub struct ClusterAccess {
    /// Where to connect
    pub endpoint: ClusterEndpoint,
    /// What to present
    pub credential: Credential,
}

impl ClusterAccess {
    /// Build a descriptor from caller-supplied credential material.
    ///
    /// Bearer tokens are bound to `endpoint`; structured documents ignore it
    /// and use the endpoint they describe.
    pub fn from_credential(credential: CallerCredential, endpoint: &ClusterEndpoint) -> Result<Self> {
        match credential {
            CallerCredential::Bearer(token) => {
                if token.trim().is_empty() {
                    return Err(Error::Unauthorized("empty bearer token".to_string()));
                }
                Ok(Self {
                    endpoint: endpoint.clone(),
                    credential: Credential::Bearer(token),
                })
            }
            CallerCredential::Structured(doc) => Self::from_kubeconfig(&doc),
        }
    }

    /// Extract the first cluster and the first user from a kubeconfig.
    ///
    /// The user's token is preferred over its username/password pair.
    pub fn from_kubeconfig(doc: &[u8]) -> Result<Self> {
        let kubeconfig = Kubeconfig::parse(doc)?;

        let cluster = kubeconfig
            .clusters
            .first()
            .ok_or_else(|| Error::internal("No cluster found in marshaled kubeconfig"))?;

        let ca_pem = match cluster.cluster.certificate_authority_data.as_deref() {
            Some(data) if !data.trim().is_empty() => STANDARD
                .decode(data.trim())
                .map_err(|e| Error::internal(format!("Invalid certificate-authority-data: {}", e)))?,
            _ => Vec::new(),
        };

        let credential = kubeconfig
            .users
            .first()
            .and_then(|named| {
                let user = &named.user;
                match (&user.token, &user.username, &user.password) {
                    (Some(token), _, _) if !token.is_empty() => {
                        Some(Credential::Bearer(Zeroizing::new(token.clone())))
                    }
                    (_, Some(username), Some(password))
                        if !username.is_empty() && !password.is_empty() =>
                    {
                        Some(Credential::Basic {
                            username: username.clone(),
                            password: Zeroizing::new(password.clone()),
                        })
                    }
                    _ => None,
                }
            })
            .ok_or_else(|| Error::internal("No credentials found in marshaled kubeconfig"))?;

        Ok(Self {
            endpoint: ClusterEndpoint {
                server: cluster.cluster.server.clone(),
                ca_pem,
            },
            credential,
        })
    }

    /// Render this descriptor as a single-context kubeconfig document.
    ///
    /// JSON is valid YAML, so the result can be fed to anything that reads
    /// kubeconfig files.
    pub fn to_kubeconfig(&self) -> Zeroizing<String> {
        let mut cluster = serde_json::json!({ "server": self.endpoint.server });
        if !self.endpoint.ca_pem.is_empty() {
            cluster["certificate-authority-data"] =
                serde_json::Value::String(STANDARD.encode(&self.endpoint.ca_pem));
        }

        let user = match &self.credential {
            Credential::Bearer(token) => serde_json::json!({ "token": token.as_str() }),
            Credential::Basic { username, password } => serde_json::json!({
                "username": username,
                "password": password.as_str(),
            }),
        };

        let doc = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": "target", "cluster": cluster }],
            "users": [{ "name": "actor", "user": user }],
            "contexts": [{ "name": "target", "context": { "cluster": "target", "user": "actor" } }],
            "current-context": "target",
        });
        Zeroizing::new(doc.to_string())
    }

    /// Build a kube client acting as this identity against this cluster
    pub async fn client(&self) -> Result<Client> {
        let rendered = self.to_kubeconfig();
        let kubeconfig = KubeKubeconfig::from_yaml(rendered.as_str())
            .map_err(|e| Error::internal(format!("failed to load kubeconfig: {}", e)))?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::internal(format!("failed to build client config: {}", e)))?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

        Client::try_from(config)
            .map_err(|e| Error::internal(format!("failed to create client: {}", e)))
    }
}
