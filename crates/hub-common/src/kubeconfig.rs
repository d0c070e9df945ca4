//! Stored kubeconfig documents
//!
//! Only the fields the gateway reads are modelled; everything else in the
//! document is ignored during deserialization.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kubeconfig structure
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Clusters
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// Users
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

/// Cluster entry in kubeconfig
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Cluster name
    #[serde(default)]
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// User entry in kubeconfig
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NamedUser {
    /// User name
    #[serde(default)]
    pub name: String,
    /// User config
    #[serde(default)]
    pub user: UserConfig,
}

/// User configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Basic-auth username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic-auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Kubeconfig {
    /// Parse a kubeconfig from YAML (or JSON) bytes
    pub fn parse(doc: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(doc)
            .map_err(|e| Error::internal(format!("Failed to parse kubeconfig: {}", e)))
    }
}
