//! Shared building blocks for the hub gateway
//!
//! - [`error`]: the error taxonomy and installer error classification
//! - [`access`]: per-request cluster access descriptors and kube client construction
//! - [`kubeconfig`]: stored kubeconfig documents
//! - [`yaml`]: manifest and values parsing
//! - [`kube_utils`]: namespace, secret and resource-name helpers

#![deny(missing_docs)]

pub mod access;
pub mod error;
pub mod kube_utils;
pub mod kubeconfig;
pub mod yaml;

pub use access::{CallerCredential, ClusterAccess, ClusterEndpoint, Credential};
pub use error::{classify_installer_error, Error, ForbiddenAction, Result};
