//! Caller authentication
//!
//! Turns the credential material of an inbound request into a
//! [`ClusterAccess`](hub_common::ClusterAccess):
//!
//! - bearer flow: the caller's own token against the resource cluster
//! - membership flow: the kubeconfig stored for `{namespace}/{accessKey}` on
//!   the resource cluster, read with the caller's token
//! - trusted override: an inlined kubeconfig, honoured only when enabled

mod headers;
mod resolver;

pub use headers::{
    bearer_token, caller_token, trusted_override, websocket_token, BEARER_PREFIX,
    DISABLE_AUTH_HEADER, TARGET_KUBECONFIG_HEADER, WS_SUBPROTOCOL, WS_TOKEN_PREFIX,
};
pub use resolver::{CredentialResolver, CredentialStore, KubeCredentialStore, KUBECONFIG_KEY};

#[cfg(test)]
pub use resolver::MockCredentialStore;
