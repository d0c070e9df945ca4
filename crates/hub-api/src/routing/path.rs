//! Prefix handling for `/{clusterNamespace}/{accessKey}/...` paths

use hub_common::{Error, Result};

/// `/{namespace}/{key}`
///
/// Fails when either segment is empty.
pub fn cluster_prefix(namespace: &str, key: &str) -> Result<String> {
    if namespace.is_empty() || key.is_empty() {
        return Err(Error::bad_request("namespace and secretName are missing in path"));
    }
    Ok(format!("/{}/{}", namespace, key))
}

/// Prefix of requests forwarded to the target cluster
///
/// # Examples
///
/// ```
/// use hub_api::routing::reverse_proxy_prefix;
///
/// assert_eq!(
///     reverse_proxy_prefix("garden-dev", "shoot1").unwrap(),
///     "/garden-dev/shoot1/reverse-proxy/v1"
/// );
/// ```
pub fn reverse_proxy_prefix(namespace: &str, key: &str) -> Result<String> {
    Ok(format!("{}/reverse-proxy/v1", cluster_prefix(namespace, key)?))
}

/// Prefix of requests forwarded to the resource cluster
pub fn resource_cluster_prefix(namespace: &str, key: &str) -> Result<String> {
    Ok(format!("{}/resourcecluster", reverse_proxy_prefix(namespace, key)?))
}

/// Strip an exact prefix and return the remaining path, always rooted at `/`.
///
/// # Examples
///
/// ```
/// use hub_api::routing::upstream_path;
///
/// assert_eq!(
///     upstream_path("/ns/key/reverse-proxy/v1/api/v1/namespaces", "/ns/key/reverse-proxy/v1"),
///     Some("/api/v1/namespaces".to_string())
/// );
/// assert_eq!(upstream_path("/other/api", "/ns/key/reverse-proxy/v1"), None);
/// ```
pub fn upstream_path(full_path: &str, prefix: &str) -> Option<String> {
    let rest = full_path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        // `/ns/key/reverse-proxy/v1abc` only shares characters with the prefix
        None
    }
}
