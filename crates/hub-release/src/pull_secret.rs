//! Shared image pull secret
//!
//! Charts may ask for a registry pull secret by setting `hubsec.enabled`.
//! One secret serves every release of a namespace, so it is written on
//! create and removed only once the namespace holds no releases at all.

use std::collections::BTreeMap;

use base64::Engine;
use hub_common::{Error, Result};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

/// Name of the shared pull secret
pub const PULL_SECRET_NAME: &str = "hubsec";
/// Secret type of the pull secret
pub const PULL_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Data key holding the docker config
pub const PULL_SECRET_KEY: &str = ".dockerconfigjson";

/// Pull secret content, present only when the gateway is configured with one
#[derive(Clone)]
pub struct PullSecretPolicy {
    docker_config: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for PullSecretPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSecretPolicy")
            .field("docker_config", &"[REDACTED]")
            .finish()
    }
}

impl PullSecretPolicy {
    /// Policy from raw dockerconfigjson bytes
    pub fn new(docker_config: Vec<u8>) -> Self {
        Self {
            docker_config: Zeroizing::new(docker_config),
        }
    }

    /// Policy from base64 encoded dockerconfigjson, as passed in configuration
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::bad_request(format!("invalid pull secret encoding: {}", e)))?;
        serde_json::from_slice::<Value>(&decoded)
            .map_err(|e| Error::bad_request(format!("pull secret is not valid JSON: {}", e)))?;
        Ok(Self::new(decoded))
    }

    /// Whether the merged values of a release ask for the pull secret
    pub fn requested_by(values: &Map<String, Value>) -> bool {
        values
            .get("hubsec")
            .and_then(|h| h.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Secret data map
    pub fn secret_data(&self) -> BTreeMap<String, Vec<u8>> {
        BTreeMap::from([(PULL_SECRET_KEY.to_string(), self.docker_config.to_vec())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requested_only_when_enabled_is_true() {
        let on = json!({"hubsec": {"enabled": true}});
        let off = json!({"hubsec": {"enabled": false}});
        let stringly = json!({"hubsec": {"enabled": "true"}});
        assert!(PullSecretPolicy::requested_by(on.as_object().unwrap()));
        assert!(!PullSecretPolicy::requested_by(off.as_object().unwrap()));
        assert!(!PullSecretPolicy::requested_by(stringly.as_object().unwrap()));
        assert!(!PullSecretPolicy::requested_by(&Map::new()));
    }

    #[test]
    fn decodes_base64_config() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"auths":{}}"#);
        let policy = PullSecretPolicy::from_base64(&encoded).unwrap();
        let data = policy.secret_data();
        assert_eq!(data[PULL_SECRET_KEY], br#"{"auths":{}}"#.to_vec());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            PullSecretPolicy::from_base64("not base64!"),
            Err(Error::BadRequest(_))
        ));
        let encoded = base64::engine::general_purpose::STANDARD.encode("not json");
        assert!(PullSecretPolicy::from_base64(&encoded).is_err());
    }

    #[test]
    fn debug_redacts_content() {
        let policy = PullSecretPolicy::new(b"hunter2".to_vec());
        assert!(!format!("{:?}", policy).contains("hunter2"));
        assert!(format!("{:?}", policy).contains("REDACTED"));
    }
}
