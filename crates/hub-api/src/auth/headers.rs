//! Credential extraction from request headers

use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine};
use hub_common::{Error, Result};
use zeroize::Zeroizing;

/// Scheme prefix of the `Authorization` header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Prefix of the bearer token carried in `Sec-WebSocket-Protocol`
pub const WS_TOKEN_PREFIX: &str = "base64url.bearer.authorization.k8s.io.";

/// Subprotocol spoken on both sides of a proxied WebSocket
pub const WS_SUBPROTOCOL: &str = "binary.k8s.io";

/// Header switching on the trusted-caller override
pub const DISABLE_AUTH_HEADER: &str = "disableAuth";

/// Header carrying the base64 kubeconfig for the trusted-caller override
pub const TARGET_KUBECONFIG_HEADER: &str = "targetKubeconfig";

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<Zeroizing<String>> {
    header(headers, AUTHORIZATION)
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| Zeroizing::new(t.to_string()))
        .ok_or_else(|| Error::bad_request("No token found in Authorization header"))
}

/// Token from `Sec-WebSocket-Protocol: base64url.bearer.authorization.k8s.io.<token>, binary.k8s.io`
pub fn websocket_token(headers: &HeaderMap) -> Result<Zeroizing<String>> {
    header(headers, SEC_WEBSOCKET_PROTOCOL)
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find_map(|p| p.strip_prefix(WS_TOKEN_PREFIX))
        .filter(|t| !t.is_empty())
        .map(|t| Zeroizing::new(t.to_string()))
        .ok_or_else(|| Error::bad_request("No token found in Sec-WebSocket-Protocol header for ws request"))
}

/// Token of either carrier
pub fn caller_token(headers: &HeaderMap, websocket: bool) -> Result<Zeroizing<String>> {
    if websocket {
        websocket_token(headers)
    } else {
        bearer_token(headers)
    }
}

/// Kubeconfig inlined by a trusted caller.
///
/// `None` unless `disableAuth` parses as true. A true flag without a
/// decodable `targetKubeconfig` is a bad request.
pub fn trusted_override(headers: &HeaderMap) -> Result<Option<Vec<u8>>> {
    let enabled = match header(headers, DISABLE_AUTH_HEADER) {
        None | Some("") => false,
        Some(raw) => parse_bool(raw)
            .ok_or_else(|| Error::bad_request("Disable auth header could not be parsed"))?,
    };
    if !enabled {
        return Ok(None);
    }

    let encoded = header(headers, TARGET_KUBECONFIG_HEADER)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::bad_request("Kubeconfig header is missing"))?;
    STANDARD
        .decode(encoded.trim())
        .map(Some)
        .map_err(|_| Error::bad_request("Kubeconfig could not be base64 decoded"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
