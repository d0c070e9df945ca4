//! HTTP forwarding to a cluster API server

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures::{Stream, TryStreamExt};
use hub_common::{ClusterAccess, ClusterEndpoint, Error, Result};
use tracing::debug;

/// Connect timeout for upstream dials
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest request body forwarded upstream (10 MB)
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Connection-scoped headers that are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Byte stream of an upstream response body
pub type BodyStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// A request ready to be sent to a cluster
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL on the cluster
    pub url: String,
    /// Headers to send, credential included
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// A cluster's answer, body still streaming
pub struct UpstreamResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: BodyStream,
}

/// Sends requests to a cluster, trusting only that cluster's CA
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send `request` to the server of `endpoint`
    async fn send(&self, endpoint: &ClusterEndpoint, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

/// Reported when a cluster CA cannot be used as the trust store
pub const CA_POOL_ERROR: &str = "Couldn't add CA to cert pool";

/// reqwest client built per request around the endpoint's CA
#[derive(Clone, Default)]
pub struct ReqwestUpstream;

/// Build a client whose trust store holds only `ca_pem`.
///
/// A missing or unreadable CA is an error; the built-in roots are never
/// used. `http1` restricts the client to HTTP/1.1, which protocol upgrades
/// require.
pub fn pinned_client(ca_pem: &[u8], http1: bool) -> Result<reqwest::Client> {
    let certs = reqwest::Certificate::from_pem_bundle(ca_pem).unwrap_or_default();
    if certs.is_empty() {
        return Err(Error::internal(CA_POOL_ERROR));
    }

    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .tls_built_in_root_certs(false);
    for cert in certs {
        builder = builder.add_root_certificate(cert);
    }
    if http1 {
        builder = builder.http1_only();
    }

    builder
        .build()
        .map_err(|e| Error::BadGateway(format!("Failed to create upstream client: {}", e)))
}

/// Classify a transport failure: unreachable clusters are 503, the rest 502
pub fn transport_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::ServiceUnavailable(format!("Unable to reach cluster: {}", e))
    } else {
        Error::BadGateway(format!("Cluster request failed: {}", e))
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, endpoint: &ClusterEndpoint, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let client = pinned_client(&endpoint.ca_pem, false)?;
        debug!(method = %request.method, url = %request.url, "forwarding request");

        let mut builder = client
            .request(request.method, &request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        let response = builder.send().await.map_err(transport_error)?;

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: Box::pin(response.bytes_stream().map_err(std::io::Error::other)),
        })
    }
}

/// `server` joined with a path that already starts with `/`, plus the query
pub fn upstream_url(server: &str, path: &str, query: Option<&str>) -> String {
    let base = server.trim_end_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
        _ => format!("{}{}", base, path),
    }
}

/// Copy of `incoming` without hop-by-hop headers, `Host` and the caller's
/// credential, carrying `access`'s credential instead
pub fn forward_headers(incoming: &HeaderMap, access: &ClusterAccess) -> Result<HeaderMap> {
    let mut headers = strip_hop_by_hop(incoming);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::SEC_WEBSOCKET_PROTOCOL);

    let mut authorization = HeaderValue::from_str(access.credential.authorization_header().as_str())
        .map_err(|_| Error::internal("credential is not a valid header value"))?;
    authorization.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, authorization);
    Ok(headers)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}

/// Turn an upstream response into the client's response, streaming the body
pub fn into_response(upstream: UpstreamResponse) -> Result<Response> {
    let mut builder = Response::builder().status(upstream.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = strip_hop_by_hop(&upstream.headers);
    }
    builder
        .body(Body::from_stream(upstream.body))
        .map_err(|e| Error::internal(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_common::Credential;
    use zeroize::Zeroizing;

    fn access() -> ClusterAccess {
        ClusterAccess {
            endpoint: ClusterEndpoint {
                server: "https://api.shoot.example.com/".to_string(),
                ca_pem: Vec::new(),
            },
            credential: Credential::Bearer(Zeroizing::new("shoot-token".to_string())),
        }
    }

    #[test]
    fn builds_upstream_url() {
        assert_eq!(
            upstream_url("https://api.example.com/", "/api/v1/pods", Some("watch=true")),
            "https://api.example.com/api/v1/pods?watch=true"
        );
        assert_eq!(upstream_url("https://api.example.com", "/api", Some("")), "https://api.example.com/api");
        assert_eq!(upstream_url("https://api.example.com", "/api", None), "https://api.example.com/api");
    }

    #[test]
    fn replaces_caller_credential() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        incoming.insert(header::HOST, HeaderValue::from_static("gateway.example.com"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let headers = forward_headers(&incoming, &access()).unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer shoot-token");
        assert!(headers[header::AUTHORIZATION].is_sensitive());
        assert_eq!(headers[header::ACCEPT], "application/json");
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
    }

    #[tokio::test]
    async fn streams_upstream_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"{\"a\":")), Ok(Bytes::from_static(b"1}"))];

        let response = into_response(UpstreamResponse {
            status: StatusCode::CREATED,
            headers,
            body: Box::pin(futures::stream::iter(chunks)),
        })
        .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"a\":1}");
    }

    #[test]
    fn missing_or_unreadable_ca_is_rejected() {
        for ca in [&b""[..], &b"not a certificate"[..]] {
            let err = pinned_client(ca, false).unwrap_err();
            assert_eq!(err.status_code(), 500);
            assert_eq!(err.to_string(), CA_POOL_ERROR);
        }
    }

    #[tokio::test]
    async fn cluster_without_ca_is_never_dialled() {
        let request = UpstreamRequest {
            method: Method::GET,
            url: "https://api.shoot.example.com/api".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let err = match ReqwestUpstream.send(&access().endpoint, request).await {
            Ok(_) => panic!("request without a CA must fail"),
            Err(e) => e,
        };
        assert_eq!(err.to_string(), CA_POOL_ERROR);
    }
}
