//! WebSocket relay to a cluster API server
//!
//! The upstream connection is dialled before the client's upgrade is
//! accepted, so an unreachable cluster still produces an HTTP error. Once
//! both sides are open, frames are copied one-to-one until either side
//! closes; the other side then gets a close frame within [`CLOSE_GRACE`].

use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use axum::http::header;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use futures::{Sink, SinkExt, StreamExt};
use hub_common::{ClusterAccess, ClusterEndpoint, Error, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use super::http::{pinned_client, transport_error};
use crate::auth::WS_SUBPROTOCOL;

/// Time allowed for the upstream upgrade handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

/// Time allowed for a close frame to reach the remaining side
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Client headers passed through to the upstream handshake
const FORWARDED: &[&str] = &["cookie", "x-forwarded-for", "x-forwarded-proto"];

/// Open upstream connection
pub type UpstreamSocket = WebSocketStream<reqwest::Upgraded>;

/// Headers of the upstream upgrade request.
///
/// The subprotocol is always `binary.k8s.io`; the bearer carrier the client
/// used is replaced by the resolved credential.
pub fn dial_headers(incoming: &HeaderMap, access: &ClusterAccess, origin: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for name in FORWARDED {
        if let Some(value) = incoming.get(*name) {
            headers.insert(*name, value.clone());
        }
    }

    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    headers.insert(
        header::SEC_WEBSOCKET_KEY,
        HeaderValue::from_str(&generate_key()).map_err(|_| Error::internal("invalid websocket key"))?,
    );
    headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));
    headers.insert(
        header::ORIGIN,
        HeaderValue::from_str(origin).map_err(|_| Error::internal("host URL is not a valid Origin"))?,
    );

    let mut authorization = HeaderValue::from_str(access.credential.authorization_header().as_str())
        .map_err(|_| Error::internal("credential is not a valid header value"))?;
    authorization.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, authorization);
    Ok(headers)
}

/// Perform the upgrade handshake against `url` and frame the connection
pub async fn dial(endpoint: &ClusterEndpoint, url: &str, headers: HeaderMap) -> Result<UpstreamSocket> {
    let client = pinned_client(&endpoint.ca_pem, true)?;
    debug!(url = %url, "dialling upstream websocket");

    let handshake = async {
        let response = client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::BadGateway(format!(
                "Cluster returned {} instead of 101: {}",
                status, body
            )));
        }

        response
            .upgrade()
            .await
            .map_err(|e| Error::BadGateway(format!("Failed to upgrade upstream connection: {}", e)))
    };

    let upgraded = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| Error::ServiceUnavailable("websocket handshake with cluster timed out".to_string()))??;

    Ok(WebSocketStream::from_raw_socket(upgraded, Role::Client, None).await)
}

/// Client frame as an upstream frame
pub fn to_upstream(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

/// Upstream frame as a client frame; raw frames have no counterpart
pub fn to_client(message: Message) -> Option<ws::Message> {
    match message {
        Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
        Message::Binary(data) => Some(ws::Message::Binary(data)),
        Message::Ping(data) => Some(ws::Message::Ping(data)),
        Message::Pong(data) => Some(ws::Message::Pong(data)),
        Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        }))),
        Message::Frame(_) => None,
    }
}

async fn close<S, M>(sink: &mut S, message: M)
where
    S: Sink<M> + Unpin,
{
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = sink.send(message).await;
        let _ = sink.close().await;
    })
    .await;
}

/// Copy frames between the client and the cluster until either side is done
pub async fn relay<S>(client: WebSocket, upstream: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    info!("websocket session started");

    loop {
        tokio::select! {
            incoming = client_rx.next() => match incoming {
                Some(Ok(ws::Message::Close(frame))) => {
                    close(&mut upstream_tx, to_upstream(ws::Message::Close(frame))).await;
                    break;
                }
                Some(Ok(message)) => {
                    if let Err(e) = upstream_tx.send(to_upstream(message)).await {
                        debug!(error = %e, "upstream send failed");
                        close(&mut client_tx, ws::Message::Close(None)).await;
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "client websocket error");
                    close(&mut upstream_tx, Message::Close(None)).await;
                    break;
                }
                None => {
                    close(&mut upstream_tx, Message::Close(None)).await;
                    break;
                }
            },
            outgoing = upstream_rx.next() => match outgoing {
                Some(Ok(Message::Close(frame))) => {
                    if let Some(message) = to_client(Message::Close(frame)) {
                        close(&mut client_tx, message).await;
                    }
                    break;
                }
                Some(Ok(message)) => {
                    let Some(message) = to_client(message) else { continue };
                    if let Err(e) = client_tx.send(message).await {
                        debug!(error = %e, "client send failed");
                        close(&mut upstream_tx, Message::Close(None)).await;
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "upstream websocket error");
                    close(&mut client_tx, ws::Message::Close(None)).await;
                    break;
                }
                None => {
                    close(&mut client_tx, ws::Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    info!("websocket session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use hub_common::Credential;
    use zeroize::Zeroizing;

    fn access() -> ClusterAccess {
        ClusterAccess {
            endpoint: ClusterEndpoint {
                server: "https://api.shoot.example.com".to_string(),
                ca_pem: Vec::new(),
            },
            credential: Credential::Basic {
                username: "admin".to_string(),
                password: Zeroizing::new("secret".to_string()),
            },
        }
    }

    #[test]
    fn dial_headers_rewrite_protocol_and_credential() {
        let mut incoming = HeaderMap::new();
        incoming.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("base64url.bearer.authorization.k8s.io.caller, binary.k8s.io"),
        );
        incoming.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        incoming.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let headers = dial_headers(&incoming, &access(), "https://hub.example.com").unwrap();
        assert_eq!(headers[header::SEC_WEBSOCKET_PROTOCOL], "binary.k8s.io");
        assert_eq!(headers[header::ORIGIN], "https://hub.example.com");
        assert_eq!(headers[header::COOKIE], "session=1");
        assert_eq!(headers["x-forwarded-for"], "10.0.0.1");
        assert_eq!(headers[header::UPGRADE], "websocket");
        assert!(headers[header::AUTHORIZATION].to_str().unwrap().starts_with("Basic "));
        assert!(!headers[header::SEC_WEBSOCKET_KEY].is_empty());
    }

    #[test]
    fn frames_map_one_to_one() {
        assert_eq!(to_upstream(ws::Message::Text("hi".into())), Message::Text("hi".into()));
        assert_eq!(
            to_upstream(ws::Message::Binary(Bytes::from_static(&[1, 2]))),
            Message::Binary(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(
            to_upstream(ws::Message::Close(Some(ws::CloseFrame { code: 1000, reason: "bye".into() }))),
            Message::Close(Some(CloseFrame { code: CloseCode::Normal, reason: "bye".into() }))
        );

        match to_client(Message::Close(Some(CloseFrame { code: CloseCode::Away, reason: "".into() }))) {
            Some(ws::Message::Close(Some(frame))) => assert_eq!(frame.code, 1001),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(to_client(Message::Ping(Bytes::new())), Some(ws::Message::Ping(_))));
    }
}
