//! The single HTTP endpoint everything rides on: `POST /`.
//!
//! A request without an `osu-token` header is a login; anything else is a
//! poll that drains the session's outbound queue. Either way the reply is
//! HTTP 200 with a `cho-token` header and a body of framed packets.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use tracing::error;
use uuid::Uuid;

use crate::login;
use crate::state::SharedState;

/// A bancho-level reply: the `cho-token` header value and the packet body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanchoResponse {
    pub cho_token: String,
    pub body: Bytes,
}

impl BanchoResponse {
    pub fn success(cho_token: String, body: Bytes) -> Self {
        Self { cho_token, body }
    }

    /// A rejected login: the client reads the body, then drops the
    /// connection state it never got a token for.
    pub fn failure(body: Bytes) -> Self {
        Self {
            cho_token: "no".to_owned(),
            body,
        }
    }
}

impl IntoResponse for BanchoResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, self.body).into_response();

        if let Ok(value) = HeaderValue::from_str(&self.cho_token) {
            response.headers_mut().insert("cho-token", value);
        }

        response
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new().route("/", post(bancho_endpoint)).with_state(state)
}

async fn bancho_endpoint(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match headers.get("osu-token") {
        Some(token) => handle_packet_request(&state, token.to_str().unwrap_or_default()),
        None => {
            let ip = client_ip(&headers).unwrap_or_else(|| peer.ip().to_string());
            login::handle_login(&state, &body, ip).await
        }
    };

    match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            error!("request failed: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Drains the queue of the session named by the request's token. Unknown
/// tokens (including unparseable ones) get an empty body with their token
/// echoed back; the client will log in again.
pub fn handle_packet_request(
    state: &SharedState,
    raw_token: &str,
) -> anyhow::Result<BanchoResponse> {
    let Ok(token_id) = Uuid::parse_str(raw_token) else {
        return Ok(BanchoResponse::success(raw_token.to_owned(), Bytes::new()));
    };

    Ok(match state.sessions().dequeue(&token_id) {
        Some(body) => BanchoResponse::success(token_id.to_string(), body),
        None => BanchoResponse::success(raw_token.to_owned(), Bytes::new()),
    })
}

/// The client address as the reverse proxy reports it.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(ip) = headers.get("x-real-ip") {
        return ip.to_str().ok().map(str::to_owned);
    }

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_owned())
}
