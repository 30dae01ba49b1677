//! The per-request state machine: receive headers, authorize, route,
//! forward, finish. Exactly one response is produced per request.

use std::collections::BTreeMap;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse};
use base64::Engine;
use futures_util::StreamExt;

use relay_quotas::{get_upstream, Admission, AuthRequest};

use crate::errors::ProxyError;
use crate::forwarder::{self, ForwardError};
use crate::state::AppState;

/// Entry point wired into the `actix-web` router for every method and path.
///
/// The body is taken as `web::Payload`, a raw chunk stream, rather than
/// `web::Bytes` — `web::Bytes` forces `actix-web` to fully buffer the body
/// before this handler even starts, which would serialize AUTHORIZING behind
/// the entire upload. Per the lifecycle's ordering rules only FORWARDING is
/// gated on the body being fully received; AUTHORIZING and ROUTING run
/// concurrently with body accumulation in [`process`].
pub async fn handle(req: HttpRequest, payload: web::Payload, state: web::Data<AppState>) -> HttpResponse {
    match process(&req, payload, &state).await {
        Ok(response) => response,
        Err(error) => error.to_response(&state.config.auth.realm),
    }
}

async fn process(
    req: &HttpRequest,
    payload: web::Payload,
    state: &AppState,
) -> Result<HttpResponse, ProxyError> {
    let (username, password) = basic_credentials(req)?;

    let original_headers = header_map(req);
    let protocol = format!("{:?}", req.version());
    let method = req.method().to_string();

    let auth_request = AuthRequest {
        username,
        password,
        protocol: protocol.clone(),
        method: method.clone(),
        url: req.uri().to_string(),
        length: content_length(req),
        ip: client_ip(req),
    };

    // Drives AUTHORIZING+ROUTING and body accumulation concurrently: the
    // body may still be arriving while the auth call is in flight. Only
    // once both finish does FORWARDING start, satisfying "forwarding starts
    // only when ADMITTED and the body is fully received" without holding
    // the body hostage behind auth, or vice versa.
    let (admission, body) = tokio::join!(admit(&auth_request, state), collect_body(payload));
    let (auth_headers, admission) = admission?;
    let body = body?;

    let mut outgoing_headers = original_headers;
    for (name, value) in &auth_headers {
        outgoing_headers.insert(name.clone(), value.clone());
    }
    for (name, value) in &admission.upstream.headers {
        outgoing_headers.insert(name.clone(), value.clone());
    }

    let forwarded = forwarder::forward(&admission.upstream, &method, &protocol, &outgoing_headers, &body)
        .await
        .map_err(|error: ForwardError| ProxyError::UpstreamUnreachable(error.to_string()))?;

    let mut response = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(forwarded.status)
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
    );
    for (name, value) in &forwarded.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        response.append_header((name.as_str(), value.as_str()));
    }

    Ok(response.body(forwarded.body))
}

/// Runs AUTHORIZING then ROUTING, returning the headers contributed by the
/// auth response alongside the winning upstream and its scheduled counter
/// increments.
async fn admit(
    auth_request: &AuthRequest,
    state: &AppState,
) -> Result<(BTreeMap<String, String>, Admission), ProxyError> {
    let auth_response = state.auth_client.authorize(auth_request).await?;
    let now = relay_common::unix_timestamp();
    let admission = get_upstream(&auth_response, now, state.counter_store.clone()).await?;
    Ok((auth_response.headers, admission))
}

/// Drains the request-body stream into a single contiguous buffer. This is
/// the only place the body is buffered in full, and it runs concurrently
/// with [`admit`] rather than gating it.
async fn collect_body(mut payload: web::Payload) -> Result<Bytes, ProxyError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|error| ProxyError::Unexpected(error.to_string()))?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "proxy-authenticate" | "proxy-authorization"
    )
}

fn basic_credentials(req: &HttpRequest) -> Result<(String, String), ProxyError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(ProxyError::NoCredentials)?
        .to_str()
        .map_err(|_| ProxyError::MalformedCredentials)?;

    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or(ProxyError::MalformedCredentials)?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ProxyError::MalformedCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ProxyError::MalformedCredentials)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(ProxyError::MalformedCredentials)?;

    Ok((username.to_owned(), password.to_owned()))
}

/// Client IP for the `AuthRequest`: the `X-Real-IP` header when present,
/// falling back to the socket peer address.
fn client_ip(req: &HttpRequest) -> String {
    if let Some(header_value) = req.headers().get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        return header_value.to_owned();
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

/// `Content-Length` as sent by the client, or `0` if absent (e.g. a chunked
/// request, whose length isn't known until the body is fully drained — the
/// auth call does not wait for that, so it reports what the header said).
fn content_length(req: &HttpRequest) -> u64 {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn header_map(req: &HttpRequest) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_owned(), value.to_owned());
        }
    }
    map
}
