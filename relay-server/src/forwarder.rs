//! The Reverse Forwarder: proxies an admitted request to its chosen
//! upstream over a raw TCP connection.
//!
//! A hand-rolled request/response exchange is used instead of a general
//! HTTP client so that nothing in the stack "helpfully" rewrites the `Host`
//! header or otherwise normalizes the request the client actually sent —
//! the original bytes the client intended for the upstream are what cross
//! the wire.

use std::collections::BTreeMap;
use std::time::Duration;

use actix_web::web::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use relay_quotas::Upstream;

/// Failures opening or using the upstream connection. Always maps to a 503
/// at the HTTP layer; never a second response once bytes have started
/// flowing back.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The TCP connection to the upstream could not be established.
    #[error("connect to {destination} failed: {source}")]
    Connect {
        /// `host:port` of the upstream that refused the connection.
        destination: String,
        #[source]
        source: std::io::Error,
    },
    /// The connection dropped, or the response could not be parsed, before
    /// a status line was received.
    #[error("upstream {destination} reset before responding: {reason}")]
    Reset {
        /// `host:port` of the upstream.
        destination: String,
        /// What went wrong.
        reason: String,
    },
}

/// The relayed upstream response, ready to be written back to the client.
pub struct ForwardedResponse {
    /// Upstream status code.
    pub status: u16,
    /// Upstream response headers, in the order received.
    pub headers: Vec<(String, String)>,
    /// Upstream response body.
    pub body: Bytes,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEADER_BUFFER_STEP: usize = 8 * 1024;

/// Opens a connection to `upstream` and relays `method`/`headers`/`body`,
/// replacing the request-URI with `upstream`'s path and query while leaving
/// every header — including `Host` — untouched.
pub async fn forward(
    upstream: &Upstream,
    method: &str,
    protocol: &str,
    headers: &BTreeMap<String, String>,
    body: &Bytes,
) -> Result<ForwardedResponse, ForwardError> {
    let (host, port, path_and_query) = upstream
        .connection_target()
        .map_err(|error| ForwardError::Reset {
            destination: upstream.url.clone(),
            reason: error.to_string(),
        })?;
    let destination = format!("{host}:{port}");

    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&destination))
        .await
        .map_err(|_| ForwardError::Connect {
            destination: destination.clone(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| ForwardError::Connect {
            destination: destination.clone(),
            source,
        })?;

    let request = build_request(method, &path_and_query, protocol, headers, body);
    stream
        .write_all(&request)
        .await
        .map_err(|source| ForwardError::Connect {
            destination: destination.clone(),
            source,
        })?;

    read_response(&mut stream, &destination).await
}

/// Headers dropped when rebuilding the request for the upstream: hop-by-hop
/// headers per RFC 7230 §6.1, plus the two framing headers this function
/// recomputes itself. The body reaching here is already a single
/// fully-buffered `Bytes` (actix-web de-chunks it before the lifecycle
/// handler runs), so a client's stale `Transfer-Encoding: chunked` header
/// must never be forwarded alongside it — the upstream would expect
/// chunk-size lines and get raw bytes instead. `Content-Length` is dropped
/// too and replaced with the real buffered length.
fn is_stripped_request_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "content-length"
            | "proxy-authenticate"
            | "proxy-authorization"
    )
}

fn build_request(
    method: &str,
    path_and_query: &str,
    protocol: &str,
    headers: &BTreeMap<String, String>,
    body: &Bytes,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(body.len() + 256);
    request.extend_from_slice(
        format!("{method} {path_and_query} {protocol}\r\n").as_bytes(),
    );
    for (name, value) in headers {
        if is_stripped_request_header(name) {
            continue;
        }
        request.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    request.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    request.extend_from_slice(b"\r\n");
    request.extend_from_slice(body);
    request
}

async fn read_response(
    stream: &mut TcpStream,
    destination: &str,
) -> Result<ForwardedResponse, ForwardError> {
    let mut buffer = Vec::with_capacity(HEADER_BUFFER_STEP);
    let header_end = loop {
        let mut chunk = [0u8; HEADER_BUFFER_STEP];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|error| ForwardError::Reset {
                destination: destination.to_owned(),
                reason: error.to_string(),
            })?;
        if read == 0 {
            return Err(ForwardError::Reset {
                destination: destination.to_owned(),
                reason: "connection closed before a response was received".to_owned(),
            });
        }
        buffer.extend_from_slice(&chunk[..read]);

        let mut header_slots = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut header_slots);
        match response.parse(&buffer) {
            Ok(httparse::Status::Complete(offset)) => break offset,
            Ok(httparse::Status::Partial) => continue,
            Err(error) => {
                return Err(ForwardError::Reset {
                    destination: destination.to_owned(),
                    reason: error.to_string(),
                })
            }
        }
    };

    let mut header_slots = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut header_slots);
    response
        .parse(&buffer)
        .expect("re-parsing a buffer already proven complete cannot fail");

    let status = response.code.unwrap_or(502);
    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_owned(),
                String::from_utf8_lossy(header.value).into_owned(),
            )
        })
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let mut body = buffer.split_off(header_end);

    if let Some(expected) = content_length {
        while body.len() < expected {
            let mut chunk = [0u8; HEADER_BUFFER_STEP];
            let read = stream
                .read(&mut chunk)
                .await
                .map_err(|error| ForwardError::Reset {
                    destination: destination.to_owned(),
                    reason: error.to_string(),
                })?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
    } else {
        let mut chunk = [0u8; HEADER_BUFFER_STEP];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => body.extend_from_slice(&chunk[..read]),
                Err(_) => break,
            }
        }
    }

    Ok(ForwardedResponse {
        status,
        headers,
        body: Bytes::from(body),
    })
}
