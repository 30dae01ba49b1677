use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::rate::Rate;

/// A caller identity returned by the auth service, together with its own
/// rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Opaque identifier used for counter keying; not interpreted further.
    pub id: String,
    /// Quotas that apply to this token. May be empty.
    #[serde(default)]
    pub rates: SmallVec<[Rate; 4]>,
}

/// An origin server candidate returned by the auth service, with its own
/// rate limits and headers to inject into the forwarded request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    /// Full URL: scheme, host, port, path and query.
    pub url: String,
    /// Quotas that apply to this upstream. May be empty.
    #[serde(default)]
    pub rates: SmallVec<[Rate; 4]>,
    /// Headers merged into the outgoing request, overriding any header
    /// contributed by [`AuthResponse::headers`].
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Error returned when an `Upstream.url` cannot be parsed into the parts the
/// forwarder needs.
#[derive(Debug, thiserror::Error)]
#[error("invalid upstream url: {0}")]
pub struct InvalidUpstreamUrl(pub String);

impl Upstream {
    /// Parses `self.url` and returns `(host, port, path_and_query)`, the
    /// three pieces the reverse forwarder needs: the URL is never
    /// re-derived on the hot path, it is parsed once when the upstream is
    /// selected.
    pub fn connection_target(&self) -> Result<(String, u16, String), InvalidUpstreamUrl> {
        let parsed =
            url::Url::parse(&self.url).map_err(|_| InvalidUpstreamUrl(self.url.clone()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| InvalidUpstreamUrl(self.url.clone()))?
            .to_owned();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| InvalidUpstreamUrl(self.url.clone()))?;

        let mut path_and_query = parsed.path().to_owned();
        if let Some(query) = parsed.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok((host, port, path_and_query))
    }
}

/// The full response from the auth service for one request.
///
/// `tokens` and `upstreams` are each required to be non-empty by the
/// protocol; this is enforced by [`AuthResponse::validate`] rather than at
/// deserialization time, so that a schema violation can be reported the
/// same way as any other transport failure (a malformed or schema-invalid
/// response is treated identically to one that never arrived).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Caller identities and their quotas. Must be non-empty.
    pub tokens: Vec<Token>,
    /// Upstream candidates and their quotas. Must be non-empty.
    pub upstreams: Vec<Upstream>,
    /// Headers merged into the outgoing request, overridden by any
    /// upstream-specific header.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl AuthResponse {
    /// Enforces the invariant that a response always carries at least one
    /// token and one upstream.
    pub fn validate(&self) -> Result<(), AuthResponseSchemaError> {
        if self.tokens.is_empty() {
            return Err(AuthResponseSchemaError::NoTokens);
        }
        if self.upstreams.is_empty() {
            return Err(AuthResponseSchemaError::NoUpstreams);
        }
        Ok(())
    }
}

/// A structurally valid JSON document that nonetheless violates the
/// `AuthResponse` schema's non-emptiness invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthResponseSchemaError {
    /// `tokens` was present but empty.
    #[error("auth response has no tokens")]
    NoTokens,
    /// `upstreams` was present but empty.
    #[error("auth response has no upstreams")]
    NoUpstreams,
}

/// The request sent to the auth service as query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// HTTP protocol version string, e.g. `"HTTP/1.1"`.
    pub protocol: String,
    /// HTTP method.
    pub method: String,
    /// The request-URI the client sent.
    pub url: String,
    /// `Content-Length`, or `0` if absent.
    pub length: u64,
    /// Client IP, taken from the `X-Real-IP` header (see
    /// `vulcan/routing.py`'s `IP_HEADER`), falling back to the socket peer
    /// address when the header is absent.
    pub ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "tokens": [{"id": "abc", "rates": [{"value": 400, "period": "minute"}]}],
            "upstreams": [{"url": "http://127.0.0.1:5000/path?key=val",
                           "rates": [{"value": 1800, "period": "hour"}],
                           "headers": {"X-Upstream": "1"}}],
            "headers": {"X-Auth": "1"}
        }"#
    }

    #[test]
    fn parses_full_schema() {
        let response: AuthResponse = serde_json::from_str(sample_json()).unwrap();
        response.validate().unwrap();
        assert_eq!(response.tokens[0].id, "abc");
        assert_eq!(response.upstreams[0].headers["X-Upstream"], "1");
    }

    #[test]
    fn roundtrips_through_json() {
        let response: AuthResponse = serde_json::from_str(sample_json()).unwrap();
        let json = serde_json::to_string(&response).unwrap();
        let back: AuthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, back);
    }

    #[test]
    fn rejects_empty_tokens_or_upstreams() {
        let response: AuthResponse =
            serde_json::from_str(r#"{"tokens": [], "upstreams": []}"#).unwrap();
        assert_eq!(response.validate(), Err(AuthResponseSchemaError::NoTokens));
    }

    #[test]
    fn upstream_splits_host_port_path_query() {
        let upstream = Upstream {
            url: "http://example.com:5000/path?key=val".to_owned(),
            rates: SmallVec::new(),
            headers: BTreeMap::new(),
        };
        let (host, port, path_and_query) = upstream.connection_target().unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 5000);
        assert_eq!(path_and_query, "/path?key=val");
    }

    #[test]
    fn upstream_defaults_port_from_scheme() {
        let upstream = Upstream {
            url: "http://example.com/path".to_owned(),
            rates: SmallVec::new(),
            headers: BTreeMap::new(),
        };
        let (_, port, _) = upstream.connection_target().unwrap();
        assert_eq!(port, 80);
    }
}
