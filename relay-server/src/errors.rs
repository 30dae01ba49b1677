//! The engine-wide error taxonomy and its mapping onto client-visible HTTP
//! responses.

use actix_web::http::header;
use actix_web::HttpResponse;
use serde_json::json;

use relay_auth::{AuthError, AuthFailed};
use relay_quotas::RateLimited;

/// Every way a request can end up rejected instead of forwarded.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No `Authorization` header was present on the request.
    #[error("missing credentials")]
    NoCredentials,
    /// The `Authorization` header was present but not well-formed Basic auth.
    #[error("malformed credentials")]
    MalformedCredentials,
    /// The auth service denied the request.
    #[error(transparent)]
    AuthDenied(#[from] AuthFailed),
    /// The auth service was unreachable, timed out, or misbehaved.
    #[error("auth service unavailable: {0}")]
    AuthTransport(String),
    /// Every upstream candidate is currently rate limited.
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    /// The selected upstream refused the connection or reset before a
    /// response was produced.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    /// Any other unhandled failure, e.g. a broken request-body stream.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<AuthError> for ProxyError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Denied(failed) => ProxyError::AuthDenied(failed),
            AuthError::Transport(message) => ProxyError::AuthTransport(message),
        }
    }
}

impl ProxyError {
    /// Renders the error as the exact response the client should see,
    /// logging engine-side faults along the way.
    pub fn to_response(&self, realm: &str) -> HttpResponse {
        match self {
            ProxyError::NoCredentials | ProxyError::MalformedCredentials => {
                tracing::debug!(error = %self, "rejecting request without valid credentials");
                HttpResponse::Unauthorized()
                    .insert_header((
                        header::WWW_AUTHENTICATE,
                        format!(r#"Basic realm="{realm}""#),
                    ))
                    .finish()
            }
            ProxyError::AuthDenied(failed) => {
                tracing::debug!(status = failed.status, "auth service denied request");
                let message = if failed.body.is_empty() {
                    failed.phrase.clone()
                } else {
                    failed.body.clone()
                };
                HttpResponse::build(
                    actix_web::http::StatusCode::from_u16(failed.status)
                        .unwrap_or(actix_web::http::StatusCode::FORBIDDEN),
                )
                .json(json!({ "error": message }))
            }
            ProxyError::AuthTransport(message) => {
                tracing::error!(%message, "auth service transport failure");
                HttpResponse::InternalServerError().json(json!({ "error": "Unexpected error" }))
            }
            ProxyError::RateLimited(limited) => {
                tracing::debug!(retry_seconds = limited.retry_seconds, "request rate limited");
                HttpResponse::TooManyRequests()
                    .insert_header((header::RETRY_AFTER, limited.retry_seconds.to_string()))
                    .json(json!({
                        "error": format!(
                            "Rate limit reached. Retry in {} second(s)",
                            limited.retry_seconds
                        ),
                        "retry_seconds": limited.retry_seconds,
                    }))
            }
            ProxyError::UpstreamUnreachable(destination) => {
                tracing::warn!(%destination, "upstream unreachable");
                HttpResponse::ServiceUnavailable().finish()
            }
            ProxyError::Unexpected(message) => {
                tracing::error!(%message, "unexpected error");
                HttpResponse::InternalServerError().json(json!({ "error": "Unexpected error" }))
            }
        }
    }
}
