//! Client for the external authorization service.
//!
//! Every inbound request is authorized by an operator-configured HTTP
//! service before it is throttled or routed. This crate owns that call,
//! its status-code mapping, and a small response cache so that repeated
//! requests from the same caller within a short window don't each pay a
//! live round trip.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use rand::seq::SliceRandom;

use relay_config::AuthConfig;
use relay_quotas::AuthRequest;
pub use relay_quotas::AuthResponse;

/// Cache capacity: a handful of recently-seen callers, not a general
/// response cache.
const CACHE_MAX_CAPACITY: u64 = 100;
/// Cache entry lifetime, matching how long an operator expects a credential
/// rotation to take effect.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Raised by [`AuthClient::new`] when construction cannot succeed.
#[derive(Debug, thiserror::Error)]
pub enum AuthClientError {
    /// No auth URLs were configured.
    #[error("no auth urls configured")]
    NoUrls,
}

/// A non-2xx response from the auth service, reported back to the client
/// with the same status, phrase, and body the auth service sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("auth service returned {status} {phrase}")]
pub struct AuthFailed {
    /// The HTTP status the auth service responded with.
    pub status: u16,
    /// The canonical reason phrase for `status`.
    pub phrase: String,
    /// The raw response body, byte-preserved.
    pub body: String,
}

/// Everything that can go wrong calling the auth service, other than a
/// successful [`AuthResponse`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The auth service responded, but denied the request.
    #[error(transparent)]
    Denied(#[from] AuthFailed),
    /// The auth service was unreachable, timed out, or returned a body that
    /// could not be parsed into an `AuthResponse`.
    #[error("auth service unavailable: {0}")]
    Transport(String),
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    username: String,
    password: String,
    protocol: String,
    method: String,
    url: String,
    length: u64,
}

impl From<&AuthRequest> for CacheKey {
    fn from(request: &AuthRequest) -> Self {
        CacheKey {
            username: request.username.clone(),
            password: request.password.clone(),
            protocol: request.protocol.clone(),
            method: request.method.clone(),
            url: request.url.clone(),
            length: request.length,
        }
    }
}

/// Calls the auth service and caches successful responses.
///
/// Only successes are cached: caching a denial as well would let a caller
/// rotate credentials and still be rejected for up to a TTL window, which
/// is a confusing enough operator experience to avoid even though the auth
/// service this crate was modeled on does cache both.
pub struct AuthClient {
    http: reqwest::Client,
    urls: Vec<String>,
    timeout: Duration,
    cache: Cache<CacheKey, Arc<AuthResponse>>,
}

impl AuthClient {
    /// Builds a client over the configured auth URLs.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthClientError> {
        if config.urls.is_empty() {
            return Err(AuthClientError::NoUrls);
        }

        Ok(AuthClient {
            http: reqwest::Client::new(),
            urls: config.urls.clone(),
            timeout: config.timeout,
            cache: Cache::builder()
                .max_capacity(CACHE_MAX_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        })
    }

    /// Authorizes `request`, returning the auth service's `AuthResponse` on
    /// success.
    pub async fn authorize(&self, request: &AuthRequest) -> Result<AuthResponse, AuthError> {
        let key = CacheKey::from(request);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok((*cached).clone());
        }

        let response = self.call(request).await?;
        self.cache.insert(key, Arc::new(response.clone())).await;
        Ok(response)
    }

    async fn call(&self, request: &AuthRequest) -> Result<AuthResponse, AuthError> {
        let url = self.pick_url();

        let response = self
            .http
            .get(url)
            .query(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(url, error = %relay_common::LogError(&error), "auth request failed");
                AuthError::Transport(error.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| AuthError::Transport(error.to_string()))?;

        if status.is_success() {
            let parsed: AuthResponse = serde_json::from_str(&body)
                .map_err(|error| AuthError::Transport(format!("malformed response body: {error}")))?;
            parsed
                .validate()
                .map_err(|error| AuthError::Transport(error.to_string()))?;
            Ok(parsed)
        } else {
            let phrase = status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_owned();
            Err(AuthError::Denied(AuthFailed {
                status: status.as_u16(),
                phrase,
                body,
            }))
        }
    }

    fn pick_url(&self) -> &str {
        self.urls
            .choose(&mut rand::thread_rng())
            .expect("AuthClient::new rejects an empty url list")
    }
}
