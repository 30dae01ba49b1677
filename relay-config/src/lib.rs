//! Runtime configuration for the proxy.
//!
//! Parsing a config *file* (YAML/INI) is explicitly out of scope for this
//! crate — see the root spec's non-goals. What remains is the set of
//! recognized options themselves, loadable from environment variables, with
//! defaults that let the proxy start without any configuration at all.

use std::time::Duration;

/// A single auth-service or counter-store timeout/interval value, expressed
/// in fractional seconds in the environment but carried internally as a
/// [`Duration`].
fn parse_seconds(raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidValue(raw.to_owned()))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidValue(raw.to_owned()));
    }

    Ok(Duration::from_secs_f64(secs))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Errors returned while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Auth-client configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Candidate auth-service URLs; one is chosen uniformly at random per
    /// request.
    pub urls: Vec<String>,
    /// Per-call timeout for the auth HTTP request.
    pub timeout: Duration,
    /// Realm reported in `WWW-Authenticate` when no credentials are sent.
    pub realm: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            urls: vec!["http://127.0.0.1:9000/auth".to_owned()],
            timeout: Duration::from_secs(5),
            realm: "proxy".to_owned(),
        }
    }
}

/// Counter-store configuration.
#[derive(Debug, Clone)]
pub struct CounterStoreConfig {
    /// `host:port` pairs of counter-store nodes.
    pub servers: Vec<String>,
    /// Keyspace/namespace prefix for counter keys.
    pub keyspace: String,
    /// Total pooled connections.
    pub pool_size: u32,
    /// Upper bound on connections opened to a single node.
    pub max_connections_per_node: u32,
    /// Per-call timeout; distinguishes `TimedOut` from `StoreError`.
    pub timeout: Duration,
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        CounterStoreConfig {
            servers: vec!["127.0.0.1:6379".to_owned()],
            keyspace: "relay".to_owned(),
            pool_size: 10,
            max_connections_per_node: 4,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP listener binds to.
    pub http_port: u16,
    /// Auth-client configuration.
    pub auth: AuthConfig,
    /// Counter-store client configuration.
    pub counter_store: CounterStoreConfig,
    /// Size of the blocking worker pool for adapters that cannot be driven
    /// asynchronously.
    pub thread_pool_size: usize,
    /// Legacy alias for a flat bucket size in seconds. Unused: this
    /// implementation always uses period-based bucketing. Kept only so the
    /// option is recognized rather than silently rejected.
    pub bucket_size: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_port: 8080,
            auth: AuthConfig::default(),
            counter_store: CounterStoreConfig::default(),
            thread_pool_size: num_cpus_hint(),
            bucket_size: None,
        }
    }
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// [`Default`] for anything unset.
    ///
    /// Recognized variables:
    /// `RELAY_HTTP_PORT`, `RELAY_AUTH_URLS` (comma separated),
    /// `RELAY_AUTH_TIMEOUT_SECONDS`, `RELAY_AUTH_REALM`,
    /// `RELAY_COUNTER_STORE_SERVERS` (comma separated),
    /// `RELAY_COUNTER_STORE_KEYSPACE`, `RELAY_COUNTER_STORE_POOL_SIZE`,
    /// `RELAY_COUNTER_STORE_MAX_CONNECTIONS_PER_NODE`,
    /// `RELAY_COUNTER_STORE_TIMEOUT_SECONDS`, `RELAY_THREAD_POOL_SIZE`,
    /// `RELAY_BUCKET_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(raw) = env_var("RELAY_HTTP_PORT") {
            config.http_port = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(raw.clone()))?;
        }

        if let Some(raw) = env_var("RELAY_AUTH_URLS") {
            config.auth.urls = split_list(&raw);
        }
        if let Some(raw) = env_var("RELAY_AUTH_TIMEOUT_SECONDS") {
            config.auth.timeout = parse_seconds(&raw)?;
        }
        if let Some(raw) = env_var("RELAY_AUTH_REALM") {
            config.auth.realm = raw;
        }

        if let Some(raw) = env_var("RELAY_COUNTER_STORE_SERVERS") {
            config.counter_store.servers = split_list(&raw);
        }
        if let Some(raw) = env_var("RELAY_COUNTER_STORE_KEYSPACE") {
            config.counter_store.keyspace = raw;
        }
        if let Some(raw) = env_var("RELAY_COUNTER_STORE_POOL_SIZE") {
            config.counter_store.pool_size = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(raw.clone()))?;
        }
        if let Some(raw) = env_var("RELAY_COUNTER_STORE_MAX_CONNECTIONS_PER_NODE") {
            config.counter_store.max_connections_per_node = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(raw.clone()))?;
        }
        if let Some(raw) = env_var("RELAY_COUNTER_STORE_TIMEOUT_SECONDS") {
            config.counter_store.timeout = parse_seconds(&raw)?;
        }

        if let Some(raw) = env_var("RELAY_THREAD_POOL_SIZE") {
            config.thread_pool_size = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(raw.clone()))?;
        }
        if let Some(raw) = env_var("RELAY_BUCKET_SIZE") {
            config.bucket_size = Some(
                raw.parse()
                    .map_err(|_| ConfigError::InvalidValue(raw.clone()))?,
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert!(!config.auth.urls.is_empty());
        assert!(config.thread_pool_size >= 1);
    }

    #[test]
    fn splits_comma_separated_lists() {
        assert_eq!(
            split_list("a, b ,c"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(split_list(""), Vec::<String>::new());
    }

    #[test]
    fn rejects_unparsable_seconds() {
        assert!(parse_seconds("not-a-number").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("1.5").is_ok());
    }
}
