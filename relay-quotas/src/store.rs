use async_trait::async_trait;

/// Failure modes of a counter-store call.
///
/// `TimedOut` and `StoreError` are kept distinct so the rate engine can log
/// them differently, even though both fail the read open: a failed read is
/// always treated as "not throttled" rather than propagated to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    /// The per-call timeout (default 1s) elapsed before a response.
    #[error("counter store call timed out")]
    TimedOut,
    /// Any other failure talking to the backend (connection refused,
    /// protocol error, pool exhaustion, ...).
    #[error("counter store error: {0}")]
    StoreError(String),
}

/// The counter-store client interface.
///
/// Implemented by `relay-redis` against a real backend, and by an
/// in-memory fake in this crate's own tests so the rate engine (C3) can be
/// exercised without a network dependency.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the current value of the counter at `key`, or `0` if the key
    /// is absent. Must enforce the per-call timeout itself.
    async fn counter_read(&self, key: &str) -> Result<u64, CounterStoreError>;

    /// Increments the counter at `key` by one, scheduling it to expire
    /// `ttl_seconds` after the last write. Fire-and-forget from the
    /// engine's perspective: failures here are never returned to the
    /// request, only logged by the implementation.
    async fn counter_incr(&self, key: &str, ttl_seconds: u64) -> Result<(), CounterStoreError>;
}
