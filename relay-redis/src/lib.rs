//! The counter-store client.
//!
//! The wire contract above this crate is only two CQL query shapes
//! (`select counter from hits where hit='<key>'` and
//! `update hits using ttl <n> set counter = counter + 1 where hit='<key>'`),
//! treating the backend itself as an opaque, swappable collaborator. A
//! Redis counter with a refreshed `EXPIRE` on every increment gives
//! identical observable semantics — a per-key integer counter with a
//! rolling TTL — and is the overwhelmingly common real-world choice for
//! this role, so that is what this crate talks to.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use rand::seq::SliceRandom;
use redis::AsyncCommands;

use relay_config::CounterStoreConfig;
use relay_quotas::{CounterStore, CounterStoreError};

/// Errors that can occur while building a [`RedisCounterStore`].
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// No servers were configured.
    #[error("no counter store servers configured")]
    NoServers,
    /// A server address could not be turned into a pool.
    #[error("failed to build connection pool for {server}: {source}")]
    Pool {
        /// The offending `host:port`.
        server: String,
        /// Underlying pool-builder error.
        #[source]
        source: deadpool_redis::CreatePoolError,
    },
}

/// One pool per configured node, each capped at
/// `max_connections_per_node`. A call picks a node at random; there is no
/// cross-node consistency requirement for a rate-limit counter beyond what
/// the counter store itself already provides.
pub struct RedisCounterStore {
    pools: Vec<Pool>,
    keyspace: String,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Builds one connection pool per `counter_store.servers` entry.
    pub fn new(config: &CounterStoreConfig) -> Result<Self, RedisStoreError> {
        if config.servers.is_empty() {
            return Err(RedisStoreError::NoServers);
        }

        let pools = config
            .servers
            .iter()
            .map(|server| {
                let mut pool_config = PoolConfig::from_url(format!("redis://{server}"));
                pool_config.pool = Some(deadpool_redis::PoolConfig::new(
                    config.max_connections_per_node as usize,
                ));
                pool_config
                    .create_pool(Some(Runtime::Tokio1))
                    .map_err(|source| RedisStoreError::Pool {
                        server: server.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RedisCounterStore {
            pools,
            keyspace: config.keyspace.clone(),
            timeout: config.timeout,
        })
    }

    fn pick_pool(&self) -> &Pool {
        // `new` rejects an empty server list, so this always has a pool to
        // hand back.
        self.pools
            .choose(&mut rand::thread_rng())
            .expect("RedisCounterStore always has at least one pool")
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.keyspace, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn counter_read(&self, key: &str) -> Result<u64, CounterStoreError> {
        let namespaced = self.namespaced(key);
        let pool = self.pick_pool();

        let call = async {
            let mut conn = pool.get().await.map_err(|err| {
                CounterStoreError::StoreError(format!("connection pool exhausted: {err}"))
            })?;

            let value: Option<u64> = conn
                .get(&namespaced)
                .await
                .map_err(|err| CounterStoreError::StoreError(err.to_string()))?;

            Ok(value.unwrap_or(0))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CounterStoreError::TimedOut),
        }
    }

    async fn counter_incr(&self, key: &str, ttl_seconds: u64) -> Result<(), CounterStoreError> {
        let namespaced = self.namespaced(key);
        let pool = self.pick_pool();

        let call = async {
            let mut conn = pool.get().await.map_err(|err| {
                CounterStoreError::StoreError(format!("connection pool exhausted: {err}"))
            })?;

            redis::pipe()
                .atomic()
                .incr(&namespaced, 1u64)
                .ignore()
                .expire(&namespaced, ttl_seconds as i64)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|err| CounterStoreError::StoreError(err.to_string()))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CounterStoreError::TimedOut),
        }
    }
}
