use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use relay_common::bucket;

use crate::model::{AuthResponse, Token, Upstream};
use crate::rate::Rate;
use crate::store::CounterStore;
use crate::throttle::ThrottledRate;

/// Raised by [`get_upstream`] when no upstream can currently serve the
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit reached, retry in {retry_seconds} second(s)")]
pub struct RateLimited {
    /// Seconds until the blocking bucket ends. Always in `(0, period]` for
    /// the blocking rate.
    pub retry_seconds: u64,
}

/// Builds the counter key for `(id, rate, now)`.
///
/// `id` is either a token id or an upstream url; the engine does not care
/// which, it only needs the key to be unique across `(id, period, bucket)`
/// triples, which string concatenation with the period label gives for
/// free as long as `id` itself cannot contain the separator in a way that
/// collides — tokens ids and upstream urls are both opaque strings handed
/// back by the auth service, so this holds for their value space.
pub fn hit_key(id: &str, rate: &Rate, now: u64) -> String {
    format!(
        "{}_{}_{}",
        id,
        rate.period,
        bucket(now, rate.period_seconds())
    )
}

/// Seconds until the bucket containing `now` for `throttled.rate` ends.
pub fn retry_seconds(throttled: &ThrottledRate, now: u64) -> u64 {
    relay_common::remaining_in_bucket(now, throttled.rate.period_seconds())
}

/// Reads the counter for every rate of `id`'s rates and pairs each with its
/// rate, failing open (count treated as `0`, i.e. not exceeded) on a store
/// error. Returns whether at least one read actually reached the store, so
/// callers can detect "every read failed" and fail the whole entity open.
async fn read_throttled_rates(
    store: &dyn CounterStore,
    id: &str,
    rates: &[Rate],
    now: u64,
) -> (Vec<ThrottledRate>, bool) {
    let mut throttled = Vec::with_capacity(rates.len());
    let mut any_read_succeeded = false;

    for rate in rates {
        let key = hit_key(id, rate, now);
        match store.counter_read(&key).await {
            Ok(count) => {
                any_read_succeeded = true;
                throttled.push(ThrottledRate::new(*rate, count));
            }
            Err(error) => {
                tracing::warn!(%key, %error, "counter read failed, treating as not throttled");
                throttled.push(ThrottledRate::new(*rate, 0));
            }
        }
    }

    (throttled, any_read_succeeded)
}

/// Schedules a fire-and-forget `counter_incr` for every rate of `id`,
/// keyed at `now`, returning the spawned tasks' handles so the caller can
/// track them for a best-effort shutdown drain.
fn schedule_increments(
    store: Arc<dyn CounterStore>,
    id: String,
    rates: Vec<Rate>,
    now: u64,
) -> Vec<JoinHandle<()>> {
    rates
        .into_iter()
        .map(|rate| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let key = hit_key(&id, &rate, now);
                if let Err(error) = store.counter_incr(&key, rate.period_seconds()).await {
                    tracing::warn!(%key, %error, "counter increment failed");
                }
            })
        })
        .collect()
}

/// The outcome of a successful [`get_upstream`] call: the winning upstream
/// plus the handles of the counter increments scheduled for it.
pub struct Admission {
    /// The upstream selected to serve the request.
    pub upstream: Upstream,
    /// Handles for the fire-and-forget counter increments already
    /// scheduled (never awaited on the request path).
    pub increments: Vec<JoinHandle<()>>,
}

/// The rate engine: decides whether to admit the request and, if so, which
/// upstream serves it.
pub async fn get_upstream(
    auth: &AuthResponse,
    now: u64,
    store: Arc<dyn CounterStore>,
) -> Result<Admission, RateLimited> {
    // Step 1: token admission, sequential, first throttled token stops the
    // whole traversal.
    for token in &auth.tokens {
        if let Some(limited) = check_token(token, now, store.as_ref()).await {
            return Err(limited);
        }
    }

    // Step 2: upstream selection over a random permutation.
    let mut order: Vec<&Upstream> = auth.upstreams.iter().collect();
    order.shuffle(&mut rand::thread_rng());

    let mut best_retry: Option<u64> = None;

    for upstream in order {
        let (throttled, any_read_succeeded) =
            read_throttled_rates(store.as_ref(), &upstream.url, &upstream.rates, now).await;

        let all_reads_failed = !upstream.rates.is_empty() && !any_read_succeeded;
        if all_reads_failed {
            tracing::warn!(
                upstream = %upstream.url,
                "every counter read failed for this upstream, admitting fail-open"
            );
            return Ok(admit(auth, upstream.clone(), now, store));
        }

        match throttled.iter().filter(|tr| tr.is_exceeded()).max() {
            None => return Ok(admit(auth, upstream.clone(), now, store)),
            Some(blocking) => {
                let retry = retry_seconds(blocking, now);
                best_retry = Some(best_retry.map_or(retry, |current| current.min(retry)));
            }
        }
    }

    // Step 4: every upstream was throttled.
    Err(RateLimited {
        retry_seconds: best_retry.unwrap_or(1),
    })
}

/// Checks a single token's rates, returning `Some(RateLimited)` if it is
/// throttled.
async fn check_token(token: &Token, now: u64, store: &dyn CounterStore) -> Option<RateLimited> {
    let (throttled, _) = read_throttled_rates(store, &token.id, &token.rates, now).await;

    // Resolved ambiguity (see DESIGN.md): "max(throttled_rates by
    // rate.period)" is read as "max over the *exceeded* rates", i.e. when a
    // token breaches several of its own rates at once, the retry hint
    // reflects the longest-period breach rather than an arbitrary one.
    throttled
        .iter()
        .filter(|tr| tr.is_exceeded())
        .max()
        .map(|blocking| RateLimited {
            retry_seconds: retry_seconds(blocking, now),
        })
}

/// Schedules every counter increment for an admitted request: one per rate
/// of the winning upstream, one per rate of every token.
fn admit(auth: &AuthResponse, upstream: Upstream, now: u64, store: Arc<dyn CounterStore>) -> Admission {
    let mut increments = schedule_increments(
        Arc::clone(&store),
        upstream.url.clone(),
        upstream.rates.to_vec(),
        now,
    );

    for token in &auth.tokens {
        increments.extend(schedule_increments(
            Arc::clone(&store),
            token.id.clone(),
            token.rates.to_vec(),
            now,
        ));
    }

    Admission { upstream, increments }
}
