//! Rate limiting and quota evaluation, plus the shared data model the rest
//! of the proxy exchanges with the auth service.

mod engine;
mod model;
mod rate;
mod store;
mod throttle;

pub use engine::{get_upstream, hit_key, retry_seconds, Admission, RateLimited};
pub use model::{AuthRequest, AuthResponse, AuthResponseSchemaError, InvalidUpstreamUrl, Token, Upstream};
pub use rate::{Period, Rate};
pub use store::{CounterStore, CounterStoreError};
pub use throttle::ThrottledRate;
