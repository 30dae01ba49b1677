//! Process-wide state shared across every request: the auth client (with
//! its own cache), the counter-store client, and configuration.

use std::sync::Arc;

use relay_auth::AuthClient;
use relay_config::Config;
use relay_quotas::CounterStore;

/// Shared application state, cloned (cheaply, via `Arc`s) into every
/// request.
#[derive(Clone)]
pub struct AppState {
    /// The auth client, including its response cache.
    pub auth_client: Arc<AuthClient>,
    /// The counter-store client backing the rate engine.
    pub counter_store: Arc<dyn CounterStore>,
    /// Process configuration.
    pub config: Arc<Config>,
}
