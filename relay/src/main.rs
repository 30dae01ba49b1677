//! Command-line entry point: loads configuration, wires the auth client,
//! counter-store client, and rate engine together, and runs the admission
//! loop.

use std::sync::Arc;

use clap::Parser;

use relay_auth::AuthClient;
use relay_config::Config;
use relay_redis::RedisCounterStore;
use relay_server::AppState;

/// An authorizing reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Listen port, overriding `RELAY_HTTP_PORT` and the compiled-in default.
    #[arg(long, env = "RELAY_HTTP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.http_port = port;
    }

    let auth_client = AuthClient::new(&config.auth)?;
    let counter_store = RedisCounterStore::new(&config.counter_store)?;

    let state = AppState {
        auth_client: Arc::new(auth_client),
        counter_store: Arc::new(counter_store),
        config: Arc::new(config),
    };

    relay_server::run(state).await?;
    Ok(())
}
