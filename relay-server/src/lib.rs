//! HTTP front door for the proxy: admission (accept loop, worker sizing),
//! the per-request lifecycle state machine, and the reverse forwarder.

mod errors;
mod forwarder;
mod lifecycle;
mod state;

pub use errors::ProxyError;
pub use forwarder::{ForwardError, ForwardedResponse};
pub use lifecycle::handle as dispatch;
pub use state::AppState;

use std::io;

use actix_web::{web, App, HttpServer};

/// Runs the proxy's admission loop: binds `state.config.http_port` and
/// drives every accepted connection through [`lifecycle::handle`].
///
/// Sized from `config.thread_pool_size`: `actix-web` dedicates one worker
/// per accepted connection batch, which doubles here as the bounded pool
/// for the blocking adapters the rest of the stack might still need.
pub async fn run(state: AppState) -> io::Result<()> {
    let port = state.config.http_port;
    let workers = state.config.thread_pool_size.max(1);

    tracing::info!(port, workers, "starting admission loop");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .default_service(web::to(lifecycle::handle))
    })
    .workers(workers)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
