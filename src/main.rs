//! grow-httpd: a cross-platform, completion-based HTTP/1.1 server.
//!
//! Boots `thread_count` single-threaded reactor workers (io_uring on
//! Linux, mio elsewhere), each accepting on its own `SO_REUSEPORT`
//! listener and driving connections through the HTTP/1.1 server state
//! machine in `grow_httpd::server`.

use grow_httpd::config::ServerConfig;
use grow_httpd::http::{Method, Response};
use grow_httpd::router::Router;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, _client_config) = ServerConfig::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!(
        listen = %config.listen,
        threads = config.thread_count,
        connection_allowed_size = config.connection_allowed_size,
        "starting grow-httpd"
    );

    let mut router = Router::new();
    router.route(
        Method::Get,
        "/health",
        std::sync::Arc::new(|_req| {
            let mut response = Response::new(200);
            response.set_body(b"ok".to_vec());
            response
        }),
    );

    grow_httpd::server::run(config, router)?;

    Ok(())
}
