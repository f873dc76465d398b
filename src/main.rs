#![cfg(not(tarpaulin_include))]

use faculty_portal::app;
use faculty_portal::config::PortalConfig;

/// Main entry point for the portal web server
///
/// Reads the configuration from the TOML file named by the first argument
/// (or `PORTAL_CONFIG`), falling back to a memory-backed server on
/// `127.0.0.1:3000`. Log verbosity follows `RUST_LOG`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PortalConfig::load()?;
    log::info!(
        "Starting portal with {:?} backend, {} ms store timeout",
        config.backend.kind,
        config.request_timeout_ms
    );
    app::run(config).await
}
