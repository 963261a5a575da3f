//! meshglue daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

use meshglue::config::Config;
use meshglue::dns_server::run_dns_server;
use meshglue::transport::TcpTransport;
use meshglue::DiscoveryClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting meshglue daemon with config: {:?}", cfg);

    // Discovery client
    let transport = Arc::new(TcpTransport::new(&cfg.server_uri));
    let client = DiscoveryClient::new(transport, cfg.client_options())?;
    for service in &cfg.watch {
        client.watch(service);
    }

    // DNS Server
    let client_for_dns = client.clone();
    let dns_bind = cfg.dns_bind;
    let dns_handle = tokio::spawn(async move {
        if let Err(e) = run_dns_server(dns_bind, client_for_dns).await {
            error!("DNS server failed: {}", e);
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    dns_handle.abort();
    client.shutdown().await;

    info!("Shutdown complete.");
    Ok(())
}
