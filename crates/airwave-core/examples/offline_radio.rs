//! Minimal gateway walkthrough: install, fetch, inspect, go offline.
//!
//! Run with:
//! ```sh
//! cargo run --example offline_radio
//! ```

use airwave_cache::{CacheGateway, ControlRequest, EngineConfig, GatewayRequest};
use std::sync::Arc;

#[tokio::main]
async fn main() -> airwave_cache::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = EngineConfig::default();
    config.precache_assets = vec!["https://example.com/".to_string()];

    let gateway = Arc::new(CacheGateway::in_memory(config)?);

    // Install precaches the app shell; failures are reported, not fatal.
    let install = gateway.install().await;
    println!(
        "install: {} cached, {} failed",
        install.cached.len(),
        install.failed.len()
    );

    // Activation drops partitions from older versions.
    let activate = gateway.activate()?;
    println!("activate: removed {:?}", activate.deleted_partitions);

    // First request goes to the network, second is served from cache.
    let request = GatewayRequest::get("https://example.com/");
    for _ in 0..2 {
        match gateway.handle(&request).await {
            Ok(response) => println!(
                "{} -> {} ({} bytes, via {})",
                request.url,
                response.status,
                response.body.len(),
                response.source
            ),
            Err(e) => println!("{} -> error: {}", request.url, e),
        }
    }

    // The control channel exposes the same operations as named commands.
    let control = gateway.start_control();
    let status = control
        .sender()
        .call(ControlRequest::new("cache_status"))
        .await?;
    println!("cache_status: {}", status.data);

    let snapshot = gateway.metrics();
    println!(
        "metrics: {} hits / {} misses, mean latency {:.1}ms",
        snapshot.cache_hits, snapshot.cache_misses, snapshot.mean_latency_ms
    );

    Ok(())
}
