#![warn(missing_docs)]

//! Accelshare guard daemon: serves the safety gateway wire surface.

use std::sync::Arc;

use accelshare_guard::config::{build_gateway, GuardConfig, NullBackendProvider};
use accelshare_guard::server::GuardServer;
use accelshare_guard::TrafficLimiter;
use accelshare_metrics::InMemorySink;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("GUARD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let config = GuardConfig::default();
    let metrics = Arc::new(InMemorySink::new());
    let gateway = build_gateway(&config, &NullBackendProvider, metrics);
    let limiter = TrafficLimiter::new(config.traffic.clone());

    tracing::info!("accelshare guard daemon starting");
    GuardServer::new(gateway, limiter).serve(&addr).await
}
