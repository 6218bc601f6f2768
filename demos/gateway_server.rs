//! TCP ride stream gateway
//!
//! Run with: cargo run --example gateway_server [BIND_ADDR]
//!
//! Settings come from the environment (`LISTEN_ADDR`, `MAX_SESSIONS`,
//! `OUTBOUND_BUFFER`, `SHARD_COUNT`, `MATCH_WORKERS`, `MATCH_QUEUE`,
//! `HEARTBEAT_INTERVAL_MS`, `HEARTBEAT_TIMEOUT_MS`). A bind address on the
//! command line overrides `LISTEN_ADDR`.
//!
//! ## Talking to it
//!
//! Every line is one JSON object. Send a hello first, then envelopes:
//!
//! ```text
//! $ nc localhost 7443
//! {"user_id":"rider-1"}
//! {"type":"ride_status_update","ride_id":"r1","user_id":"rider-1","status":"looking"}
//! {"type":"location_update","user_id":"rider-1","latitude":12.34,"longitude":56.78}
//! {"type":"heartbeat","user_id":"rider-1","seq":1}
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ride_stream::{GatewayConfig, GatewayMetrics, GatewayServer};

fn print_usage() {
    println!("Usage: gateway_server [BIND_ADDR]");
    println!();
    println!("  BIND_ADDR   address to listen on (default: $LISTEN_ADDR or 0.0.0.0:7443)");
}

fn spawn_stats_logger(metrics: Arc<GatewayMetrics>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            tracing::info!(
                active = snapshot.active_sessions,
                total = snapshot.sessions_total,
                heartbeat_misses = snapshot.heartbeat_misses,
                "Gateway stats"
            );
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ride_stream=info".parse()?)
                .add_directive("gateway_server=info".parse()?),
        )
        .init();

    let mut config = GatewayConfig::from_env()?;
    if let Some(addr) = args.get(1) {
        config = config.bind(addr.parse::<SocketAddr>()?);
    }

    let metrics = Arc::new(GatewayMetrics::new());
    let server = GatewayServer::with_metrics(config, metrics.clone())?;
    spawn_stats_logger(metrics);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
