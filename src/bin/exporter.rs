//! Hadoop Exporter binary
//!
//! # Usage
//!
//! ```bash
//! # DataNode on :9077, reading http://localhost:50075/jmx
//! hadoop-exporter datanode
//!
//! # NameNode with a custom upstream and listen address
//! hadoop-exporter --web.listen-address :9170 namenode \
//!   --namenode.jmx.url http://nn01:50070/jmx
//!
//! # ZooKeeper through the classic netcat pipeline, sampled once
//! hadoop-exporter zookeeper --zookeeper-host zk01 --zookeeper.netcat \
//!   --zookeeper.refresh startup
//!
//! # Any command printing the mntr reply
//! hadoop-exporter zookeeper --zookeeper.command "cat /var/run/zk/mntr"
//!
//! # Settings from a file
//! EXPORTER_CONFIG=/etc/hadoop-exporter.toml hadoop-exporter datanode
//! ```
//!
//! Set `RUST_LOG=hadoop_exporter=debug` to log every skipped field.

use std::sync::Arc;

use clap::Parser;
use hadoop_exporter::{
    config::{Cli, ExporterConfig},
    ingestion::local_host_name,
    server::{build_router, shutdown_signal, AppState},
    ScrapeHandler,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hadoop_exporter=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match ExporterConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let target = config.target;
    info!(
        target_name = target.name(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting {}",
        target.title()
    );

    let host = local_host_name();
    let handler = ScrapeHandler::from_config(&config, host.as_deref())?;
    info!(
        upstream = %handler.upstream(),
        metrics = handler.describe().len(),
        timeout = ?config.upstream_timeout,
        "Metrics declared"
    );

    if let Err(e) = handler.prime().await {
        error!(error = %e, "Startup failed");
        return Err(e.into());
    }

    let state = Arc::new(AppState {
        handler,
        title: target.title(),
        metrics_path: config.metrics_path.clone(),
    });
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(config.listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_address, error = %e, "Failed to bind listener");
            return Err(e.into());
        }
    };
    info!(
        addr = %config.listen_address,
        path = %config.metrics_path,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Exporter shutdown complete");
    Ok(())
}
