//! Hadoop Exporter
//!
//! Bridges the monitoring output of HDFS daemons and ZooKeeper into the
//! Prometheus pull model. The JMX servlet of a DataNode or NameNode (a JSON
//! document of named beans) or the `mntr` reply of a ZooKeeper server (tab
//! separated lines) is mapped through a declarative table into a typed
//! registry, which is served over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   upstream   │───▶│  Ingestor    │───▶│   Metric     │───▶│   Scrape     │
//! │  JMX / mntr  │    │ + MappingTbl │    │  Registry    │    │   Handler    │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────┬───────┘
//!                                                                    │
//!                                                             GET /metrics
//! ```
//!
//! Every scrape drives one ingestion cycle. A failed cycle is logged and the
//! previous values keep being served.
//!
//! # Example
//!
//! ```no_run
//! use hadoop_exporter::{config::Cli, ExporterConfig, ScrapeHandler};
//! use clap::Parser;
//!
//! # async fn run() -> hadoop_exporter::Result<()> {
//! let cli = Cli::parse_from(["hadoop-exporter", "datanode"]);
//! let config = ExporterConfig::from_cli(&cli)?;
//! let handler = ScrapeHandler::from_config(&config, Some("dn01"))?;
//! println!("{}", handler.scrape().await);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extract;
pub mod ingestion;
pub mod mapping;
pub mod registry;
pub mod scrape;
pub mod server;
pub mod types;

pub use config::{ExporterConfig, MntrQuery, UpstreamConfig};
pub use error::{Error, FieldError, Result};
pub use ingestion::{Ingestor, JmxIngestor, MntrIngestor, RefreshPolicy};
pub use mapping::{DeploymentTarget, MappingTable};
pub use registry::{MetricRegistry, RegistrySnapshot, UpdateBatch};
pub use scrape::ScrapeHandler;
pub use types::{MetricDescriptor, MetricId, MetricKind};
