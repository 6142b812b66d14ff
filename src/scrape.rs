//! Scrape protocol handler
//!
//! Serves the two-phase pull protocol on top of one [`MetricRegistry`] and one
//! [`Ingestor`]:
//!
//! - **describe**: every declared descriptor, independent of any value
//! - **collect**: run one ingestion cycle, commit it, return a snapshot
//!
//! A failed cycle is logged and recorded in the self-metrics; the scrape still
//! returns the last good values.
//!
//! ```text
//!  GET /metrics ──▶ collect() ──▶ ingest() ──ok──▶ commit(batch + up=1)
//!                       │                 └─err─▶ commit(up=0, failures+1)
//!                       └──▶ snapshot() ──▶ TextEncoder ──▶ response body
//! ```

use std::sync::Arc;
use std::time::Instant;

use prometheus::{Encoder, TextEncoder};

use crate::config::{ExporterConfig, MntrQuery, UpstreamConfig};
use crate::error::{Error, Result};
use crate::ingestion::{
    Bindings, CommandQuery, Ingestor, JmxIngestor, LineQuery, MntrIngestor, SocketQuery,
};
use crate::registry::{MetricRegistry, RegistrySnapshot, UpdateBatch};
use crate::types::{MetricDescriptor, MetricId};

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Exporter health metrics, declared after the mapped metrics
#[derive(Debug, Clone, Copy)]
struct SelfMetrics {
    up: MetricId,
    failures: MetricId,
    duration: MetricId,
}

impl SelfMetrics {
    fn declare(namespace: &str, registry: &mut MetricRegistry) -> Result<Self> {
        let ns = Some(namespace);
        let up = registry.declare(MetricDescriptor::gauge(
            ns,
            "up",
            "Whether the last ingestion cycle succeeded",
        ))?;
        let failures = registry.declare(MetricDescriptor::counter(
            ns,
            "exporter_scrape_failures_total",
            "Number of failed ingestion cycles",
        ))?;
        let duration = registry.declare(MetricDescriptor::gauge(
            ns,
            "exporter_scrape_duration_seconds",
            "Duration of the last ingestion cycle",
        ))?;

        // failures are exposed as 0 from the start
        registry.add_counter(failures, 0.0)?;

        Ok(Self {
            up,
            failures,
            duration,
        })
    }
}

/// Describe/collect handler shared by every HTTP request
pub struct ScrapeHandler {
    registry: Arc<MetricRegistry>,
    ingestor: Arc<dyn Ingestor>,
    self_metrics: SelfMetrics,
}

impl std::fmt::Debug for ScrapeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeHandler")
            .field("upstream", &self.ingestor.upstream())
            .field("metrics", &self.registry.len())
            .finish()
    }
}

impl ScrapeHandler {
    /// Create a handler over a registry holding the mapped metrics
    ///
    /// The self-metrics are declared under `namespace`, after which the
    /// registry is frozen.
    pub fn new(
        namespace: &str,
        mut registry: MetricRegistry,
        ingestor: Arc<dyn Ingestor>,
    ) -> Result<Self> {
        let self_metrics = SelfMetrics::declare(namespace, &mut registry)?;
        Ok(Self {
            registry: Arc::new(registry),
            ingestor,
            self_metrics,
        })
    }

    /// Build the registry, bindings and ingestor for a resolved configuration
    ///
    /// `host` fills the `{host}` placeholder of bean identities; mappings
    /// needing it stay unbound when it is `None`.
    pub fn from_config(config: &ExporterConfig, host: Option<&str>) -> Result<Self> {
        let target = config.target;
        let table = target.mapping_table()?;
        let mut registry = MetricRegistry::new();
        let bindings = Bindings::declare(&table, &mut registry, host)?;
        if !bindings.unresolved().is_empty() {
            tracing::warn!(
                target_name = target.name(),
                disabled = bindings.unresolved().len(),
                "Host name unknown, host-scoped metrics disabled"
            );
        }

        let timeout = config.upstream_timeout;
        let ingestor: Arc<dyn Ingestor> = match &config.upstream {
            UpstreamConfig::Jmx { url } => {
                Arc::new(JmxIngestor::new(url.as_str(), timeout, bindings)?)
            }
            UpstreamConfig::Mntr {
                host,
                port,
                query,
                refresh,
            } => {
                let query: Box<dyn LineQuery> = match query {
                    MntrQuery::Socket => Box::new(SocketQuery::new(host, *port, timeout)),
                    MntrQuery::Netcat => Box::new(CommandQuery::netcat(host, *port, timeout)),
                    MntrQuery::Command(command) => {
                        Box::new(CommandQuery::new(command.as_str(), timeout))
                    }
                };
                Arc::new(MntrIngestor::new(query, bindings, *refresh))
            }
        };

        Self::new(target.name(), registry, ingestor)
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Upstream description
    pub fn upstream(&self) -> &str {
        self.ingestor.upstream()
    }

    /// Describe phase: every declared descriptor in declaration order
    pub fn describe(&self) -> &[MetricDescriptor] {
        self.registry.enumerate()
    }

    /// Take the startup sample when the ingestor requires one
    ///
    /// A failure here is fatal and reported as [`Error::Startup`].
    pub async fn prime(&self) -> Result<()> {
        if !self.ingestor.requires_startup_sample() {
            return Ok(());
        }
        self.run_cycle().await.map_err(|e| {
            Error::Startup(format!("initial sample from {} failed: {}", self.upstream(), e))
        })?;
        tracing::info!(upstream = %self.upstream(), "Initial sample taken");
        Ok(())
    }

    /// Collect phase: run one ingestion cycle and snapshot the registry
    ///
    /// Never fails; a failed cycle leaves the mapped values as they were.
    pub async fn collect(&self) -> RegistrySnapshot<'_> {
        if let Err(e) = self.run_cycle().await {
            tracing::warn!(
                upstream = %self.upstream(),
                error = %e,
                "Ingestion cycle failed, serving previous values"
            );
        }
        self.registry.snapshot()
    }

    /// Collect and render the text exposition
    pub async fn scrape(&self) -> String {
        let snapshot = self.collect().await;
        encode(&snapshot)
    }

    /// Body and content type for an HTTP scrape response
    pub async fn export_http(&self) -> (String, &'static str) {
        (self.scrape().await, TEXT_CONTENT_TYPE)
    }

    async fn run_cycle(&self) -> Result<()> {
        let started = Instant::now();
        let result = self.ingestor.ingest().await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut batch = UpdateBatch::new();
        let status = match result {
            Ok(outcome) => {
                tracing::debug!(
                    upstream = %self.upstream(),
                    records = outcome.records_seen,
                    matched = outcome.records_matched,
                    updates = outcome.batch.len(),
                    skipped = outcome.fields_skipped,
                    "Ingestion cycle complete"
                );
                batch.extend(outcome.batch);
                batch.set_gauge(self.self_metrics.up, 1.0);
                Ok(())
            }
            Err(e) => {
                batch.set_gauge(self.self_metrics.up, 0.0);
                batch.add_counter(self.self_metrics.failures, 1.0);
                Err(e)
            }
        };
        batch.set_gauge(self.self_metrics.duration, elapsed);

        self.registry.commit(&batch)?;
        status
    }
}

/// Render a snapshot in the text exposition format, in declaration order
pub fn encode(snapshot: &RegistrySnapshot<'_>) -> String {
    let families = snapshot.to_families();
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
