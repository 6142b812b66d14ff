//! Ingestion adapters
//!
//! An [`Ingestor`] runs one ingestion cycle: fetch the raw payload, decode it,
//! and turn every mapped field into an [`Update`]. It never touches the
//! registry directly; the cycle's [`UpdateBatch`] is committed by the scrape
//! handler in one step, so a failed cycle leaves the previous values intact.
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌─────────────┐    ┌──────────────┐
//! │ upstream │───▶│  RawPayload  │───▶│ ParsedRecord│───▶│ UpdateBatch  │
//! │ jmx/mntr │    │ (per cycle)  │    │  + extract  │    │ (per cycle)  │
//! └──────────┘    └──────────────┘    └─────────────┘    └──────────────┘
//! ```
//!
//! # Adapters
//!
//! - [`jmx::JmxIngestor`]: JSON bean document fetched over HTTP
//! - [`mntr::MntrIngestor`]: tab-separated lines from a ZooKeeper `mntr` query

pub mod jmx;
pub mod mntr;

pub use jmx::{CycleState, JmxIngestor};
pub use mntr::{CommandQuery, LineQuery, MntrIngestor, RefreshPolicy, SocketQuery};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::extract::{extract, ParsedRecord};
use crate::mapping::{FieldPath, MappingTable};
use crate::registry::{MetricRegistry, Update, UpdateBatch};
use crate::types::{MetricId, MetricKind};

/// Opaque bytes fetched from an upstream during one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload(Bytes);

impl RawPayload {
    /// Wrap fetched bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of one successful ingestion cycle
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Updates to commit
    pub batch: UpdateBatch,
    /// Records decoded from the payload
    pub records_seen: usize,
    /// Records whose identity is mapped
    pub records_matched: usize,
    /// Mapped fields skipped because they were missing or not numeric
    pub fields_skipped: usize,
}

/// One ingestion adapter
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Upstream description for logs
    fn upstream(&self) -> &str;

    /// Run one ingestion cycle
    ///
    /// Errors are per-cycle: [`Error::Fetch`](crate::error::Error::Fetch) or
    /// [`Error::MalformedPayload`](crate::error::Error::MalformedPayload).
    async fn ingest(&self) -> Result<IngestOutcome>;

    /// Whether a failed first cycle must abort startup
    fn requires_startup_sample(&self) -> bool {
        false
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// A mapped field bound to its registry slot
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    /// Field inside the record
    pub field: FieldPath,
    /// Registry slot
    pub id: MetricId,
    /// Kind of the metric
    pub kind: MetricKind,
}

impl FieldBinding {
    /// Update carrying an extracted value
    ///
    /// Upstream counters are cumulative readings, so they are mirrored rather
    /// than re-added every cycle.
    pub fn update(&self, value: f64) -> Update {
        match self.kind {
            MetricKind::Gauge => Update::Set(value),
            MetricKind::Counter => Update::Mirror(value),
        }
    }
}

/// Mapping table bound to the registry and the local host
///
/// Lookups go through [`MappingTable`]; `slots` holds the registry binding of
/// every mapping in declaration order.
#[derive(Debug, Clone)]
pub struct Bindings {
    table: MappingTable,
    slots: Vec<FieldBinding>,
    unresolved: Vec<String>,
}

impl Bindings {
    /// Declare every mapped descriptor and bind the table to `host`
    ///
    /// Descriptors whose identity needs the host name are still declared when
    /// `host` is `None`; they just never match a record.
    pub fn declare(
        table: &MappingTable,
        registry: &mut MetricRegistry,
        host: Option<&str>,
    ) -> Result<Self> {
        let table = table.clone().with_host(host);
        let mut slots = Vec::with_capacity(table.len());
        let mut unresolved = Vec::new();
        for mapping in table.iter() {
            let id = registry.declare(mapping.descriptor.clone())?;
            let host_scoped = mapping
                .identity
                .as_ref()
                .is_some_and(|pattern| pattern.requires_host());
            if host_scoped && host.is_none() {
                unresolved.push(mapping.descriptor.fq_name().to_string());
            }
            slots.push(FieldBinding {
                field: mapping.field.clone(),
                id,
                kind: mapping.descriptor.kind(),
            });
        }
        Ok(Self {
            table,
            slots,
            unresolved,
        })
    }

    /// Bindings fed by a record identity (`None` for line records)
    pub fn for_identity<'a>(
        &'a self,
        identity: Option<&'a str>,
    ) -> impl Iterator<Item = &'a FieldBinding> + 'a {
        self.table
            .mappings_for(identity)
            .filter_map(move |(index, _)| self.slots.get(index))
    }

    /// Binding of a line-protocol key
    pub fn for_key(&self, key: &str) -> Option<&FieldBinding> {
        self.table
            .position(None, key)
            .and_then(|index| self.slots.get(index))
    }

    /// Metrics left unbound because the host name is unknown
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Number of bound fields
    pub fn len(&self) -> usize {
        self.slots.len() - self.unresolved.len()
    }

    /// Whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract every bound field of a record into the outcome
///
/// Missing or mistyped fields are skipped and counted.
pub(crate) fn extract_into<'a>(
    record: &ParsedRecord<'_>,
    bindings: impl IntoIterator<Item = &'a FieldBinding>,
    outcome: &mut IngestOutcome,
) {
    for binding in bindings {
        match extract(record, &binding.field) {
            Ok(value) => outcome.batch.push(binding.id, binding.update(value)),
            Err(e) => {
                tracing::debug!(
                    record = record.identity().unwrap_or("<line>"),
                    error = %e,
                    "Skipping field"
                );
                outcome.fields_skipped += 1;
            }
        }
    }
}

/// Resolve the local host name used in host-scoped bean identities
pub fn local_host_name() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => Some(name.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to resolve host name");
            None
        }
    }
}
