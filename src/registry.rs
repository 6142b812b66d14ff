//! Typed, thread-safe metric registry
//!
//! The registry owns the current value of every declared metric. Descriptors
//! are declared once at startup (while the registry is still exclusively
//! owned) and the set is frozen as soon as the registry is shared.
//!
//! # Consistency
//!
//! Ingestion cycles do not write metrics one by one. They collect an
//! [`UpdateBatch`] and [`commit`](MetricRegistry::commit) it under a single
//! write lock; [`snapshot`](MetricRegistry::snapshot) copies every value under
//! a single read lock. A scrape therefore always observes whole cycles, never
//! half of one cycle mixed with another.
//!
//! ```text
//!   cycle A ──▶ UpdateBatch ──┐                      ┌──▶ snapshot (scrape 1)
//!                             ├──▶ RwLock<values> ───┤
//!   cycle B ──▶ UpdateBatch ──┘                      └──▶ snapshot (scrape 2)
//! ```

use std::collections::HashMap;

use parking_lot::RwLock;
use prometheus::core::{Collector, Desc};
use prometheus::proto;

use crate::error::{Error, Result};
use crate::types::{MetricDescriptor, MetricId, MetricKind};

// ============================================================================
// Updates
// ============================================================================

/// A single value change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Update {
    /// Overwrite a gauge (last write wins)
    Set(f64),
    /// Overwrite a counter with an upstream cumulative reading
    Mirror(f64),
    /// Add a non-negative delta to a counter
    Add(f64),
}

impl Update {
    fn expected_kind(&self) -> MetricKind {
        match self {
            Update::Set(_) => MetricKind::Gauge,
            Update::Mirror(_) | Update::Add(_) => MetricKind::Counter,
        }
    }
}

/// Updates produced by one ingestion cycle, applied atomically
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    updates: Vec<(MetricId, Update)>,
}

impl UpdateBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update
    pub fn push(&mut self, id: MetricId, update: Update) {
        self.updates.push((id, update));
    }

    /// Queue a gauge overwrite
    pub fn set_gauge(&mut self, id: MetricId, value: f64) {
        self.push(id, Update::Set(value));
    }

    /// Queue a counter delta
    pub fn add_counter(&mut self, id: MetricId, delta: f64) {
        self.push(id, Update::Add(delta));
    }

    /// Append every update of another batch
    pub fn extend(&mut self, other: UpdateBatch) {
        self.updates.extend(other.updates);
    }

    /// Number of queued updates
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Queued updates in order
    pub fn iter(&self) -> impl Iterator<Item = &(MetricId, Update)> {
        self.updates.iter()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of declared metrics and their current values
#[derive(Debug, Default)]
pub struct MetricRegistry {
    descriptors: Vec<MetricDescriptor>,
    descs: Vec<Desc>,
    by_name: HashMap<String, MetricId>,
    /// `None` until the metric has been populated once
    values: RwLock<Vec<Option<f64>>>,
}

impl MetricRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a metric
    ///
    /// Declaring an identical descriptor twice returns the existing id.
    /// Reusing a name with a different kind or help text is an error.
    pub fn declare(&mut self, descriptor: MetricDescriptor) -> Result<MetricId> {
        if let Some(&id) = self.by_name.get(descriptor.fq_name()) {
            if self.descriptors[id.0] == descriptor {
                return Ok(id);
            }
            return Err(Error::Registry(format!(
                "metric {} already declared as {}",
                descriptor.fq_name(),
                self.descriptors[id.0]
            )));
        }

        let desc = Desc::new(
            descriptor.fq_name().to_string(),
            descriptor.help().to_string(),
            Vec::new(),
            HashMap::new(),
        )
        .map_err(|e| {
            Error::Configuration(format!("invalid metric {}: {}", descriptor.fq_name(), e))
        })?;

        let id = MetricId(self.descriptors.len());
        self.by_name.insert(descriptor.fq_name().to_string(), id);
        self.descriptors.push(descriptor);
        self.descs.push(desc);
        self.values.get_mut().push(None);
        Ok(id)
    }

    /// Declared descriptors in declaration order
    ///
    /// Independent of whether any value has been computed.
    pub fn enumerate(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Number of declared metrics
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look up a metric by fully-qualified name
    pub fn id(&self, fq_name: &str) -> Option<MetricId> {
        self.by_name.get(fq_name).copied()
    }

    /// Descriptor of a declared metric
    pub fn descriptor(&self, id: MetricId) -> Option<&MetricDescriptor> {
        self.descriptors.get(id.0)
    }

    /// Overwrite a gauge
    pub fn set_gauge(&self, id: MetricId, value: f64) -> Result<()> {
        self.apply_one(id, Update::Set(value))
    }

    /// Add a non-negative delta to a counter
    pub fn add_counter(&self, id: MetricId, delta: f64) -> Result<()> {
        self.apply_one(id, Update::Add(delta))
    }

    /// Apply a whole batch under one write lock
    ///
    /// The batch is validated first; an invalid update rejects the whole batch
    /// and leaves every value untouched. Returns the number of updates applied.
    pub fn commit(&self, batch: &UpdateBatch) -> Result<usize> {
        for (id, update) in batch.iter() {
            self.validate(*id, update)?;
        }
        let mut values = self.values.write();
        for (id, update) in batch.iter() {
            apply(&mut values[id.0], *update);
        }
        Ok(batch.len())
    }

    /// Coherent copy of every current value
    pub fn snapshot(&self) -> RegistrySnapshot<'_> {
        RegistrySnapshot {
            descriptors: &self.descriptors,
            values: self.values.read().clone(),
        }
    }

    fn apply_one(&self, id: MetricId, update: Update) -> Result<()> {
        self.validate(id, &update)?;
        apply(&mut self.values.write()[id.0], update);
        Ok(())
    }

    fn validate(&self, id: MetricId, update: &Update) -> Result<()> {
        let descriptor = self
            .descriptors
            .get(id.0)
            .ok_or_else(|| Error::Registry(format!("unknown metric id {}", id.0)))?;

        if descriptor.kind() != update.expected_kind() {
            return Err(Error::Registry(format!(
                "{:?} does not apply to {}",
                update, descriptor
            )));
        }
        if let Update::Add(delta) = update {
            if !delta.is_finite() || *delta < 0.0 {
                return Err(Error::Registry(format!(
                    "counter {} cannot add {}",
                    descriptor.fq_name(),
                    delta
                )));
            }
        }
        Ok(())
    }
}

fn apply(slot: &mut Option<f64>, update: Update) {
    *slot = Some(match update {
        Update::Set(v) | Update::Mirror(v) => v,
        Update::Add(delta) => slot.unwrap_or(0.0) + delta,
    });
}

// ============================================================================
// Snapshot
// ============================================================================

/// Values of every declared metric at one instant
#[derive(Debug, Clone)]
pub struct RegistrySnapshot<'a> {
    descriptors: &'a [MetricDescriptor],
    values: Vec<Option<f64>>,
}

impl<'a> RegistrySnapshot<'a> {
    /// Value of a metric, `None` if never populated
    pub fn value(&self, id: MetricId) -> Option<f64> {
        self.values.get(id.0).copied().flatten()
    }

    /// Value of a metric by fully-qualified name
    pub fn get(&self, fq_name: &str) -> Option<f64> {
        self.descriptors
            .iter()
            .position(|d| d.fq_name() == fq_name)
            .and_then(|i| self.values[i])
    }

    /// Every descriptor with its value, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&'a MetricDescriptor, Option<f64>)> + '_ {
        self.descriptors.iter().zip(self.values.iter().copied())
    }

    /// Number of metrics populated at least once
    pub fn populated(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Metric families for the text encoder
    ///
    /// Metrics never populated are omitted; their descriptors are still part
    /// of [`MetricRegistry::enumerate`].
    pub fn to_families(&self) -> Vec<proto::MetricFamily> {
        self.iter()
            .filter_map(|(descriptor, value)| value.map(|v| family(descriptor, v)))
            .collect()
    }
}

fn family(descriptor: &MetricDescriptor, value: f64) -> proto::MetricFamily {
    let mut metric = proto::Metric::default();
    match descriptor.kind() {
        MetricKind::Gauge => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(value);
            metric.set_gauge(gauge);
        }
        MetricKind::Counter => {
            let mut counter = proto::Counter::default();
            counter.set_value(value);
            metric.set_counter(counter);
        }
    }

    let mut mf = proto::MetricFamily::default();
    mf.set_name(descriptor.fq_name().to_string());
    mf.set_help(descriptor.help().to_string());
    mf.set_field_type(descriptor.kind().proto_type());
    mf.set_metric(vec![metric].into());
    mf
}

impl Collector for MetricRegistry {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        self.snapshot().to_families()
    }
}
