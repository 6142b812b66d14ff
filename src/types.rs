//! Core metric types shared by the mapping tables, the registry and the scrape handler

use std::fmt;

/// Position of a descriptor inside the [`MetricRegistry`](crate::registry::MetricRegistry)
///
/// Ids are handed out in declaration order and stay valid for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub(crate) usize);

impl MetricId {
    /// Declaration index of this metric
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Exposition type of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Instantaneous value, free to go up or down
    Gauge,
    /// Monotonically non-decreasing value
    Counter,
}

impl MetricKind {
    /// Name used on the `# TYPE` line
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    /// Protobuf metric type used by the prometheus encoder
    pub fn proto_type(&self) -> prometheus::proto::MetricType {
        match self {
            MetricKind::Gauge => prometheus::proto::MetricType::GAUGE,
            MetricKind::Counter => prometheus::proto::MetricType::COUNTER,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one exported metric
///
/// Immutable once declared. The fully-qualified name is `namespace_name`,
/// or just `name` when there is no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    name: String,
    namespace: Option<String>,
    kind: MetricKind,
    help: String,
    fq_name: String,
}

impl MetricDescriptor {
    /// Create a new descriptor
    pub fn new(
        namespace: Option<&str>,
        name: impl Into<String>,
        kind: MetricKind,
        help: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        let fq_name = match &namespace {
            Some(ns) => format!("{}_{}", ns, name),
            None => name.clone(),
        };
        Self {
            name,
            namespace,
            kind,
            help: help.into(),
            fq_name,
        }
    }

    /// Create a gauge descriptor
    pub fn gauge(
        namespace: Option<&str>,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self::new(namespace, name, MetricKind::Gauge, help)
    }

    /// Create a counter descriptor
    pub fn counter(
        namespace: Option<&str>,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self::new(namespace, name, MetricKind::Counter, help)
    }

    /// Short name without namespace
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Metric kind
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Help text
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Fully-qualified exposition name
    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.fq_name, self.kind)
    }
}
