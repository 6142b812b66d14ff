//! Declarative metric mapping tables
//!
//! A [`MappingTable`] associates `(record identity, field)` pairs of an
//! upstream payload with the [`MetricDescriptor`] they feed. One table is
//! declared per deployment target and is read-only after startup.
//!
//! ```text
//! ┌───────────────────────────────────────────┐      ┌──────────────────────────┐
//! │ Hadoop:service=DataNode,name=JvmMetrics   │      │ datanode_GcCount (gauge) │
//! │   GcCount ────────────────────────────────┼─────▶│                          │
//! └───────────────────────────────────────────┘      └──────────────────────────┘
//! ┌───────────────────────────────────────────┐      ┌──────────────────────────┐
//! │ (line record)  zk_avg_latency ────────────┼─────▶│ zk_avg_latency (gauge)   │
//! └───────────────────────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! Unknown `(identity, field)` pairs resolve to `None`. Upstream schemas grow
//! over time and unmapped attributes are ignored without error.

pub mod targets;

pub use targets::DeploymentTarget;

use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{MetricDescriptor, MetricKind};

// ============================================================================
// Record identities
// ============================================================================

/// Identity of a source record, optionally scoped to the local host
///
/// The pattern may contain a single `{host}` placeholder standing for the
/// host name resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityPattern(String);

impl IdentityPattern {
    /// Placeholder substituted with the local host name
    pub const HOST_PLACEHOLDER: &'static str = "{host}";

    /// Create a new identity pattern
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Raw pattern text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern embeds the host name
    pub fn requires_host(&self) -> bool {
        self.0.contains(Self::HOST_PLACEHOLDER)
    }

    /// Whether `identity` is this pattern resolved for `host`
    ///
    /// A host-scoped pattern never matches when the host is unknown.
    pub fn matches(&self, identity: &str, host: Option<&str>) -> bool {
        match self.0.split_once(Self::HOST_PLACEHOLDER) {
            None => self.0 == identity,
            Some((prefix, suffix)) => match host {
                Some(host) => {
                    identity
                        .strip_prefix(prefix)
                        .and_then(|rest| rest.strip_suffix(suffix))
                        == Some(host)
                }
                None => false,
            },
        }
    }
}

impl fmt::Display for IdentityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Field paths
// ============================================================================

/// Location of a numeric field inside a record
///
/// Most attributes are direct keys; a few (heap usage) are nested one level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// Direct attribute of the record
    Attribute(String),
    /// Attribute of a sub-object of the record
    Nested {
        /// Key of the sub-object
        parent: String,
        /// Key inside the sub-object
        child: String,
    },
}

impl FieldPath {
    /// Direct attribute path
    pub fn attribute(name: impl Into<String>) -> Self {
        FieldPath::Attribute(name.into())
    }

    /// Two-level path
    pub fn nested(parent: impl Into<String>, child: impl Into<String>) -> Self {
        FieldPath::Nested {
            parent: parent.into(),
            child: child.into(),
        }
    }

    /// Whether the dotted form of this path is `path`
    pub fn matches(&self, path: &str) -> bool {
        match self {
            FieldPath::Attribute(name) => name == path,
            FieldPath::Nested { parent, child } => {
                path.split_once('.') == Some((parent.as_str(), child.as_str()))
            }
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Attribute(name) => f.write_str(name),
            FieldPath::Nested { parent, child } => write!(f, "{}.{}", parent, child),
        }
    }
}

// ============================================================================
// Mapping table
// ============================================================================

/// One `(identity, field) -> descriptor` entry
#[derive(Debug, Clone)]
pub struct MetricMapping {
    /// Record identity; `None` for self-identifying line records
    pub identity: Option<IdentityPattern>,
    /// Field inside the record
    pub field: FieldPath,
    /// Metric fed by the field
    pub descriptor: MetricDescriptor,
}

/// Static lookup table for one deployment target
///
/// Host-scoped identities resolve against the host the table is bound to
/// with [`MappingTable::with_host`]; an unbound table never matches them.
#[derive(Debug, Clone)]
pub struct MappingTable {
    namespace: Option<String>,
    host: Option<String>,
    mappings: Vec<MetricMapping>,
}

impl MappingTable {
    /// Start a new table; every descriptor gets the given namespace
    pub fn builder(namespace: Option<&str>) -> MappingTableBuilder {
        MappingTableBuilder {
            namespace: namespace.map(str::to_string),
            mappings: Vec::new(),
        }
    }

    /// Bind the table to the local host name
    pub fn with_host(mut self, host: Option<&str>) -> Self {
        self.host = host.map(str::to_string);
        self
    }

    /// Namespace shared by the table's descriptors
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Host the table is bound to
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Mappings in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &MetricMapping> {
        self.mappings.iter()
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mappings fed by the record `identity`, with their declaration index
    ///
    /// Line-protocol mappings carry no identity and match every record.
    pub fn mappings_for<'a>(
        &'a self,
        identity: Option<&'a str>,
    ) -> impl Iterator<Item = (usize, &'a MetricMapping)> + 'a {
        let host = self.host();
        self.mappings
            .iter()
            .enumerate()
            .filter(move |(_, m)| match (&m.identity, identity) {
                (None, _) => true,
                (Some(pattern), Some(id)) => pattern.matches(id, host),
                (Some(_), None) => false,
            })
    }

    /// Declaration index of the mapping for `field` of the record `identity`
    pub fn position(&self, identity: Option<&str>, field: &str) -> Option<usize> {
        self.mappings_for(identity)
            .find(|(_, m)| m.field.matches(field))
            .map(|(index, _)| index)
    }

    /// Look up the descriptor fed by `field` of the record `identity`
    ///
    /// For line-protocol tables the identity is ignored and resolution is by
    /// field name alone.
    pub fn resolve(&self, identity: Option<&str>, field: &str) -> Option<&MetricDescriptor> {
        self.position(identity, field)
            .and_then(|index| self.mappings.get(index))
            .map(|m| &m.descriptor)
    }
}

/// Builder enforcing the table invariants
///
/// `(identity, field)` maps to at most one descriptor and descriptor names
/// are unique.
#[derive(Debug)]
pub struct MappingTableBuilder {
    namespace: Option<String>,
    mappings: Vec<MetricMapping>,
}

impl MappingTableBuilder {
    /// Map a field to a gauge named after the field
    pub fn gauge(self, identity: Option<&str>, field: &str) -> Self {
        let name = field.to_string();
        self.map(identity, FieldPath::attribute(field), &name, MetricKind::Gauge)
    }

    /// Map every listed field of one record to same-named gauges
    pub fn gauges(mut self, identity: Option<&str>, fields: &[&str]) -> Self {
        for field in fields {
            self = self.gauge(identity, field);
        }
        self
    }

    /// Map a field to a metric with an explicit name and kind
    pub fn map(
        mut self,
        identity: Option<&str>,
        field: FieldPath,
        name: &str,
        kind: MetricKind,
    ) -> Self {
        let help = match identity {
            Some(id) => format!("{} reported by {}", field, id),
            None => format!("{} reported by the upstream", field),
        };
        let descriptor = MetricDescriptor::new(self.namespace.as_deref(), name, kind, help);
        self.mappings.push(MetricMapping {
            identity: identity.map(IdentityPattern::new),
            field,
            descriptor,
        });
        self
    }

    /// Validate and freeze the table
    pub fn build(self) -> Result<MappingTable> {
        let mut keys = HashSet::new();
        let mut names = HashSet::new();
        for m in &self.mappings {
            if !keys.insert((m.identity.clone(), m.field.clone())) {
                return Err(Error::Configuration(format!(
                    "field {} of {} is mapped twice",
                    m.field,
                    m.identity.as_ref().map_or("<line>", IdentityPattern::as_str)
                )));
            }
            if !names.insert(m.descriptor.fq_name().to_string()) {
                return Err(Error::Configuration(format!(
                    "metric {} is declared twice",
                    m.descriptor.fq_name()
                )));
            }
        }
        Ok(MappingTable {
            namespace: self.namespace,
            host: None,
            mappings: self.mappings,
        })
    }
}
