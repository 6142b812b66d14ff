//! Field extraction from decoded upstream payloads
//!
//! JSON documents are decoded into typed [`BeanDocument`]s; each bean keeps its
//! attributes as a flat map. Line-protocol output is split into
//! [`LineRecord`]s. [`extract`] turns either into a single `f64`, reporting
//! absent or mistyped fields as [`FieldError`] so the caller can skip just
//! that metric.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::FieldError;
use crate::mapping::FieldPath;

// ============================================================================
// JSON beans
// ============================================================================

/// Top-level JMX servlet document: `{"beans": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct BeanDocument {
    /// Every bean exposed by the servlet
    pub beans: Vec<Bean>,
}

impl BeanDocument {
    /// Decode a document from raw bytes
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// One management bean
///
/// A missing or non-string `name` decodes as `None`; such a bean cannot be
/// mapped but does not invalidate the rest of the document.
#[derive(Debug, Clone, Deserialize)]
pub struct Bean {
    /// Object name, e.g. `Hadoop:service=NameNode,name=JvmMetrics`
    #[serde(default, deserialize_with = "string_or_none")]
    pub name: Option<String>,
    /// Remaining attributes
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(name) => Ok(Some(name)),
        _ => Ok(None),
    }
}

// ============================================================================
// Line records
// ============================================================================

/// One `key<TAB>value` line of line-protocol output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRecord<'a> {
    /// Key, trimmed
    pub key: &'a str,
    /// Raw value, trimmed
    pub value: &'a str,
}

impl<'a> LineRecord<'a> {
    /// Parse a line made of exactly two tab-separated fields
    pub fn parse(line: &'a str) -> Option<Self> {
        let mut parts = line.split('\t');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if parts.next().is_some() || key.is_empty() {
            return None;
        }
        Some(Self { key, value })
    }

    /// Iterate the well-formed records of a multi-line reply
    pub fn parse_all(text: &'a str) -> impl Iterator<Item = LineRecord<'a>> + 'a {
        text.lines().filter_map(LineRecord::parse)
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// A decoded unit of a payload
#[derive(Debug, Clone, Copy)]
pub enum ParsedRecord<'a> {
    /// Named JSON bean
    Bean(&'a Bean),
    /// Self-identifying text line
    Line(LineRecord<'a>),
}

impl<'a> ParsedRecord<'a> {
    /// Identity of the record, `None` for line records
    pub fn identity(&self) -> Option<&'a str> {
        match self {
            ParsedRecord::Bean(bean) => bean.name.as_deref(),
            ParsedRecord::Line(_) => None,
        }
    }
}

/// Extract a numeric field from a record
///
/// For line records the path must name the record's key; the value is parsed
/// as a float.
pub fn extract(record: &ParsedRecord<'_>, field: &FieldPath) -> Result<f64, FieldError> {
    match record {
        ParsedRecord::Bean(bean) => extract_bean_field(bean, field),
        ParsedRecord::Line(line) => match field {
            FieldPath::Attribute(key) if key == line.key => parse_line_value(line),
            _ => Err(FieldError::Missing(field.to_string())),
        },
    }
}

fn extract_bean_field(bean: &Bean, field: &FieldPath) -> Result<f64, FieldError> {
    let value = match field {
        FieldPath::Attribute(name) => bean.attributes.get(name),
        FieldPath::Nested { parent, child } => match bean.attributes.get(parent) {
            Some(Value::Object(inner)) => inner.get(child),
            Some(other) => {
                return Err(FieldError::TypeMismatch {
                    field: parent.clone(),
                    found: json_type(other),
                })
            }
            None => None,
        },
    };

    match value {
        None => Err(FieldError::Missing(field.to_string())),
        Some(v) => v.as_f64().ok_or_else(|| FieldError::TypeMismatch {
            field: field.to_string(),
            found: json_type(v),
        }),
    }
}

fn parse_line_value(line: &LineRecord<'_>) -> Result<f64, FieldError> {
    line.value
        .parse::<f64>()
        .map_err(|_| FieldError::Unparseable {
            field: line.key.to_string(),
            value: line.value.to_string(),
        })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_bean() -> Bean {
        let doc = BeanDocument::from_slice(
            br#"{"beans":[{
                "name":"java.lang:type=Memory",
                "HeapMemoryUsage":{"committed":1024,"init":512,"max":4096,"used":700},
                "ObjectPendingFinalizationCount":0,
                "Verbose":false
            }]}"#,
        )
        .unwrap();
        doc.beans.into_iter().next().unwrap()
    }

    #[test]
    fn test_decode_document() {
        let doc = BeanDocument::from_slice(
            br#"{"beans":[{"name":"Hadoop:service=DataNode,name=JvmMetrics","GcCount":12,"tag.Context":"jvm"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.beans.len(), 1);
        assert_eq!(
            doc.beans[0].name.as_deref(),
            Some("Hadoop:service=DataNode,name=JvmMetrics")
        );
        assert!(doc.beans[0].attributes.contains_key("GcCount"));
        assert!(!doc.beans[0].attributes.contains_key("name"));
    }

    #[test]
    fn test_decode_rejects_missing_beans() {
        assert!(BeanDocument::from_slice(br#"{"items":[]}"#).is_err());
        assert!(BeanDocument::from_slice(br#"{"beans":{}}"#).is_err());
        assert!(BeanDocument::from_slice(b"<html>").is_err());
    }

    #[test]
    fn test_decode_beans_without_usable_name() {
        let doc = BeanDocument::from_slice(
            br#"{"beans":[{"GcCount":1},{"name":7,"GcCount":2},{"name":null},{"name":"ok","GcCount":3}]}"#,
        )
        .unwrap();
        assert_eq!(doc.beans.len(), 4);
        assert_eq!(doc.beans[0].name, None);
        assert_eq!(doc.beans[1].name, None);
        assert_eq!(doc.beans[2].name, None);
        assert_eq!(doc.beans[3].name.as_deref(), Some("ok"));
        assert_eq!(ParsedRecord::Bean(&doc.beans[0]).identity(), None);
        assert_eq!(
            extract(&ParsedRecord::Bean(&doc.beans[1]), &FieldPath::attribute("GcCount")),
            Ok(2.0)
        );
    }

    #[test]
    fn test_extract_attribute() {
        let bean = memory_bean();
        let record = ParsedRecord::Bean(&bean);
        assert_eq!(
            extract(&record, &FieldPath::attribute("ObjectPendingFinalizationCount")),
            Ok(0.0)
        );
        assert_eq!(record.identity(), Some("java.lang:type=Memory"));
    }

    #[test]
    fn test_extract_nested() {
        let bean = memory_bean();
        let record = ParsedRecord::Bean(&bean);
        assert_eq!(
            extract(&record, &FieldPath::nested("HeapMemoryUsage", "used")),
            Ok(700.0)
        );
        assert_eq!(
            extract(&record, &FieldPath::nested("HeapMemoryUsage", "peak")),
            Err(FieldError::Missing("HeapMemoryUsage.peak".to_string()))
        );
        assert_eq!(
            extract(&record, &FieldPath::nested("Verbose", "x")),
            Err(FieldError::TypeMismatch {
                field: "Verbose".to_string(),
                found: "bool"
            })
        );
    }

    #[test]
    fn test_extract_missing_and_mismatch() {
        let bean = memory_bean();
        let record = ParsedRecord::Bean(&bean);
        assert_eq!(
            extract(&record, &FieldPath::attribute("NonHeapMemoryUsage")),
            Err(FieldError::Missing("NonHeapMemoryUsage".to_string()))
        );
        assert_eq!(
            extract(&record, &FieldPath::attribute("HeapMemoryUsage")),
            Err(FieldError::TypeMismatch {
                field: "HeapMemoryUsage".to_string(),
                found: "object"
            })
        );
    }

    #[test]
    fn test_line_parse() {
        assert_eq!(
            LineRecord::parse("zk_avg_latency\t42"),
            Some(LineRecord {
                key: "zk_avg_latency",
                value: "42"
            })
        );
        assert_eq!(
            LineRecord::parse(" zk_watch_count \t 7 "),
            Some(LineRecord {
                key: "zk_watch_count",
                value: "7"
            })
        );
        assert_eq!(LineRecord::parse("garbage"), None);
        assert_eq!(LineRecord::parse("a\tb\tc"), None);
        assert_eq!(LineRecord::parse(""), None);
    }

    #[test]
    fn test_line_parse_all_skips_malformed() {
        let text = "zk_avg_latency\t42\ngarbage\nzk_watch_count\t7\n";
        let records: Vec<_> = LineRecord::parse_all(text).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "zk_avg_latency");
        assert_eq!(records[1].key, "zk_watch_count");
    }

    #[test]
    fn test_extract_line() {
        let line = LineRecord::parse("zk_avg_latency\t42").unwrap();
        let record = ParsedRecord::Line(line);
        assert_eq!(record.identity(), None);
        assert_eq!(
            extract(&record, &FieldPath::attribute("zk_avg_latency")),
            Ok(42.0)
        );
        assert!(matches!(
            extract(&record, &FieldPath::attribute("zk_max_latency")),
            Err(FieldError::Missing(_))
        ));

        let state = LineRecord::parse("zk_server_state\tleader").unwrap();
        assert!(matches!(
            extract(&ParsedRecord::Line(state), &FieldPath::attribute("zk_server_state")),
            Err(FieldError::Unparseable { .. })
        ));
    }
}
