//! Embedding records and their typed metadata.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Embedding;

/// A scalar metadata value attached to an embedding record.
///
/// Deserialization tries the variants in declaration order, so JSON strings
/// that parse as RFC 3339 timestamps become [`MetadataValue::Timestamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl MetadataValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(_) | Self::Timestamp(_) | Self::Text(_) => None,
        }
    }

    /// Text view of the value, if it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bool(_) | Self::Number(_) | Self::Timestamp(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Metadata keyed by field name. Ordered so serialized output is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// An item embedding as returned by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique identifier (note id, creator id, ...).
    pub id: String,

    /// The raw embedding vector, not necessarily normalized.
    pub vector: Embedding,

    /// Associated metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl EmbeddingRecord {
    /// Create a record without metadata.
    pub fn new(id: impl Into<String>, vector: Embedding) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read a numeric metadata field.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(MetadataValue::as_f64)
    }
}

/// Selection applied by a vector store when listing records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Only return these ids.
    #[serde(default)]
    pub ids: Option<BTreeSet<String>>,

    /// Only return records whose metadata has these exact values.
    #[serde(default)]
    pub metadata_equals: Metadata,
}

impl RecordFilter {
    /// A filter that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to the given ids.
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Require a metadata field to equal a value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata_equals.insert(key.into(), value.into());
        self
    }

    /// Check whether a record passes this filter.
    pub fn matches(&self, record: &EmbeddingRecord) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&record.id)
        {
            return false;
        }

        self.metadata_equals
            .iter()
            .all(|(key, expected)| record.metadata.get(key) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_metadata_deserializes_scalar_kinds() {
        let json = r#"{
            "id": "n1",
            "vector": [1.0, 0.0],
            "metadata": {
                "title": "spring outfits",
                "likes": 120,
                "pinned": false,
                "published": "2024-03-01T08:00:00Z"
            }
        }"#;

        let record: EmbeddingRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.number("likes"), Some(120.0));
        assert_eq!(
            record.metadata.get("title"),
            Some(&MetadataValue::Text("spring outfits".to_string()))
        );
        assert_eq!(record.metadata.get("pinned"), Some(&MetadataValue::Bool(false)));
        assert!(matches!(
            record.metadata.get("published"),
            Some(MetadataValue::Timestamp(_))
        ));
    }

    #[test]
    fn test_filter_by_ids_and_metadata() {
        let a = EmbeddingRecord::new("a", vec![1.0]).with_metadata("platform", "xhs");
        let b = EmbeddingRecord::new("b", vec![1.0]).with_metadata("platform", "douyin");

        let filter = RecordFilter::all().with_metadata("platform", "xhs");
        assert!(filter.matches(&a));
        assert!(!filter.matches(&b));

        let filter = RecordFilter::all().with_ids(["b"]);
        assert!(!filter.matches(&a));
        assert!(filter.matches(&b));
    }
}
