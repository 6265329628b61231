//! Value types that flow through the normalization pipeline.
//!
//! A [`NormalizedRecord`] is immutable once built: fields are private and
//! stages derive new records through [`RecordBuilder`]. All maps are ordered
//! so that serializing the same record always yields the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::constants::{META_TRANSFORM_COUNT, META_WARNINGS};

pub type Attributes = BTreeMap<String, Value>;

/// One normalized game event, e.g. a `HomeRun` with the batter attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Attributes,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRecord {
    tokens: Vec<String>,
    events: Vec<Event>,
    metadata: BTreeMap<String, Value>,
}

impl NormalizedRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Number of record-producing stages that touched this record.
    pub fn transform_count(&self) -> u64 {
        self.metadata
            .get(META_TRANSFORM_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.metadata
            .get(META_WARNINGS)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Start a new record from this one; the original is left untouched.
    pub fn to_builder(&self) -> RecordBuilder {
        RecordBuilder {
            tokens: self.tokens.clone(),
            events: self.events.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Canonical JSON bytes used for fingerprints and determinism checks.
    pub fn canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    tokens: Vec<String>,
    events: Vec<Event>,
    metadata: BTreeMap<String, Value>,
}

impl RecordBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(token.into());
        self
    }

    pub fn tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        let entry = self
            .metadata
            .entry(META_WARNINGS.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.push(Value::String(message.into()));
        }
        self
    }

    pub fn bump_transform_count(self) -> Self {
        let next = self
            .metadata
            .get(META_TRANSFORM_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        self.meta(META_TRANSFORM_COUNT, next)
    }

    pub fn build(self) -> NormalizedRecord {
        NormalizedRecord {
            tokens: self.tokens,
            events: self.events,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    Text,
    Record,
}

/// The value handed from one stage to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Record(NormalizedRecord),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Record(_) => PayloadKind::Record,
        }
    }
}

impl From<NormalizedRecord> for Payload {
    fn from(record: NormalizedRecord) -> Self {
        Payload::Record(record)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_leaves_source_record_untouched() {
        let original = NormalizedRecord::builder().token("TEAM:RedSox").build();
        let derived = original.to_builder().token("EVENT:Out").bump_transform_count().build();

        assert_eq!(original.tokens(), ["TEAM:RedSox"]);
        assert_eq!(derived.tokens().len(), 2);
        assert_eq!(derived.transform_count(), 1);
        assert_eq!(original.transform_count(), 0);
    }

    #[test]
    fn test_warnings_accumulate_in_order() {
        let record = NormalizedRecord::builder()
            .warning("first")
            .warning("second")
            .build();
        assert_eq!(record.warnings(), vec!["first", "second"]);
    }

    #[test]
    fn test_canonical_json_is_stable_regardless_of_insert_order() {
        let a = NormalizedRecord::builder().meta("b", 2).meta("a", 1).build();
        let b = NormalizedRecord::builder().meta("a", 1).meta("b", 2).build();
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
        assert_eq!(a.metadata().get("a"), Some(&json!(1)));
    }
}
