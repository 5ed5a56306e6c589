//! Filter predicates for memory queries
//!
//! Each filter targets one record field with a closed set of operators. The
//! wire format is the nested-object form (`{"eq": "x"}`); the triple form
//! (`{"op": "eq", "value": "x"}`) is accepted as an alias and normalized
//! during deserialization. All supplied filters are ANDed.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{ExtractedFlag, MemoryRecord, MemoryRecordType};

/// Rewrite `{"op": ..., "value": ...}` into the tagged `{op: value}` form.
///
/// `between` accepts `value` as a two-element array.
fn normalize_triple(value: Value) -> Value {
    if let Value::Object(map) = &value {
        if map.len() == 2 {
            if let (Some(Value::String(op)), Some(v)) = (map.get("op"), map.get("value")) {
                let mut out = serde_json::Map::new();
                out.insert(op.clone(), v.clone());
                return Value::Object(out);
            }
        }
    }
    value
}

/// Filter on a scalar string field (`session_id`, `namespace`, `user_id`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFilter {
    Eq(String),
    Ne(String),
    AnyOf(Vec<String>),
    NoneOf(Vec<String>),
}

impl TagFilter {
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            TagFilter::Eq(expected) => value == Some(expected.as_str()),
            TagFilter::Ne(expected) => value != Some(expected.as_str()),
            TagFilter::AnyOf(options) => {
                value.is_some_and(|v| options.iter().any(|o| o == v))
            }
            TagFilter::NoneOf(options) => {
                !value.is_some_and(|v| options.iter().any(|o| o == v))
            }
        }
    }
}

/// Set-membership filter on a list field (`topics`, `entities`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetFilter {
    /// At least one of the supplied values is present
    AnyOf(Vec<String>),
    /// None of the supplied values are present
    NoneOf(Vec<String>),
}

impl SetFilter {
    pub fn matches(&self, values: &[String]) -> bool {
        match self {
            SetFilter::AnyOf(options) => options.iter().any(|o| values.contains(o)),
            SetFilter::NoneOf(options) => !options.iter().any(|o| values.contains(o)),
        }
    }
}

/// Filter on `memory_type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFilter {
    Eq(MemoryRecordType),
    AnyOf(Vec<MemoryRecordType>),
}

impl TypeFilter {
    pub fn matches(&self, value: MemoryRecordType) -> bool {
        match self {
            TypeFilter::Eq(expected) => *expected == value,
            TypeFilter::AnyOf(options) => options.contains(&value),
        }
    }
}

/// Range filter on a timestamp field (`created_at`, `last_accessed`, `event_date`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    Eq(DateTime<Utc>),
    Gt(DateTime<Utc>),
    Gte(DateTime<Utc>),
    Lt(DateTime<Utc>),
    Lte(DateTime<Utc>),
    /// Inclusive on both ends
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl TimeFilter {
    pub fn matches(&self, value: Option<DateTime<Utc>>) -> bool {
        let Some(v) = value else {
            return false;
        };
        match self {
            TimeFilter::Eq(t) => v == *t,
            TimeFilter::Gt(t) => v > *t,
            TimeFilter::Gte(t) => v >= *t,
            TimeFilter::Lt(t) => v < *t,
            TimeFilter::Lte(t) => v <= *t,
            TimeFilter::Between(lo, hi) => v >= *lo && v <= *hi,
        }
    }
}

/// Filter on the discrete-extraction flag; only equality is meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagFilter {
    Eq(ExtractedFlag),
}

impl FlagFilter {
    pub fn matches(&self, value: ExtractedFlag) -> bool {
        match self {
            FlagFilter::Eq(expected) => *expected == value,
        }
    }
}

/// The full set of structured filters a search may carry.
///
/// `memory_hash` is engine-internal (exact dedup lookup) and never accepted
/// from clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_tag"
    )]
    pub session_id: Option<TagFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_tag"
    )]
    pub namespace: Option<TagFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_tag"
    )]
    pub user_id: Option<TagFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_set"
    )]
    pub topics: Option<SetFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_set"
    )]
    pub entities: Option<SetFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_type"
    )]
    pub memory_type: Option<TypeFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_time"
    )]
    pub created_at: Option<TimeFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_time"
    )]
    pub last_accessed: Option<TimeFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_time"
    )]
    pub event_date: Option<TimeFilter>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_flag"
    )]
    pub discrete_memory_extracted: Option<FlagFilter>,
    #[serde(skip)]
    pub memory_hash: Option<String>,
}

macro_rules! opt_filter_deserializer {
    ($name:ident, $ty:ty) => {
        fn $name<'de, D>(deserializer: D) -> Result<Option<$ty>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<Value>::deserialize(deserializer)?;
            match raw {
                None | Some(Value::Null) => Ok(None),
                Some(v) => serde_json::from_value(normalize_triple(v))
                    .map(Some)
                    .map_err(DeError::custom),
            }
        }
    };
}

opt_filter_deserializer!(deserialize_opt_tag, TagFilter);
opt_filter_deserializer!(deserialize_opt_set, SetFilter);
opt_filter_deserializer!(deserialize_opt_type, TypeFilter);
opt_filter_deserializer!(deserialize_opt_time, TimeFilter);
opt_filter_deserializer!(deserialize_opt_flag, FlagFilter);

impl SearchFilters {
    /// Evaluate all supplied filters against a record (AND semantics)
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(f) = &self.session_id {
            if !f.matches(record.session_id.as_deref()) {
                return false;
            }
        }
        if let Some(f) = &self.namespace {
            if !f.matches(record.namespace.as_deref()) {
                return false;
            }
        }
        if let Some(f) = &self.user_id {
            if !f.matches(record.user_id.as_deref()) {
                return false;
            }
        }
        if let Some(f) = &self.topics {
            if !f.matches(&record.topics) {
                return false;
            }
        }
        if let Some(f) = &self.entities {
            if !f.matches(&record.entities) {
                return false;
            }
        }
        if let Some(f) = &self.memory_type {
            if !f.matches(record.memory_type) {
                return false;
            }
        }
        if let Some(f) = &self.created_at {
            if !f.matches(Some(record.created_at)) {
                return false;
            }
        }
        if let Some(f) = &self.last_accessed {
            if !f.matches(Some(record.last_accessed)) {
                return false;
            }
        }
        if let Some(f) = &self.event_date {
            if !f.matches(record.event_date) {
                return false;
            }
        }
        if let Some(f) = &self.discrete_memory_extracted {
            if !f.matches(record.discrete_memory_extracted) {
                return false;
            }
        }
        if let Some(hash) = &self.memory_hash {
            if record.memory_hash.as_deref() != Some(hash.as_str()) {
                return false;
            }
        }
        true
    }

    /// True when no filters are supplied
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.namespace.is_none()
            && self.user_id.is_none()
            && self.topics.is_none()
            && self.entities.is_none()
            && self.memory_type.is_none()
            && self.created_at.is_none()
            && self.last_accessed.is_none()
            && self.event_date.is_none()
            && self.discrete_memory_extracted.is_none()
            && self.memory_hash.is_none()
    }
}
