//! Vector store adapter
//!
//! `VectorStoreAdapter` abstracts the durable long-term memory backend. Any
//! backend implementing the trait is acceptable; the crate ships an in-memory
//! reference implementation used by the default server wiring and by tests.
//!
//! # Design principles
//!
//! 1. **Single mutator**: the adapter is the only component that mutates
//!    long-term state.
//! 2. **Engine owns embeddings**: the long-term engine computes vectors and
//!    hands them in; the adapter stores and compares them.
//! 3. **Stable ordering**: search results are ascending by distance, ties
//!    broken by id, so pagination is deterministic.

mod mem;

pub use mem::InMemoryVectorStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::filters::SearchFilters;
use crate::types::{ExtractedFlag, MemoryRecord, MemoryRecordResults, MemoryRecordType};

/// A record paired with its embedding, ready for indexing
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub record: MemoryRecord,
    /// Empty when the record was stored without a vector (filter-only search
    /// still finds it; semantic search does not)
    pub vector: Vec<f32>,
}

/// Partial update of a stored record; `None` fields are left alone
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub id: String,
    pub text: Option<String>,
    /// Replacement vector, required when `text` changes
    pub vector: Option<Vec<f32>>,
    pub memory_type: Option<MemoryRecordType>,
    pub topics: Option<Vec<String>>,
    pub entities: Option<Vec<String>>,
    pub pinned: Option<bool>,
    pub event_date: Option<Option<DateTime<Utc>>>,
    pub discrete_memory_extracted: Option<ExtractedFlag>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub memory_hash: Option<String>,
    pub extracted_from: Option<Vec<String>>,
}

impl RecordUpdate {
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Query against the vector store
#[derive(Debug, Clone, Default)]
pub struct VectorQuery {
    /// Query embedding; absent means filter-only search ordered by id
    pub vector: Option<Vec<f32>>,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
    /// Maximum allowed distance
    pub distance_threshold: Option<f32>,
}

/// Capability interface for long-term memory backends
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Store records, assigning `persisted_at`. Idempotent by id: indexing an
    /// existing id replaces its content while `persisted_at` never moves
    /// backwards.
    async fn index(&self, records: Vec<IndexedRecord>) -> Result<Vec<MemoryRecord>>;

    /// Apply partial updates by id
    async fn update(&self, updates: Vec<RecordUpdate>) -> Result<()>;

    /// Delete by id, returning how many records existed
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Search with optional vector similarity plus structured filters.
    /// Results are ascending by `dist`, stable by id on ties.
    async fn search(&self, query: VectorQuery) -> Result<MemoryRecordResults>;

    /// Fetch records by id; missing ids are silently skipped
    async fn get_by_id(&self, ids: &[String]) -> Result<Vec<MemoryRecord>>;
}

/// Decorator enforcing an independent timeout on every adapter call.
///
/// Timeouts surface as transient errors, so background tasks retry them
/// like any other provider hiccup.
pub struct TimeoutAdapter<A> {
    inner: A,
    timeout: std::time::Duration,
}

impl<A: VectorStoreAdapter> TimeoutAdapter<A> {
    pub fn new(inner: A, timeout: std::time::Duration) -> Self {
        Self { inner, timeout }
    }

    async fn timed<T>(
        &self,
        label: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::MemoryError::Timeout(
                self.timeout.as_secs(),
                format!("vector store {}", label),
            )),
        }
    }
}

#[async_trait]
impl<A: VectorStoreAdapter> VectorStoreAdapter for TimeoutAdapter<A> {
    async fn index(&self, records: Vec<IndexedRecord>) -> Result<Vec<MemoryRecord>> {
        self.timed("index", self.inner.index(records)).await
    }

    async fn update(&self, updates: Vec<RecordUpdate>) -> Result<()> {
        self.timed("update", self.inner.update(updates)).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.timed("delete", self.inner.delete(ids)).await
    }

    async fn search(&self, query: VectorQuery) -> Result<MemoryRecordResults> {
        self.timed("search", self.inner.search(query)).await
    }

    async fn get_by_id(&self, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        self.timed("get", self.inner.get_by_id(ids)).await
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine distance in [0, 2]; smaller is closer
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_distance_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_distance(&a, &[1.0, 0.0]) - 0.0).abs() < 0.001);
        assert!((cosine_distance(&a, &[-1.0, 0.0]) - 2.0).abs() < 0.001);
        assert!((cosine_distance(&a, &[0.0, 1.0]) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_mismatched_lengths_are_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_timeout_adapter_times_out() {
        struct SlowStore;

        #[async_trait]
        impl VectorStoreAdapter for SlowStore {
            async fn index(&self, _records: Vec<IndexedRecord>) -> Result<Vec<MemoryRecord>> {
                Ok(vec![])
            }

            async fn update(&self, _updates: Vec<RecordUpdate>) -> Result<()> {
                Ok(())
            }

            async fn delete(&self, _ids: &[String]) -> Result<usize> {
                Ok(0)
            }

            async fn search(&self, _query: VectorQuery) -> Result<MemoryRecordResults> {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Ok(MemoryRecordResults::default())
            }

            async fn get_by_id(&self, _ids: &[String]) -> Result<Vec<MemoryRecord>> {
                Ok(vec![])
            }
        }

        let adapter =
            TimeoutAdapter::new(SlowStore, std::time::Duration::from_millis(10));
        let result = adapter.search(VectorQuery::default()).await;
        match result {
            Err(err) => assert!(err.is_retryable(), "store timeout must be transient"),
            Ok(_) => panic!("expected a timeout"),
        }

        // fast calls pass straight through
        assert_eq!(adapter.delete(&[]).await.unwrap(), 0);
    }
}
