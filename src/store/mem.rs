//! In-memory vector store
//!
//! Reference `VectorStoreAdapter` backed by a `DashMap`. Distance is brute
//! force cosine over all matching records, which is fine at the scale a
//! single-process memory service sees in tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{cosine_distance, IndexedRecord, RecordUpdate, VectorQuery, VectorStoreAdapter};
use crate::error::{MemoryError, Result};
use crate::types::{MemoryRecord, MemoryRecordResult, MemoryRecordResults};

#[derive(Debug, Clone)]
struct StoredRecord {
    record: MemoryRecord,
    vector: Vec<f32>,
}

/// DashMap-backed reference backend
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: DashMap<String, StoredRecord>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VectorStoreAdapter for InMemoryVectorStore {
    async fn index(&self, records: Vec<IndexedRecord>) -> Result<Vec<MemoryRecord>> {
        let mut persisted = Vec::with_capacity(records.len());
        for IndexedRecord { mut record, vector } in records {
            if record.id.is_empty() {
                return Err(MemoryError::InvalidInput(
                    "record id must be assigned before indexing".to_string(),
                ));
            }
            if record.text.trim().is_empty() {
                return Err(MemoryError::InvalidInput(
                    "record text must be non-empty".to_string(),
                ));
            }
            // persisted_at is monotonic: re-indexing an id keeps the original
            let prior = self.records.get(&record.id).and_then(|r| r.record.persisted_at);
            record.persisted_at = Some(prior.unwrap_or_else(Utc::now));
            persisted.push(record.clone());
            self.records
                .insert(record.id.clone(), StoredRecord { record, vector });
        }
        Ok(persisted)
    }

    async fn update(&self, updates: Vec<RecordUpdate>) -> Result<()> {
        for update in updates {
            let Some(mut entry) = self.records.get_mut(&update.id) else {
                return Err(MemoryError::NotFound(format!("record {}", update.id)));
            };
            let stored = entry.value_mut();
            if let Some(text) = update.text {
                stored.record.text = text;
            }
            if let Some(vector) = update.vector {
                stored.vector = vector;
            }
            if let Some(memory_type) = update.memory_type {
                stored.record.memory_type = memory_type;
            }
            if let Some(topics) = update.topics {
                stored.record.topics = topics;
            }
            if let Some(entities) = update.entities {
                stored.record.entities = entities;
            }
            if let Some(pinned) = update.pinned {
                stored.record.pinned = pinned;
            }
            if let Some(event_date) = update.event_date {
                stored.record.event_date = event_date;
            }
            if let Some(flag) = update.discrete_memory_extracted {
                stored.record.discrete_memory_extracted = flag;
            }
            if let Some(last_accessed) = update.last_accessed {
                stored.record.last_accessed = last_accessed;
            }
            if let Some(access_count) = update.access_count {
                stored.record.access_count = access_count;
            }
            if let Some(created_at) = update.created_at {
                stored.record.created_at = created_at;
            }
            if let Some(updated_at) = update.updated_at {
                stored.record.updated_at = updated_at;
            }
            if let Some(memory_hash) = update.memory_hash {
                stored.record.memory_hash = Some(memory_hash);
            }
            if let Some(extracted_from) = update.extracted_from {
                stored.record.extracted_from = extracted_from;
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.records.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn search(&self, query: VectorQuery) -> Result<MemoryRecordResults> {
        let mut matches: Vec<MemoryRecordResult> = self
            .records
            .iter()
            .filter(|entry| query.filters.matches(&entry.value().record))
            .filter_map(|entry| {
                let stored = entry.value();
                let dist = match &query.vector {
                    Some(v) => {
                        if stored.vector.is_empty() {
                            return None;
                        }
                        cosine_distance(v, &stored.vector)
                    }
                    None => 0.0,
                };
                if let Some(threshold) = query.distance_threshold {
                    if dist > threshold {
                        return None;
                    }
                }
                Some(MemoryRecordResult {
                    record: stored.record.clone(),
                    dist,
                    origin: None,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.dist
                .partial_cmp(&b.dist)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        let total = matches.len();
        let page: Vec<MemoryRecordResult> = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        let next_offset = if query.offset + page.len() < total {
            Some(query.offset + page.len())
        } else {
            None
        };

        Ok(MemoryRecordResults {
            memories: page,
            total,
            next_offset,
        })
    }

    async fn get_by_id(&self, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{SearchFilters, TagFilter};

    fn indexed(id: &str, text: &str, vector: Vec<f32>) -> IndexedRecord {
        let mut record = MemoryRecord::new(text);
        record.id = id.to_string();
        IndexedRecord { record, vector }
    }

    #[tokio::test]
    async fn test_index_assigns_persisted_at() {
        let store = InMemoryVectorStore::new();
        let persisted = store
            .index(vec![indexed("a", "User likes tea", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert!(persisted[0].persisted_at.is_some());
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent_and_persisted_at_monotonic() {
        let store = InMemoryVectorStore::new();
        let first = store
            .index(vec![indexed("a", "User likes tea", vec![1.0, 0.0])])
            .await
            .unwrap();
        let second = store
            .index(vec![indexed("a", "User likes tea", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(first[0].persisted_at, second[0].persisted_at);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let store = InMemoryVectorStore::new();
        let result = store.index(vec![indexed("a", "   ", vec![1.0])]).await;
        assert!(matches!(result, Err(MemoryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_search_orders_by_distance_then_id() {
        let store = InMemoryVectorStore::new();
        store
            .index(vec![
                indexed("b", "close match", vec![1.0, 0.0]),
                indexed("a", "close match too", vec![1.0, 0.0]),
                indexed("c", "far match", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store
            .search(VectorQuery {
                vector: Some(vec![1.0, 0.0]),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        let ids: Vec<&str> = results.memories.iter().map(|m| m.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.memories[0].dist <= results.memories[2].dist);
    }

    #[tokio::test]
    async fn test_distance_threshold_filters() {
        let store = InMemoryVectorStore::new();
        store
            .index(vec![
                indexed("a", "near", vec![1.0, 0.0]),
                indexed("b", "far", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store
            .search(VectorQuery {
                vector: Some(vec![1.0, 0.0]),
                distance_threshold: Some(0.5),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.memories[0].record.id, "a");
    }

    #[tokio::test]
    async fn test_pagination_is_stable() {
        let store = InMemoryVectorStore::new();
        store
            .index(vec![
                indexed("a", "one", vec![1.0, 0.0]),
                indexed("b", "two", vec![1.0, 0.0]),
                indexed("c", "three", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let all = store
            .search(VectorQuery {
                vector: Some(vec![1.0, 0.0]),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        // limit=1, offset=k returns the k+1-th result of the unpaged list
        for k in 0..3 {
            let page = store
                .search(VectorQuery {
                    vector: Some(vec![1.0, 0.0]),
                    limit: 1,
                    offset: k,
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(page.memories.len(), 1);
            assert_eq!(page.memories[0].record.id, all.memories[k].record.id);
        }
    }

    #[tokio::test]
    async fn test_filter_only_search() {
        let store = InMemoryVectorStore::new();
        let mut record = MemoryRecord::new("scoped");
        record.id = "a".to_string();
        record.namespace = Some("ns1".to_string());
        store
            .index(vec![IndexedRecord {
                record,
                vector: vec![],
            }])
            .await
            .unwrap();

        let results = store
            .search(VectorQuery {
                filters: SearchFilters {
                    namespace: Some(TagFilter::Eq("ns1".to_string())),
                    ..Default::default()
                },
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.memories[0].dist, 0.0);
    }

    #[tokio::test]
    async fn test_update_leaves_unspecified_fields() {
        let store = InMemoryVectorStore::new();
        let mut record = MemoryRecord::new("original");
        record.id = "a".to_string();
        record.topics = vec!["tea".to_string()];
        store
            .index(vec![IndexedRecord {
                record,
                vector: vec![1.0],
            }])
            .await
            .unwrap();

        store
            .update(vec![RecordUpdate {
                pinned: Some(true),
                ..RecordUpdate::for_id("a")
            }])
            .await
            .unwrap();

        let fetched = store.get_by_id(&["a".to_string()]).await.unwrap();
        assert!(fetched[0].pinned);
        assert_eq!(fetched[0].text, "original");
        assert_eq!(fetched[0].topics, vec!["tea".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let store = InMemoryVectorStore::new();
        store
            .index(vec![indexed("a", "one", vec![1.0])])
            .await
            .unwrap();
        let count = store
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.is_empty());
    }
}
