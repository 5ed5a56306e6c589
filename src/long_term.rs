//! Long-term memory engine
//!
//! Orchestrates the vector store, extraction, and deduplication. Indexing
//! runs each record through id assignment, hash computation, exact and
//! semantic dedup, tagging, and embedding before it reaches the adapter.
//! Searching embeds the query, over-fetches when recency boosting is on,
//! re-ranks, and bumps access stats in the background.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::Settings;
use crate::dedup::{
    judge_semantic_duplicate, merge_exact, merge_semantic, record_hash,
};
use crate::error::{MemoryError, Result};
use crate::extraction::{extract_discrete, handle_extraction};
use crate::filters::{FlagFilter, SearchFilters, TagFilter, TypeFilter};
use crate::llm::ModelClient;
use crate::rerank::rerank;
use crate::store::{IndexedRecord, RecordUpdate, VectorQuery, VectorStoreAdapter};
use crate::tasks::{Task, TaskScheduler};
use crate::types::{
    generate_record_id, ExtractedFlag, MemoryRecord, MemoryRecordPatch, MemoryRecordResults,
    MemoryRecordType, SearchRequest,
};

/// Extra candidates fetched ahead of recency re-ranking
fn recency_overfetch(limit: usize) -> usize {
    (2 * limit).min(50)
}

/// Page size for the backlog extraction sweep
const SWEEP_PAGE_SIZE: usize = 25;

const MAX_SEARCH_LIMIT: usize = 100;

pub struct LongTermMemoryEngine {
    adapter: Arc<dyn VectorStoreAdapter>,
    model: Arc<dyn ModelClient>,
    scheduler: TaskScheduler,
    settings: Arc<Settings>,
    /// Last access-touch per record id, for rate limiting
    last_touch: Arc<DashMap<String, Instant>>,
}

impl LongTermMemoryEngine {
    pub fn new(
        adapter: Arc<dyn VectorStoreAdapter>,
        model: Arc<dyn ModelClient>,
        scheduler: TaskScheduler,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            adapter,
            model,
            scheduler,
            settings,
            last_touch: Arc::new(DashMap::new()),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.model.create_embedding(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::Embedding("provider returned no vector".to_string()))
    }

    /// Index records into long-term storage.
    ///
    /// Safe to re-run: a replayed batch lands on the exact-hash dedup path
    /// and merges instead of duplicating.
    pub async fn index_memories(
        &self,
        records: Vec<MemoryRecord>,
        deduplicate: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let mut persisted = Vec::with_capacity(records.len());

        for mut record in records {
            if record.text.trim().is_empty() {
                tracing::warn!(id = %record.id, "skipping record with empty text");
                continue;
            }
            if record.id.is_empty() {
                record.id = generate_record_id();
            }
            let hash = record_hash(&record);
            record.memory_hash = Some(hash.clone());

            if deduplicate {
                if let Some(survivor) = self.merge_exact_duplicate(&record, &hash).await? {
                    persisted.push(survivor);
                    continue;
                }
            }

            let vector = self.embed(&record.text).await?;

            if deduplicate {
                match self.merge_semantic_duplicate(&record, &vector).await {
                    Ok(Some(merged)) => {
                        persisted.push(merged);
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // prefer a possible duplicate over losing the record
                        tracing::warn!(%err, id = %record.id, "semantic dedup failed, indexing anyway");
                    }
                }
            }

            if record.topics.is_empty() && record.entities.is_empty() {
                match handle_extraction(self.model.as_ref(), &self.settings, &record.text).await {
                    Ok((topics, entities)) => {
                        record.topics = topics;
                        record.entities = entities;
                    }
                    Err(err) => {
                        tracing::warn!(%err, id = %record.id, "tagging failed, indexing untagged")
                    }
                }
            }

            let needs_extraction = record.memory_type == MemoryRecordType::Message
                && record.discrete_memory_extracted.is_pending();
            let record_id = record.id.clone();

            let mut stored = self
                .adapter
                .index(vec![IndexedRecord { record, vector }])
                .await?;
            persisted.append(&mut stored);

            if needs_extraction {
                if let Err(err) = self.scheduler.schedule(Task::Extract {
                    record_id: record_id.clone(),
                }) {
                    tracing::warn!(%err, record_id = %record_id, "failed to schedule extraction");
                }
            }
        }

        Ok(persisted)
    }

    /// Exact-hash dedup: merge into the stored twin when one exists
    async fn merge_exact_duplicate(
        &self,
        record: &MemoryRecord,
        hash: &str,
    ) -> Result<Option<MemoryRecord>> {
        let existing = self
            .adapter
            .search(VectorQuery {
                filters: SearchFilters {
                    memory_hash: Some(hash.to_string()),
                    ..Default::default()
                },
                limit: 1,
                ..Default::default()
            })
            .await?;

        let Some(twin) = existing.memories.into_iter().next() else {
            return Ok(None);
        };

        let merged = merge_exact(&twin.record, record);
        tracing::debug!(
            survivor = %merged.id,
            duplicate = %record.id,
            "exact duplicate merged"
        );
        self.adapter
            .update(vec![RecordUpdate {
                topics: Some(merged.topics.clone()),
                entities: Some(merged.entities.clone()),
                extracted_from: Some(merged.extracted_from.clone()),
                access_count: Some(merged.access_count),
                pinned: Some(merged.pinned),
                created_at: Some(merged.created_at),
                updated_at: Some(merged.updated_at),
                last_accessed: Some(merged.last_accessed),
                ..RecordUpdate::for_id(merged.id.clone())
            }])
            .await?;
        Ok(Some(merged))
    }

    /// Semantic dedup: find the nearest record in the same scope and let the
    /// LLM decide whether to merge. Returns the merged record when it does.
    async fn merge_semantic_duplicate(
        &self,
        record: &MemoryRecord,
        vector: &[f32],
    ) -> Result<Option<MemoryRecord>> {
        let mut filters = SearchFilters::default();
        if let Some(ns) = &record.namespace {
            filters.namespace = Some(TagFilter::Eq(ns.clone()));
        }
        if let Some(user) = &record.user_id {
            filters.user_id = Some(TagFilter::Eq(user.clone()));
        }

        let candidates = self
            .adapter
            .search(VectorQuery {
                vector: Some(vector.to_vec()),
                filters,
                limit: 5,
                distance_threshold: Some(self.settings.semantic_dedup_threshold),
                ..Default::default()
            })
            .await?;

        // eq filters cannot express "field is absent", so pin down the scope here
        let nearest = candidates.memories.into_iter().find(|c| {
            c.record.id != record.id
                && c.record.namespace == record.namespace
                && c.record.user_id == record.user_id
        });
        let Some(nearest) = nearest else {
            return Ok(None);
        };

        let judgment = judge_semantic_duplicate(
            self.model.as_ref(),
            &self.settings.generation_model,
            &nearest.record,
            record,
        )
        .await?;

        if !judgment.duplicate {
            return Ok(None);
        }
        let Some(merged_text) = judgment.merged_text else {
            return Ok(None);
        };

        let mut merged = merge_semantic(&nearest.record, record, merged_text);
        merged.id = generate_record_id();
        merged.memory_hash = Some(record_hash(&merged));
        let merged_vector = self.embed(&merged.text).await?;

        tracing::info!(
            kept = %merged.id,
            replaced_a = %nearest.record.id,
            replaced_b = %record.id,
            "semantic duplicates merged"
        );

        self.adapter.delete(&[nearest.record.id.clone()]).await?;
        let mut stored = self
            .adapter
            .index(vec![IndexedRecord {
                record: merged,
                vector: merged_vector,
            }])
            .await?;
        Ok(stored.pop())
    }

    /// Search long-term memory
    pub async fn search(&self, request: SearchRequest) -> Result<MemoryRecordResults> {
        if !self.settings.long_term_enabled {
            return Err(MemoryError::InvalidInput(
                "long-term memory is disabled".to_string(),
            ));
        }
        if let Some(text) = &request.text {
            if text.trim().is_empty() {
                return Err(MemoryError::InvalidInput(
                    "search text must be non-empty".to_string(),
                ));
            }
        }
        if request.limit == 0 {
            return Err(MemoryError::InvalidInput("limit must be at least 1".to_string()));
        }
        let limit = request.limit.min(MAX_SEARCH_LIMIT);

        let vector = match &request.text {
            Some(text) => Some(self.embed(text).await?),
            None => None,
        };

        let fetch_limit = match request.recency {
            Some(_) => limit + recency_overfetch(limit),
            None => limit,
        };

        let mut results = self
            .adapter
            .search(VectorQuery {
                vector,
                filters: request.filters.clone(),
                limit: fetch_limit,
                offset: request.offset,
                distance_threshold: request.distance_threshold,
            })
            .await?;

        if let Some(recency) = &request.recency {
            let ranked = rerank(results.memories, recency, Utc::now());
            results.memories = ranked.into_iter().take(limit).collect();
            results.next_offset = if request.offset + results.memories.len() < results.total {
                Some(request.offset + results.memories.len())
            } else {
                None
            };
        }

        self.touch_results(&results);
        Ok(results)
    }

    /// Best-effort async bump of `last_accessed` / `access_count`,
    /// rate-limited to once per minute per record
    fn touch_results(&self, results: &MemoryRecordResults) {
        let interval =
            std::time::Duration::from_secs(self.settings.access_touch_interval_secs);
        let mut updates = Vec::new();
        let now = Utc::now();

        for hit in &results.memories {
            let id = hit.record.id.clone();
            let due = match self.last_touch.get(&id) {
                Some(last) => last.elapsed() >= interval,
                None => true,
            };
            if !due {
                continue;
            }
            self.last_touch.insert(id.clone(), Instant::now());
            updates.push(RecordUpdate {
                last_accessed: Some(now),
                access_count: Some(hit.record.access_count + 1),
                ..RecordUpdate::for_id(id)
            });
        }

        if updates.is_empty() {
            return;
        }
        let adapter = Arc::clone(&self.adapter);
        tokio::spawn(async move {
            if let Err(err) = adapter.update(updates).await {
                tracing::debug!(%err, "access touch failed");
            }
        });
    }

    /// Delete records by id
    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.adapter.delete(ids).await
    }

    /// Fetch records by id
    pub async fn get_by_id(&self, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        self.adapter.get_by_id(ids).await
    }

    /// Apply a partial edit; text changes recompute the hash and embedding
    pub async fn edit(&self, id: &str, patch: MemoryRecordPatch) -> Result<MemoryRecord> {
        let mut records = self.adapter.get_by_id(&[id.to_string()]).await?;
        let Some(mut record) = records.pop() else {
            return Err(MemoryError::NotFound(format!("record {}", id)));
        };

        let mut update = RecordUpdate::for_id(id);
        if let Some(text) = patch.text {
            if text.trim().is_empty() {
                return Err(MemoryError::InvalidInput(
                    "record text must be non-empty".to_string(),
                ));
            }
            record.text = text.clone();
            update.vector = Some(self.embed(&text).await?);
            update.memory_hash = Some(record_hash(&record));
            update.text = Some(text);
        }
        if let Some(memory_type) = patch.memory_type {
            record.memory_type = memory_type;
            update.memory_type = Some(memory_type);
        }
        if let Some(topics) = patch.topics {
            record.topics = topics.clone();
            update.topics = Some(topics);
        }
        if let Some(entities) = patch.entities {
            record.entities = entities.clone();
            update.entities = Some(entities);
        }
        if let Some(pinned) = patch.pinned {
            record.pinned = pinned;
            update.pinned = Some(pinned);
        }
        if let Some(event_date) = patch.event_date {
            record.event_date = event_date;
            update.event_date = Some(event_date);
        }
        record.updated_at = Utc::now();
        update.updated_at = Some(record.updated_at);
        record.memory_hash = update
            .memory_hash
            .clone()
            .or(record.memory_hash);

        self.adapter.update(vec![update]).await?;
        Ok(record)
    }

    /// Run discrete extraction for one stored message record.
    ///
    /// Parse failures mark the source as extracted anyway so it cannot loop;
    /// transient provider failures bubble up for the task runner to retry.
    pub async fn run_extraction(&self, record_id: &str) -> Result<()> {
        let mut records = self.adapter.get_by_id(&[record_id.to_string()]).await?;
        let Some(source) = records.pop() else {
            return Ok(());
        };
        if source.memory_type != MemoryRecordType::Message
            || !source.discrete_memory_extracted.is_pending()
        {
            return Ok(());
        }
        if source.text.trim().is_empty() {
            tracing::info!(record_id, "deleting message record with no text");
            self.adapter.delete(&[record_id.to_string()]).await?;
            return Ok(());
        }

        match extract_discrete(self.model.as_ref(), &self.settings, &source).await {
            Ok(new_records) => {
                if !new_records.is_empty() {
                    self.index_memories(new_records, true).await?;
                }
            }
            Err(err) if err.is_retryable() => return Err(err),
            Err(err) => {
                tracing::error!(%err, record_id, "extraction unparseable, marking source done");
            }
        }

        self.adapter
            .update(vec![RecordUpdate {
                discrete_memory_extracted: Some(ExtractedFlag::Extracted),
                ..RecordUpdate::for_id(record_id)
            }])
            .await
    }

    /// Queue extraction for every message record not yet processed
    pub async fn schedule_unextracted(&self) -> Result<usize> {
        let mut scheduled = 0;
        let mut offset = 0;
        loop {
            let page = self
                .adapter
                .search(VectorQuery {
                    filters: SearchFilters {
                        memory_type: Some(TypeFilter::Eq(MemoryRecordType::Message)),
                        discrete_memory_extracted: Some(FlagFilter::Eq(ExtractedFlag::Pending)),
                        ..Default::default()
                    },
                    limit: SWEEP_PAGE_SIZE,
                    offset,
                    ..Default::default()
                })
                .await?;

            for hit in &page.memories {
                self.scheduler.schedule(Task::Extract {
                    record_id: hit.record.id.clone(),
                })?;
                scheduled += 1;
            }

            if page.memories.len() < SWEEP_PAGE_SIZE {
                break;
            }
            offset += SWEEP_PAGE_SIZE;
        }
        tracing::info!(scheduled, "queued backlog extraction");
        Ok(scheduled)
    }
}
