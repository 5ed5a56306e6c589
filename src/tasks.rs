//! Background task orchestration
//!
//! A bounded in-process queue feeds a fixed pool of workers. Summarization
//! is coalesced per session so at most one task per `(namespace, session_id)`
//! is queued or running. Transient failures retry with backoff; everything
//! else is logged and dropped so the pool never dies on a bad payload.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::error::{MemoryError, Result};
use crate::long_term::LongTermMemoryEngine;
use crate::types::MemoryRecord;
use crate::working::WorkingMemoryStore;

/// A unit of background work
#[derive(Debug, Clone)]
pub enum Task {
    /// Roll a session's message prefix into its summary
    Summarize {
        namespace: Option<String>,
        session_id: String,
        model_name: Option<String>,
    },
    /// Run discrete extraction for one stored message record
    Extract { record_id: String },
    /// Promote a single pending record into long-term storage
    Promote { record: MemoryRecord },
    /// Index a batch of records
    Index {
        records: Vec<MemoryRecord>,
        deduplicate: bool,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::Summarize { .. } => "summarize",
            Task::Extract { .. } => "extract",
            Task::Promote { .. } => "promote",
            Task::Index { .. } => "index",
        }
    }

    /// Key for at-most-one-per-key coalescing; only summarize tasks coalesce
    fn coalesce_key(&self) -> Option<String> {
        match self {
            Task::Summarize {
                namespace,
                session_id,
                ..
            } => Some(format!(
                "{}\0{}",
                namespace.as_deref().unwrap_or(""),
                session_id
            )),
            _ => None,
        }
    }
}

/// Cheap cloneable enqueue handle
#[derive(Clone)]
pub struct TaskScheduler {
    tx: Sender<Task>,
    /// Summarize keys currently queued or running
    inflight: Arc<DashMap<String, ()>>,
}

impl TaskScheduler {
    /// Enqueue a task without blocking the caller.
    ///
    /// A summarize task whose key is already queued or running is dropped
    /// (the running task will observe the latest session state anyway).
    pub fn schedule(&self, task: Task) -> Result<()> {
        if let Some(key) = task.coalesce_key() {
            if self.inflight.insert(key.clone(), ()).is_some() {
                tracing::debug!(key = %key, "summarize already pending, coalescing");
                return Ok(());
            }
            if let Err(err) = self.tx.try_send(task) {
                self.inflight.remove(&key);
                return Err(MemoryError::Internal(format!("task queue unavailable: {}", err)));
            }
            return Ok(());
        }

        self.tx
            .try_send(task)
            .map_err(|err| MemoryError::Internal(format!("task queue unavailable: {}", err)))
    }

    /// Number of queued tasks
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Everything a worker needs to execute tasks
#[derive(Clone)]
pub struct TaskDeps {
    pub engine: Arc<LongTermMemoryEngine>,
    pub working: Arc<WorkingMemoryStore>,
    pub settings: Arc<Settings>,
}

/// Build the queue, returning the enqueue handle and the worker-side receiver
pub fn task_queue(capacity: usize) -> (TaskScheduler, Receiver<Task>) {
    let (tx, rx) = bounded(capacity);
    (
        TaskScheduler {
            tx,
            inflight: Arc::new(DashMap::new()),
        },
        rx,
    )
}

/// Running worker pool
pub struct TaskRunner {
    rx: Receiver<Task>,
    scheduler: TaskScheduler,
    handles: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Spawn `max_workers` workers draining the queue
    pub fn start(rx: Receiver<Task>, scheduler: TaskScheduler, deps: TaskDeps) -> Self {
        let workers = deps.settings.max_workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let scheduler = scheduler.clone();
            let deps = deps.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, scheduler, deps).await;
            }));
        }
        Self {
            rx,
            scheduler,
            handles,
        }
    }

    /// Drain queued tasks within `timeout`, then cancel whatever is left.
    ///
    /// Tasks are safe to re-run, so cancellation mid-flight loses no
    /// correctness, only work.
    pub async fn shutdown(self, timeout: Duration) {
        self.rx.close();
        let drain = futures::future::join_all(self.handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            tracing::warn!("task runner drain timed out, cancelling in-flight tasks");
        }
        self.scheduler.inflight.clear();
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Receiver<Task>,
    scheduler: TaskScheduler,
    deps: TaskDeps,
) {
    while let Ok(task) = rx.recv().await {
        let kind = task.kind();
        let key = task.coalesce_key();

        let result = deps
            .settings
            .retry
            .run(kind, || execute(&deps, task.clone()))
            .await;

        if let Some(key) = key {
            scheduler.inflight.remove(&key);
        }

        match result {
            Ok(()) => tracing::debug!(worker_id, kind, "task complete"),
            Err(err) if err.is_retryable() => {
                tracing::error!(worker_id, kind, %err, "task failed after retries, dropping")
            }
            Err(err) => tracing::error!(worker_id, kind, %err, "task failed, dropping"),
        }
    }
    tracing::debug!(worker_id, "task worker stopped");
}

async fn execute(deps: &TaskDeps, task: Task) -> Result<()> {
    match task {
        Task::Summarize {
            namespace,
            session_id,
            model_name,
        } => {
            deps.working
                .run_summarization(namespace.as_deref(), &session_id, model_name.as_deref())
                .await
        }
        Task::Extract { record_id } => deps.engine.run_extraction(&record_id).await,
        Task::Promote { record } => {
            deps.engine.index_memories(vec![record], true).await?;
            Ok(())
        }
        Task::Index {
            records,
            deduplicate,
        } => {
            deps.engine.index_memories(records, deduplicate).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_tasks_coalesce_per_key() {
        let (scheduler, rx) = task_queue(16);
        let task = Task::Summarize {
            namespace: Some("ns".to_string()),
            session_id: "s1".to_string(),
            model_name: None,
        };
        scheduler.schedule(task.clone()).unwrap();
        scheduler.schedule(task.clone()).unwrap();
        scheduler.schedule(task).unwrap();
        assert_eq!(rx.len(), 1);

        // a different session is its own key
        scheduler
            .schedule(Task::Summarize {
                namespace: Some("ns".to_string()),
                session_id: "s2".to_string(),
                model_name: None,
            })
            .unwrap();
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_index_tasks_never_coalesce() {
        let (scheduler, rx) = task_queue(16);
        for _ in 0..3 {
            scheduler
                .schedule(Task::Index {
                    records: vec![],
                    deduplicate: true,
                })
                .unwrap();
        }
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn test_full_queue_reports_error_and_releases_key() {
        let (scheduler, _rx) = task_queue(1);
        scheduler
            .schedule(Task::Extract {
                record_id: "a".to_string(),
            })
            .unwrap();
        assert!(scheduler
            .schedule(Task::Extract {
                record_id: "b".to_string(),
            })
            .is_err());

        // a summarize rejected by a full queue must free its key for later
        let summarize = Task::Summarize {
            namespace: None,
            session_id: "s1".to_string(),
            model_name: None,
        };
        assert!(scheduler.schedule(summarize.clone()).is_err());
        assert!(scheduler.inflight.is_empty());
    }
}
