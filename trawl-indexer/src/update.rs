//! The debounced update queue.
//!
//! Updates arrive per (subject, type) and coalesce: at most one queue
//! entry is live per subject, and a sidecar map accumulates the type
//! names notified since that entry was enqueued. A worker dequeues the
//! head only once it has aged past the wait interval, draining the
//! sidecar set atomically with the dequeue, so each subject is handled
//! by at most one worker at a time and carries the union of its
//! accumulated types.
//!
//! Queue and sidecar persist together every five minutes (atomic
//! temp-file replace) and are restored before workers start, so pending
//! work survives restarts.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// What a dequeued entry asks of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Update,
    Delete,
}

/// One queued entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Enqueue time, epoch milliseconds
    pub timestamp: u64,
    pub subject: String,
    #[serde(rename = "type")]
    pub action: UpdateAction,
}

/// Queue plus sidecar map; persisted as one document so coalescing
/// semantics reconstruct exactly.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    queue: VecDeque<QueueEntry>,
    index: HashMap<String, BTreeSet<String>>,
}

/// The handler a worker invokes for each dequeued subject.
#[async_trait]
pub trait UpdateProcessor: Send + Sync {
    async fn process(
        &self,
        subject: &str,
        type_names: &[String],
        action: UpdateAction,
    ) -> Result<()>;
}

/// Configuration for the update handler.
#[derive(Debug, Clone)]
pub struct UpdateHandlerConfig {
    /// Minimum entry age before processing
    pub wait_interval: Duration,
    /// Number of worker tasks
    pub workers: usize,
    /// Durable queue file; None disables persistence
    pub persist_path: Option<PathBuf>,
    /// Interval between persistence snapshots
    pub persist_interval: Duration,
}

impl Default for UpdateHandlerConfig {
    fn default() -> Self {
        UpdateHandlerConfig {
            wait_interval: Duration::from_secs(60),
            workers: 2,
            persist_path: None,
            persist_interval: Duration::from_secs(300),
        }
    }
}

/// The debounced FIFO update queue.
pub struct UpdateHandler {
    state: Mutex<QueueState>,
    notify: Notify,
    config: UpdateHandlerConfig,
}

enum Dequeued {
    Ready {
        subject: String,
        type_names: Vec<String>,
        action: UpdateAction,
    },
    /// Head exists but has not aged enough
    Wait(Duration),
    Empty,
}

impl UpdateHandler {
    /// Create a handler, restoring persisted state when a queue file is
    /// configured and present.
    pub fn new(config: UpdateHandlerConfig) -> Arc<Self> {
        let state = config
            .persist_path
            .as_deref()
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<QueueState>(&contents) {
                    Ok(state) => {
                        tracing::info!(
                            entries = state.queue.len(),
                            "restored update queue from disk"
                        );
                        Some(state)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "update queue file is corrupt, starting empty");
                        None
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read update queue file, starting empty");
                    None
                }
            })
            .unwrap_or_default();

        Arc::new(UpdateHandler {
            state: Mutex::new(state),
            notify: Notify::new(),
            config,
        })
    }

    /// Enqueue an update for (subject, type).
    pub fn add_update(&self, subject: &str, type_name: &str) {
        self.enqueue(subject, type_name, UpdateAction::Update);
    }

    /// Enqueue a delete for (subject, type).
    pub fn add_delete(&self, subject: &str, type_name: &str) {
        self.enqueue(subject, type_name, UpdateAction::Delete);
    }

    fn enqueue(&self, subject: &str, type_name: &str, action: UpdateAction) {
        let was_empty = {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            let was_empty = state.queue.is_empty();

            if let Some(types) = state.index.get_mut(subject) {
                // Subject already queued: only extend the sidecar set
                types.insert(type_name.to_string());
                return;
            }

            state
                .index
                .insert(subject.to_string(), BTreeSet::from([type_name.to_string()]));
            state.queue.push_back(QueueEntry {
                timestamp: now_millis(),
                subject: subject.to_string(),
                action,
            });
            was_empty
        };

        if was_empty {
            // empty → non-empty transition wakes waiting workers; a
            // worker already in a timed wait wakes on its own
            self.notify.notify_waiters();
        }
    }

    /// Number of live queue entries.
    pub fn queue_length(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").queue.len()
    }

    /// The accumulated type names for a queued subject.
    pub fn pending_types(&self, subject: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .expect("queue mutex poisoned")
            .index
            .get(subject)
            .map(|types| types.iter().cloned().collect())
    }

    fn try_dequeue(&self) -> Dequeued {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        let Some(front) = state.queue.front() else {
            return Dequeued::Empty;
        };

        let wait_millis = self.config.wait_interval.as_millis() as u64;
        let age = now_millis().saturating_sub(front.timestamp);
        if age < wait_millis {
            return Dequeued::Wait(Duration::from_millis(wait_millis - age));
        }

        let entry = state.queue.pop_front().expect("front checked above");
        // Drain the sidecar set atomically with the dequeue
        let type_names = state
            .index
            .remove(&entry.subject)
            .map(|types| types.into_iter().collect())
            .unwrap_or_default();
        Dequeued::Ready {
            subject: entry.subject,
            type_names,
            action: entry.action,
        }
    }

    /// Start the worker pool and, when configured, the persistence loop.
    pub fn start(self: &Arc<Self>, processor: Arc<dyn UpdateProcessor>) {
        for worker in 0..self.config.workers.max(1) {
            let handler = Arc::clone(self);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                handler.worker_loop(worker, processor).await;
            });
        }

        if self.config.persist_path.is_some() {
            let handler = Arc::clone(self);
            tokio::spawn(async move {
                handler.persist_loop().await;
            });
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, processor: Arc<dyn UpdateProcessor>) {
        loop {
            // Register for wakeups before inspecting the queue; an
            // insertion between the check and the await is not lost
            let notified = self.notify.notified();

            match self.try_dequeue() {
                Dequeued::Ready {
                    subject,
                    type_names,
                    action,
                } => {
                    tracing::debug!(worker, subject = %subject, ?action, "processing update");
                    if let Err(e) = processor.process(&subject, &type_names, action).await {
                        // The entry is already removed; move on
                        tracing::error!(
                            worker,
                            subject = %subject,
                            error = %e,
                            "update processing failed"
                        );
                    }
                }
                Dequeued::Wait(remaining) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
                Dequeued::Empty => {
                    notified.await;
                }
            }
        }
    }

    async fn persist_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.persist_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = self.persist().await {
                tracing::error!(error = %e, "failed to persist update queue");
            }
        }
    }

    /// Snapshot the queue and sidecar map to the durable file.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.config.persist_path.clone() else {
            return Ok(());
        };

        let snapshot = {
            let state = self.state.lock().expect("queue mutex poisoned");
            serde_json::to_string(&*state).map_err(trawl_core::Error::from)?
        };

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| trawl_core::Error::io(e.to_string()))?;
            }
            // Atomic replace via temp file + rename
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, snapshot.as_bytes())
                .map_err(|e| trawl_core::Error::io(e.to_string()))?;
            std::fs::rename(&tmp_path, &path).map_err(|e| trawl_core::Error::io(e.to_string()))?;
            Ok::<(), trawl_core::Error>(())
        })
        .await
        .map_err(|e| trawl_core::Error::other(format!("task join error: {}", e)))??;

        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
