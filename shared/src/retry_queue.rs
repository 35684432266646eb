use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{Dispatcher, KeyNamespace, KvKey, KvStore};
use crate::config::DEFAULT_QUEUE_STORAGE_KEY;
use crate::model::{Endpoint, QueuedRequest, RequestId, UnixTimeMs};

// ============================================================================
// Results
// ============================================================================

/// Receipt for an enqueue. `durable == false` means the entry lives only in
/// memory because the storage write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: RequestId,
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReport {
    /// Another drain held the single-flight guard; nothing was attempted.
    AlreadyRunning,
    Finished {
        delivered: usize,
        remaining: usize,
        /// Head entry whose delivery failed and now blocks the rest.
        blocked_on: Option<RequestId>,
    },
}

impl DrainReport {
    #[must_use]
    pub fn delivered(&self) -> usize {
        match self {
            DrainReport::AlreadyRunning => 0,
            DrainReport::Finished { delivered, .. } => *delivered,
        }
    }

    #[must_use]
    pub fn is_stalled(&self) -> bool {
        matches!(
            self,
            DrainReport::Finished {
                blocked_on: Some(_),
                ..
            }
        )
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Default)]
struct QueueMetrics {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    persistence_failures: AtomicU64,
    collapsed_drains: AtomicU64,
}

impl QueueMetrics {
    fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            collapsed_drains: self.collapsed_drains.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub persistence_failures: u64,
    pub collapsed_drains: u64,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    last_id: u64,
}

impl QueueState {
    /// Millisecond timestamps, bumped past the previous id so ids stay unique
    /// and increasing even within one millisecond or after a clock step back.
    fn next_id(&mut self, now: UnixTimeMs) -> RequestId {
        let id = now.as_millis().max(self.last_id.saturating_add(1));
        self.last_id = id;
        RequestId(id)
    }
}

/// Resets the single-flight flag when a drain finishes or its future is dropped.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Retry Queue
// ============================================================================

/// Ordered, persisted list of requests that failed direct dispatch.
///
/// Every mutation of the list happens under one async mutex and is written
/// through to storage before the mutating call returns. Replay is strictly
/// FIFO with head-of-line blocking: a failing head stops the drain so later
/// events never overtake it.
pub struct RetryQueue<S: KvStore> {
    storage: Arc<S>,
    dispatcher: Arc<dyn Dispatcher>,
    key: KvKey,
    state: Mutex<QueueState>,
    draining: AtomicBool,
    metrics: QueueMetrics,
}

impl<S: KvStore> RetryQueue<S> {
    pub fn new(storage: Arc<S>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let key = KvKey::from_static(KeyNamespace::Outbox, DEFAULT_QUEUE_STORAGE_KEY);
        Self::with_key(storage, dispatcher, key)
    }

    pub fn with_key(storage: Arc<S>, dispatcher: Arc<dyn Dispatcher>, key: KvKey) -> Self {
        Self {
            storage,
            dispatcher,
            key,
            state: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
            metrics: QueueMetrics::default(),
        }
    }

    /// Replaces the in-memory list with the persisted one and returns its length.
    ///
    /// Absent or malformed data yields an empty queue. A storage read error
    /// leaves the in-memory list untouched. Calling it twice is harmless.
    #[instrument(skip(self), fields(key = %self.key.raw()))]
    pub async fn load(&self) -> usize {
        let mut state = self.state.lock().await;

        let restored: Vec<QueuedRequest> = match self.storage.get(&self.key).await {
            Ok(None) => Vec::new(),
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "discarding malformed persisted queue");
                    Vec::new()
                }
            },
            Err(e) => {
                self.metrics
                    .persistence_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "failed to read persisted queue, keeping in-memory state");
                return state.pending.len();
            }
        };

        let max_id = restored.iter().map(|r| r.id.0).max().unwrap_or(0);
        state.last_id = state.last_id.max(max_id);
        state.pending = restored.into();

        info!(count = state.pending.len(), "retry queue loaded");
        state.pending.len()
    }

    /// Appends a request to the tail and persists the whole list.
    #[instrument(skip(self, target, payload), fields(target = %target))]
    pub async fn enqueue(&self, target: Endpoint, payload: String) -> Enqueued {
        let mut state = self.state.lock().await;
        let now = UnixTimeMs::now();
        let id = state.next_id(now);
        state.pending.push_back(QueuedRequest {
            id,
            target,
            payload,
            enqueued_at: now,
        });
        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);

        let durable = self.persist(&state).await;
        info!(%id, pending = state.pending.len(), durable, "request queued for replay");
        Enqueued { id, durable }
    }

    /// Replays pending requests head first until the list is empty or a
    /// delivery fails. Concurrent calls collapse into the running drain.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            self.metrics.collapsed_drains.fetch_add(1, Ordering::Relaxed);
            debug!("drain already in progress");
            return DrainReport::AlreadyRunning;
        };

        let mut delivered = 0;
        loop {
            // The head stays in the list while in flight, so a crash mid-send
            // replays it instead of losing it.
            let head = match self.state.lock().await.pending.front() {
                Some(request) => request.clone(),
                None => {
                    if delivered > 0 {
                        info!(delivered, "retry queue drained");
                    }
                    return DrainReport::Finished {
                        delivered,
                        remaining: 0,
                        blocked_on: None,
                    };
                }
            };

            match self.dispatcher.send(&head.target, &head.payload).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    if let Some(pos) = state.pending.iter().position(|r| r.id == head.id) {
                        state.pending.remove(pos);
                    }
                    self.persist(&state).await;
                    delivered += 1;
                    self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %head.id, target = %head.target, "replayed queued request");
                }
                Err(e) => {
                    self.metrics.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    let state = self.state.lock().await;
                    self.persist(&state).await;
                    warn!(
                        id = %head.id,
                        target = %head.target,
                        error = %e,
                        remaining = state.pending.len(),
                        "replay failed, halting drain"
                    );
                    return DrainReport::Finished {
                        delivered,
                        remaining: state.pending.len(),
                        blocked_on: Some(head.id),
                    };
                }
            }
        }
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Copy of the pending list in replay order.
    pub async fn snapshot(&self) -> Vec<QueuedRequest> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Writes the full list. Failures are logged and counted; the in-memory
    /// list stays authoritative either way.
    async fn persist(&self, state: &QueueState) -> bool {
        let result = match serde_json::to_vec(&state.pending) {
            Ok(bytes) => self.storage.set(&self.key, bytes).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.metrics
                    .persistence_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(error = %e, pending = state.pending.len(), "failed to persist retry queue");
                false
            }
        }
    }
}
