use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::capabilities::KvStore;
use crate::retry_queue::{DrainReport, RetryQueue};

/// Bridges platform connectivity callbacks to the retry queue.
///
/// Connectivity is unknown until the platform first reports it. The first
/// "online" report and every later offline to online edge start a drain, so
/// entries restored at launch are replayed before anything else can overtake
/// them. Repeated "online" reports do not pile up drains.
pub struct NetworkMonitor<S: KvStore> {
    queue: Arc<RetryQueue<S>>,
    online: Mutex<Option<bool>>,
    reconnects: AtomicU64,
}

impl<S: KvStore> NetworkMonitor<S> {
    pub fn new(queue: Arc<RetryQueue<S>>) -> Self {
        Self {
            queue,
            online: Mutex::new(None),
            reconnects: AtomicU64::new(0),
        }
    }

    /// `None` until the first status report.
    pub fn status(&self) -> Option<bool> {
        *self.online.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.status() == Some(true)
    }

    /// Number of reports that started a drain.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Returns the drain report when this change restored connectivity.
    pub async fn on_status_changed(&self, online: bool) -> Option<DrainReport> {
        let previous = {
            let mut status = self.online.lock().unwrap_or_else(PoisonError::into_inner);
            status.replace(online)
        };

        if !online {
            if previous != Some(false) {
                info!("network lost");
            }
            return None;
        }
        if previous == Some(true) {
            debug!("network still online");
            return None;
        }

        self.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(
            pending = self.queue.size().await,
            first_report = previous.is_none(),
            "network available, draining queue"
        );
        Some(self.queue.drain().await)
    }
}
