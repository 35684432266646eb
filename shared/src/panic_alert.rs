use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{Dispatcher, KvStore};
use crate::config::{
    CoreConfig, DEFAULT_COUNTDOWN_START, DEFAULT_COUNTDOWN_TICK_MS, DEFAULT_PANIC_HISTORY_LIMIT,
};
use crate::error::{SafetyError, SafetyResult};
use crate::location::CurrentLocation;
use crate::model::{
    Endpoint, LocationSample, MediaRef, PanicEvent, PanicId, PanicStatus, UnixTimeMs,
};
use crate::retry_queue::RetryQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicState {
    Idle,
    AwaitingConfirmation,
    Counting(u8),
    Cancelled,
    Dispatching,
    Sent,
    Queued,
}

impl fmt::Display for PanicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingConfirmation => f.write_str("awaiting confirmation"),
            Self::Counting(n) => write!(f, "counting down: {n}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Dispatching => f.write_str("dispatching"),
            Self::Sent => f.write_str("sent"),
            Self::Queued => f.write_str("queued"),
        }
    }
}

/// Recordings attached to an alert, already uploaded or stored by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaCapture {
    pub audio: Option<MediaRef>,
    pub video: Option<MediaRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanicOutcome {
    Cancelled,
    /// Delivered or durably queued; check `status` to tell them apart.
    Dispatched(PanicEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanicSettings {
    pub countdown_start: u8,
    pub tick: Duration,
    pub history_limit: usize,
}

impl Default for PanicSettings {
    fn default() -> Self {
        Self {
            countdown_start: DEFAULT_COUNTDOWN_START,
            tick: Duration::from_millis(DEFAULT_COUNTDOWN_TICK_MS),
            history_limit: DEFAULT_PANIC_HISTORY_LIMIT,
        }
    }
}

impl From<&CoreConfig> for PanicSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            countdown_start: config.countdown_start,
            tick: config.countdown_tick(),
            history_limit: config.panic_history_limit,
        }
    }
}

/// Body of `POST /api/v1/alerts/panic`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PanicPayload<'a> {
    id: &'a PanicId,
    location: &'a LocationSample,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_file: Option<&'a MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_file: Option<&'a MediaRef>,
    timestamp: UnixTimeMs,
}

impl<'a> From<&'a PanicEvent> for PanicPayload<'a> {
    fn from(event: &'a PanicEvent) -> Self {
        Self {
            id: &event.id,
            location: &event.location,
            audio_file: event.audio_ref.as_ref(),
            video_file: event.video_ref.as_ref(),
            timestamp: event.raised_at,
        }
    }
}

/// State shared between the caller-facing machine and a detached delivery.
struct Machine {
    state: watch::Sender<PanicState>,
    sequence: AtomicU64,
    history: Mutex<VecDeque<PanicEvent>>,
    history_limit: usize,
}

impl Machine {
    fn cas(&self, seq: u64, expected: PanicState, next: PanicState) -> bool {
        self.state.send_if_modified(|s| {
            if self.sequence.load(Ordering::Acquire) == seq && *s == expected {
                *s = next;
                true
            } else {
                false
            }
        })
    }

    fn record(&self, event: &PanicEvent) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_front(event.clone());
        history.truncate(self.history_limit);
    }
}

/// Returns the machine to `Idle` if a countdown is abandoned, e.g. when the
/// `confirm` future is dropped. `Dispatching` is left to the delivery task.
struct SequenceGuard<'a> {
    machine: &'a Machine,
    seq: u64,
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        let machine = self.machine;
        let reset = machine.state.send_if_modified(|s| {
            let owned = machine.sequence.load(Ordering::Acquire) == self.seq;
            if owned && matches!(*s, PanicState::Counting(_) | PanicState::Cancelled) {
                *s = PanicState::Idle;
                true
            } else {
                false
            }
        });
        if reset {
            warn!(seq = self.seq, "abandoned panic countdown reset to idle");
        }
    }
}

/// Sends the alert or hands it to the retry queue, then settles the machine.
async fn deliver<S: KvStore>(
    machine: Arc<Machine>,
    dispatcher: Arc<dyn Dispatcher>,
    queue: Arc<RetryQueue<S>>,
    seq: u64,
    mut event: PanicEvent,
    payload: String,
) -> PanicEvent {
    let target = Endpoint::panic_alert();
    let settled = match dispatcher.send(&target, &payload).await {
        Ok(()) => {
            event.status = PanicStatus::Sent;
            info!(id = %event.id, "panic alert sent");
            PanicState::Sent
        }
        Err(e) => {
            let receipt = queue.enqueue(target, payload).await;
            event.status = PanicStatus::Queued;
            warn!(
                id = %event.id,
                request = %receipt.id,
                durable = receipt.durable,
                error = %e,
                "panic alert queued for retry"
            );
            PanicState::Queued
        }
    };
    machine.cas(seq, PanicState::Dispatching, settled);
    machine.record(&event);
    event
}

/// Confirm, count down, then send or queue exactly one emergency event.
///
/// Only one sequence runs at a time. Every transition is a compare-and-set on
/// the watched state, tagged with a sequence number so a stale countdown can
/// never advance a newer sequence.
pub struct PanicAlert<S: KvStore> {
    location: Arc<dyn CurrentLocation>,
    dispatcher: Arc<dyn Dispatcher>,
    queue: Arc<RetryQueue<S>>,
    machine: Arc<Machine>,
    settings: PanicSettings,
}

impl<S: KvStore + 'static> PanicAlert<S> {
    pub fn new(
        location: Arc<dyn CurrentLocation>,
        dispatcher: Arc<dyn Dispatcher>,
        queue: Arc<RetryQueue<S>>,
        settings: PanicSettings,
    ) -> Self {
        let (state, _) = watch::channel(PanicState::Idle);
        let machine = Machine {
            state,
            sequence: AtomicU64::new(0),
            history: Mutex::new(VecDeque::new()),
            history_limit: settings.history_limit,
        };
        Self {
            location,
            dispatcher,
            queue,
            machine: Arc::new(machine),
            settings,
        }
    }

    pub fn state(&self) -> PanicState {
        *self.machine.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanicState> {
        self.machine.state.subscribe()
    }

    /// Newest first.
    pub fn history(&self) -> Vec<PanicEvent> {
        let history = self
            .machine
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.iter().cloned().collect()
    }

    /// Opens the confirmation prompt.
    pub fn trigger(&self) -> SafetyResult<()> {
        let mut rejected = None;
        self.machine.state.send_if_modified(|s| match *s {
            PanicState::Idle | PanicState::Cancelled | PanicState::Sent | PanicState::Queued => {
                self.machine.sequence.fetch_add(1, Ordering::AcqRel);
                *s = PanicState::AwaitingConfirmation;
                true
            }
            PanicState::AwaitingConfirmation => false,
            busy => {
                rejected = Some(busy);
                false
            }
        });

        match rejected {
            Some(state) => {
                warn!(%state, "panic trigger rejected");
                Err(SafetyError::PanicInProgress { state })
            }
            None => {
                info!("panic trigger awaiting confirmation");
                Ok(())
            }
        }
    }

    /// Closes the confirmation prompt without raising anything.
    pub fn dismiss(&self) -> SafetyResult<()> {
        self.cas_any("dismiss", PanicState::AwaitingConfirmation, PanicState::Idle)
    }

    /// Aborts a running countdown. Once dispatching has begun the alert can
    /// no longer be stopped.
    pub fn cancel(&self) -> SafetyResult<()> {
        let mut result = Ok(());
        self.machine.state.send_if_modified(|s| match *s {
            PanicState::Counting(_) => {
                *s = PanicState::Cancelled;
                true
            }
            PanicState::Dispatching => {
                result = Err(SafetyError::NotCancellable);
                false
            }
            from => {
                result = Err(SafetyError::InvalidTransition {
                    from,
                    action: "cancel",
                });
                false
            }
        });
        if result.is_ok() {
            info!("panic countdown cancelled");
        }
        result
    }

    /// Starts the countdown and drives it to completion.
    ///
    /// Resolves with [`PanicOutcome::Cancelled`] if [`cancel`](Self::cancel)
    /// lands before the countdown reaches zero, otherwise with the dispatched
    /// event. Fails with [`SafetyError::LocationRequired`] when no position is
    /// known at dispatch time, leaving the machine idle.
    #[instrument(skip(self, media))]
    pub async fn confirm(&self, media: MediaCapture) -> SafetyResult<PanicOutcome> {
        let start = self.settings.countdown_start;
        let mut seq = None;
        let mut from = PanicState::Idle;
        self.machine.state.send_if_modified(|s| {
            from = *s;
            if *s == PanicState::AwaitingConfirmation {
                seq = Some(self.machine.sequence.load(Ordering::Acquire));
                *s = PanicState::Counting(start);
                true
            } else {
                false
            }
        });
        let Some(seq) = seq else {
            return Err(SafetyError::InvalidTransition {
                from,
                action: "confirm",
            });
        };
        let _guard = SequenceGuard {
            machine: &self.machine,
            seq,
        };
        info!(seq, start, "panic countdown started");

        if !self.count_down(seq, start).await {
            self.machine.cas(seq, PanicState::Cancelled, PanicState::Idle);
            return Ok(PanicOutcome::Cancelled);
        }

        if !self.machine.cas(seq, PanicState::Counting(0), PanicState::Dispatching) {
            self.machine.cas(seq, PanicState::Cancelled, PanicState::Idle);
            return Ok(PanicOutcome::Cancelled);
        }

        self.dispatch(seq, media).await.map(PanicOutcome::Dispatched)
    }

    /// Returns `false` as soon as the countdown is interrupted.
    async fn count_down(&self, seq: u64, start: u8) -> bool {
        let mut watcher = self.machine.state.subscribe();
        let mut deadline = Instant::now();

        for next in (0..start).rev() {
            let current = PanicState::Counting(next + 1);
            deadline += self.settings.tick;
            loop {
                tokio::select! {
                    () = sleep_until(deadline) => break,
                    changed = watcher.changed() => {
                        if changed.is_err() || *watcher.borrow_and_update() != current {
                            return false;
                        }
                    }
                }
            }
            if !self.machine.cas(seq, current, PanicState::Counting(next)) {
                return false;
            }
            debug!(remaining = next, "countdown tick");
        }
        true
    }

    async fn dispatch(&self, seq: u64, media: MediaCapture) -> SafetyResult<PanicEvent> {
        let Some(location) = self.location.current_location() else {
            self.machine.cas(seq, PanicState::Dispatching, PanicState::Idle);
            error!("panic alert aborted: no current location");
            return Err(SafetyError::LocationRequired);
        };

        let event = PanicEvent::new(location, media.audio, media.video, UnixTimeMs::now());
        let payload = match serde_json::to_string(&PanicPayload::from(&event)) {
            Ok(payload) => payload,
            Err(e) => {
                self.machine.cas(seq, PanicState::Dispatching, PanicState::Idle);
                return Err(e.into());
            }
        };

        // Detached, so dropping `confirm` cannot drop a confirmed alert.
        let delivery = tokio::spawn(deliver(
            Arc::clone(&self.machine),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.queue),
            seq,
            event,
            payload,
        ));
        delivery.await.map_err(|e| {
            self.machine.cas(seq, PanicState::Dispatching, PanicState::Idle);
            error!(error = %e, "panic delivery task failed");
            SafetyError::DispatchAborted(e.to_string())
        })
    }

    fn cas_any(
        &self,
        action: &'static str,
        expected: PanicState,
        next: PanicState,
    ) -> SafetyResult<()> {
        let mut from = expected;
        let moved = self.machine.state.send_if_modified(|s| {
            from = *s;
            if *s == expected {
                *s = next;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(SafetyError::InvalidTransition { from, action })
        }
    }
}
