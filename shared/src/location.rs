use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{Dispatcher, KvStore, LocationProvider};
use crate::error::{SafetyError, SafetyResult};
use crate::model::{Coordinate, Endpoint, LocationSample, RequestId, UnixTimeMs};
use crate::retry_queue::RetryQueue;
use crate::zone::ZoneClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Unpermitted,
    Permitted,
    Sampling,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Delivered(LocationSample),
    Queued {
        sample: LocationSample,
        request: RequestId,
    },
    /// No usable fix this cycle; nothing was sent or queued.
    Skipped { reason: String },
}

impl SampleOutcome {
    #[must_use]
    pub fn sample(&self) -> Option<&LocationSample> {
        match self {
            Self::Delivered(sample) | Self::Queued { sample, .. } => Some(sample),
            Self::Skipped { .. } => None,
        }
    }
}

/// Read side of the most recent classified position.
pub trait CurrentLocation: Send + Sync {
    fn current_location(&self) -> Option<LocationSample>;
}

#[derive(Debug)]
struct TrackingModel {
    state: TrackingState,
    last_sample: Option<LocationSample>,
}

/// Turns raw fixes into classified samples that are either delivered or queued.
pub struct LocationPipeline<S: KvStore> {
    provider: Arc<dyn LocationProvider>,
    classifier: Arc<ZoneClassifier>,
    dispatcher: Arc<dyn Dispatcher>,
    queue: Arc<RetryQueue<S>>,
    model: Mutex<TrackingModel>,
}

impl<S: KvStore> LocationPipeline<S> {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        classifier: Arc<ZoneClassifier>,
        dispatcher: Arc<dyn Dispatcher>,
        queue: Arc<RetryQueue<S>>,
    ) -> Self {
        Self {
            provider,
            classifier,
            dispatcher,
            queue,
            model: Mutex::new(TrackingModel {
                state: TrackingState::Unpermitted,
                last_sample: None,
            }),
        }
    }

    fn model(&self) -> MutexGuard<'_, TrackingModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TrackingState {
        self.model().state
    }

    pub fn last_sample(&self) -> Option<LocationSample> {
        self.model().last_sample
    }

    /// Asks for permission once. A denial leaves the pipeline unpermitted and
    /// is returned to the caller; it is never retried automatically.
    #[instrument(skip(self))]
    pub async fn start_tracking(&self) -> SafetyResult<TrackingState> {
        let current = self.state();
        if current != TrackingState::Unpermitted {
            return Ok(current);
        }

        if !self.provider.request_permission().await.is_granted() {
            warn!("location permission denied");
            return Err(SafetyError::PermissionDenied);
        }

        let mut model = self.model();
        if model.state == TrackingState::Unpermitted {
            model.state = TrackingState::Permitted;
        }
        info!("location tracking permitted");
        Ok(model.state)
    }

    pub fn stop_tracking(&self) {
        let mut model = self.model();
        if model.state == TrackingState::Sampling {
            model.state = TrackingState::Permitted;
            info!("location tracking stopped");
        }
    }

    /// Runs one acquire, classify, dispatch cycle.
    #[instrument(skip(self))]
    pub async fn sample_once(&self) -> SafetyResult<SampleOutcome> {
        {
            let mut model = self.model();
            if model.state == TrackingState::Unpermitted {
                return Err(SafetyError::PermissionDenied);
            }
            model.state = TrackingState::Sampling;
        }

        let coordinate = match self.acquire().await {
            Ok(coordinate) => coordinate,
            Err(e) => {
                warn!(error = %e, "skipping location sample");
                return Ok(SampleOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };

        let zone = self.classifier.classify(coordinate).await;
        let sample = LocationSample::new(coordinate, UnixTimeMs::now(), zone);
        self.model().last_sample = Some(sample);

        let payload = serde_json::to_string(&sample)?;
        let target = Endpoint::location_ping();
        match self.dispatcher.send(&target, &payload).await {
            Ok(()) => {
                debug!(%zone, "location ping delivered");
                Ok(SampleOutcome::Delivered(sample))
            }
            Err(e) => {
                warn!(error = %e, "location ping failed, queueing");
                let receipt = self.queue.enqueue(target, payload).await;
                Ok(SampleOutcome::Queued {
                    sample,
                    request: receipt.id,
                })
            }
        }
    }

    async fn acquire(&self) -> SafetyResult<Coordinate> {
        let (latitude, longitude) = self
            .provider
            .current_position()
            .await
            .map_err(|e| SafetyError::PositionUnavailable(e.reason))?;
        Ok(Coordinate::new(latitude, longitude)?)
    }
}

impl<S: KvStore> CurrentLocation for LocationPipeline<S> {
    fn current_location(&self) -> Option<LocationSample> {
        self.last_sample()
    }
}
