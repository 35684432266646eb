// lib.rs - Offline-resilient safety event core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod location;
pub mod logging;
pub mod model;
pub mod network;
pub mod panic_alert;
pub mod retry_queue;
pub mod zone;

use std::sync::Arc;
use tracing::{info, instrument};

pub use capabilities::{
    Dispatcher, KvStore, LocationProvider, MemoryKvStore, PermissionStatus, TransportError,
    ZoneLookup,
};
pub use config::CoreConfig;
pub use error::{SafetyError, SafetyResult};
pub use location::{CurrentLocation, LocationPipeline, SampleOutcome, TrackingState};
pub use model::{Coordinate, LocationSample, PanicEvent, PanicStatus, QueuedRequest, Zone};
pub use network::NetworkMonitor;
pub use panic_alert::{MediaCapture, PanicAlert, PanicOutcome, PanicSettings, PanicState};
pub use retry_queue::{DrainReport, Enqueued, RetryQueue};
pub use zone::ZoneClassifier;

#[cfg(not(target_arch = "wasm32"))]
pub use capabilities::SqliteKvStore;

#[cfg(feature = "http")]
pub use capabilities::HttpTransport;

/// One wired set of components sharing a single retry queue.
///
/// Construct with [`SafetyCore::start`]; the persisted queue is loaded before
/// any component can enqueue or drain.
pub struct SafetyCore<S: KvStore + 'static> {
    config: CoreConfig,
    queue: Arc<RetryQueue<S>>,
    location: Arc<LocationPipeline<S>>,
    panic_alert: Arc<PanicAlert<S>>,
    network: Arc<NetworkMonitor<S>>,
}

impl<S: KvStore + 'static> SafetyCore<S> {
    #[instrument(skip_all)]
    pub async fn start(
        config: CoreConfig,
        storage: Arc<S>,
        dispatcher: Arc<dyn Dispatcher>,
        zone_lookup: Arc<dyn ZoneLookup>,
        provider: Arc<dyn LocationProvider>,
    ) -> SafetyResult<Self> {
        config.validate()?;
        let key = config.queue_key()?;

        let queue = Arc::new(RetryQueue::with_key(storage, Arc::clone(&dispatcher), key));
        let restored = queue.load().await;

        let classifier = Arc::new(ZoneClassifier::from_config(zone_lookup, &config));
        let location = Arc::new(LocationPipeline::new(
            provider,
            classifier,
            Arc::clone(&dispatcher),
            Arc::clone(&queue),
        ));
        let panic_alert = Arc::new(PanicAlert::new(
            Arc::clone(&location) as Arc<dyn CurrentLocation>,
            dispatcher,
            Arc::clone(&queue),
            PanicSettings::from(&config),
        ));
        let network = Arc::new(NetworkMonitor::new(Arc::clone(&queue)));

        info!(restored, "safety core started");
        Ok(Self {
            config,
            queue,
            location,
            panic_alert,
            network,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<RetryQueue<S>> {
        &self.queue
    }

    pub fn location(&self) -> &Arc<LocationPipeline<S>> {
        &self.location
    }

    pub fn panic_alert(&self) -> &Arc<PanicAlert<S>> {
        &self.panic_alert
    }

    pub fn network(&self) -> &Arc<NetworkMonitor<S>> {
        &self.network
    }

    /// Manual replay, e.g. from a pull-to-refresh.
    pub async fn flush(&self) -> DrainReport {
        self.queue.drain().await
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.size().await
    }
}

#[cfg(feature = "http")]
impl<S: KvStore + 'static> SafetyCore<S> {
    /// Wires both remote collaborators to one [`HttpTransport`].
    pub async fn start_http(
        config: CoreConfig,
        storage: Arc<S>,
        provider: Arc<dyn LocationProvider>,
        bearer_token: Option<secrecy::SecretString>,
    ) -> SafetyResult<Self> {
        config.validate()?;
        let mut transport = HttpTransport::new(&config.api_base_url, config.request_timeout())?;
        if let Some(token) = bearer_token {
            transport = transport.with_bearer_token(token);
        }
        let transport = Arc::new(transport);
        Self::start(
            config,
            storage,
            Arc::clone(&transport) as Arc<dyn Dispatcher>,
            transport,
            provider,
        )
        .await
    }
}
