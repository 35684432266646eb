mod http;
mod kv;
mod location;

pub use self::http::{Dispatcher, TransportError, ValidatedUrl, ZoneLookup, DEFAULT_TIMEOUT_MS};
pub use self::kv::{KeyNamespace, KvError, KvKey, KvStore, MemoryKvStore};
pub use self::location::{LocationProvider, PermissionStatus, PositionError};

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKvStore;

#[cfg(feature = "http")]
pub use self::http::HttpTransport;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::location::CurrentLocation;
    use crate::model::{Coordinate, Endpoint, LocationSample, Zone};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct DispatchLog {
        attempts: Vec<(Endpoint, String)>,
        delivered: Vec<(Endpoint, String)>,
    }

    /// Records every send. Offline sends fail; `allow(n)` lets exactly `n`
    /// more sends succeed before failing again.
    pub struct RecordingDispatcher {
        log: Mutex<DispatchLog>,
        online: AtomicBool,
        budget: Mutex<Option<usize>>,
    }

    impl RecordingDispatcher {
        pub fn online() -> Self {
            Self {
                log: Mutex::default(),
                online: AtomicBool::new(true),
                budget: Mutex::new(None),
            }
        }

        pub fn offline() -> Self {
            let dispatcher = Self::online();
            dispatcher.set_online(false);
            dispatcher
        }

        pub fn set_online(&self, online: bool) {
            *self.budget.lock().unwrap() = None;
            self.online.store(online, Ordering::SeqCst);
        }

        pub fn allow(&self, successes: usize) {
            *self.budget.lock().unwrap() = Some(successes);
            self.online.store(true, Ordering::SeqCst);
        }

        pub fn attempts(&self) -> Vec<String> {
            let log = self.log.lock().unwrap();
            log.attempts.iter().map(|(_, p)| p.clone()).collect()
        }

        pub fn delivered(&self) -> Vec<String> {
            let log = self.log.lock().unwrap();
            log.delivered.iter().map(|(_, p)| p.clone()).collect()
        }

        pub fn delivered_routes(&self) -> Vec<String> {
            let log = self.log.lock().unwrap();
            log.delivered.iter().map(|(e, _)| e.route.clone()).collect()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn send(&self, target: &Endpoint, payload: &str) -> Result<(), TransportError> {
            let mut log = self.log.lock().unwrap();
            log.attempts.push((target.clone(), payload.to_string()));

            let ok = self.online.load(Ordering::SeqCst) && {
                let mut budget = self.budget.lock().unwrap();
                match budget.as_mut() {
                    None => true,
                    Some(0) => false,
                    Some(n) => {
                        *n -= 1;
                        true
                    }
                }
            };

            if ok {
                log.delivered.push((target.clone(), payload.to_string()));
                Ok(())
            } else {
                Err(TransportError::Connection {
                    message: "network unreachable".into(),
                })
            }
        }
    }

    /// Failure-injectable storage wrapper.
    #[derive(Default)]
    pub struct FailableKvStore {
        pub inner: MemoryKvStore,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
    }

    impl FailableKvStore {
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KvStore for FailableKvStore {
        async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(KvError::storage("injected read failure"));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(KvError::storage("injected write failure"));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &KvKey) -> Result<(), KvError> {
            self.inner.delete(key).await
        }
    }

    /// Answers every lookup with one zone, or fails when set to `None`.
    pub struct StaticZoneLookup {
        zone: Mutex<Option<Zone>>,
        calls: AtomicUsize,
    }

    impl StaticZoneLookup {
        pub fn answering(zone: Zone) -> Self {
            Self {
                zone: Mutex::new(Some(zone)),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                zone: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_zone(&self, zone: Option<Zone>) {
            *self.zone.lock().unwrap() = zone;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ZoneLookup for StaticZoneLookup {
        async fn lookup_zone(&self, _coordinate: Coordinate) -> Result<Zone, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let zone = *self.zone.lock().unwrap();
            zone.ok_or(TransportError::Timeout { timeout_ms: 10_000 })
        }
    }

    /// Scripted positions; once the script runs out, `fallback` is returned.
    pub struct FakeLocationProvider {
        permission: PermissionStatus,
        script: Mutex<VecDeque<Result<(f64, f64), PositionError>>>,
        fallback: (f64, f64),
    }

    impl FakeLocationProvider {
        pub fn granted(fallback: (f64, f64)) -> Self {
            Self {
                permission: PermissionStatus::Granted,
                script: Mutex::default(),
                fallback,
            }
        }

        pub fn denied() -> Self {
            Self {
                permission: PermissionStatus::Denied,
                script: Mutex::default(),
                fallback: (0.0, 0.0),
            }
        }

        pub fn push(&self, next: Result<(f64, f64), PositionError>) {
            self.script.lock().unwrap().push_back(next);
        }
    }

    #[async_trait]
    impl LocationProvider for FakeLocationProvider {
        async fn request_permission(&self) -> PermissionStatus {
            self.permission
        }

        async fn current_position(&self) -> Result<(f64, f64), PositionError> {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(self.fallback))
        }
    }

    /// Settable current location for the panic state machine.
    #[derive(Default)]
    pub struct FixedLocation(Mutex<Option<LocationSample>>);

    impl FixedLocation {
        pub fn at(sample: LocationSample) -> Self {
            Self(Mutex::new(Some(sample)))
        }

        pub fn clear(&self) {
            *self.0.lock().unwrap() = None;
        }
    }

    impl CurrentLocation for FixedLocation {
        fn current_location(&self) -> Option<LocationSample> {
            *self.0.lock().unwrap()
        }
    }
}
