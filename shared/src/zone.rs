use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::capabilities::ZoneLookup;
use crate::config::CoreConfig;
use crate::model::{Coordinate, Zone};

type Cell = (i64, i64);

struct ZoneCache {
    entries: Mutex<LruCache<Cell, (Zone, Instant)>>,
    ttl: Duration,
    precision_deg: f64,
}

impl ZoneCache {
    #[allow(clippy::cast_possible_truncation)]
    fn cell(&self, coordinate: Coordinate) -> Cell {
        (
            (coordinate.latitude() / self.precision_deg).round() as i64,
            (coordinate.longitude() / self.precision_deg).round() as i64,
        )
    }

    fn get(&self, cell: Cell) -> Option<Zone> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&cell) {
            Some(&(zone, stored_at)) if stored_at.elapsed() < self.ttl => Some(zone),
            Some(_) => {
                entries.pop(&cell);
                None
            }
            None => None,
        }
    }

    fn put(&self, cell: Cell, zone: Zone) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.put(cell, (zone, Instant::now()));
    }
}

/// Maps a coordinate to a [`Zone`] through the remote lookup.
///
/// Never fails: any lookup error degrades to [`Zone::Unknown`]. With a cache
/// configured, successful answers are reused for nearby points until they
/// expire; failures are never cached.
pub struct ZoneClassifier {
    lookup: Arc<dyn ZoneLookup>,
    cache: Option<ZoneCache>,
}

impl ZoneClassifier {
    pub fn new(lookup: Arc<dyn ZoneLookup>) -> Self {
        Self {
            lookup,
            cache: None,
        }
    }

    pub fn with_cache(
        lookup: Arc<dyn ZoneLookup>,
        capacity: NonZeroUsize,
        ttl: Duration,
        precision_deg: f64,
    ) -> Self {
        Self {
            lookup,
            cache: Some(ZoneCache {
                entries: Mutex::new(LruCache::new(capacity)),
                ttl,
                precision_deg,
            }),
        }
    }

    pub fn from_config(lookup: Arc<dyn ZoneLookup>, config: &CoreConfig) -> Self {
        match NonZeroUsize::new(config.zone_cache_capacity) {
            Some(capacity) => Self::with_cache(
                lookup,
                capacity,
                config.zone_cache_ttl(),
                config.zone_cache_precision_deg,
            ),
            None => Self::new(lookup),
        }
    }

    #[instrument(skip(self), fields(lat = coordinate.latitude(), lon = coordinate.longitude()))]
    pub async fn classify(&self, coordinate: Coordinate) -> Zone {
        let cell = self.cache.as_ref().map(|cache| cache.cell(coordinate));
        if let (Some(cache), Some(cell)) = (&self.cache, cell) {
            if let Some(zone) = cache.get(cell) {
                debug!(%zone, "zone cache hit");
                return zone;
            }
        }

        match self.lookup.lookup_zone(coordinate).await {
            Ok(zone) => {
                if let (Some(cache), Some(cell)) = (&self.cache, cell) {
                    cache.put(cell, zone);
                }
                zone
            }
            Err(e) => {
                warn!(error = %e, "zone lookup failed, classifying as unknown");
                Zone::Unknown
            }
        }
    }
}
