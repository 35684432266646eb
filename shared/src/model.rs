use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

pub const LOCATION_PING_ROUTE: &str = "/api/v1/location/ping";
pub const ZONE_CHECK_ROUTE: &str = "/api/v1/location/check";
pub const PANIC_ALERT_ROUTE: &str = "/api/v1/alerts/panic";

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid coordinate: lat={0}, lon={1}")]
    InvalidCoordinate(f64, f64),
}

// --- Time ---

/// Unix timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnixTimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(PanicId);
typed_id!(MediaRef);

impl PanicId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Identifier assigned by the retry queue at enqueue time.
///
/// Strictly increasing within a queue, including across restarts, so it doubles
/// as a FIFO tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

// --- Coordinate: validated, NaN-safe ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(ValidationError::InvalidCoordinate(latitude, longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl TryFrom<(f64, f64)> for Coordinate {
    type Error = ValidationError;

    fn try_from((lat, lon): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(lat, lon)
    }
}

// --- Zone ---

/// Safety classification of a point.
///
/// Severity is ordered `Safe < Risky < Restricted`. `Unknown` means the
/// classification could not be obtained and is not comparable with the others,
/// so `partial_cmp` returns `None` whenever one side is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Safe,
    Risky,
    Restricted,
    #[default]
    Unknown,
}

impl Zone {
    #[must_use]
    pub const fn severity(self) -> Option<u8> {
        match self {
            Self::Safe => Some(0),
            Self::Risky => Some(1),
            Self::Restricted => Some(2),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Maps the lookup endpoint's `zoneType` field; anything unrecognised is `Unknown`.
    #[must_use]
    pub fn from_wire(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("safe") => Self::Safe,
            Some(v) if v.eq_ignore_ascii_case("risky") => Self::Risky,
            Some(v) if v.eq_ignore_ascii_case("restricted") => Self::Restricted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Risky => "risky",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        }
    }
}

impl PartialOrd for Zone {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.severity(), other.severity()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Location sample ---

/// A classified position fix. Serializes as the location ping body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(rename = "timestamp")]
    pub captured_at: UnixTimeMs,
    #[serde(rename = "zoneType")]
    pub zone: Zone,
}

impl LocationSample {
    #[must_use]
    pub fn new(coordinate: Coordinate, captured_at: UnixTimeMs, zone: Zone) -> Self {
        Self {
            coordinate,
            captured_at,
            zone,
        }
    }
}

// --- Panic event ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicStatus {
    Pending,
    Sent,
    Queued,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanicEvent {
    pub id: PanicId,
    pub location: LocationSample,
    pub audio_ref: Option<MediaRef>,
    pub video_ref: Option<MediaRef>,
    pub raised_at: UnixTimeMs,
    pub status: PanicStatus,
}

impl PanicEvent {
    #[must_use]
    pub fn new(
        location: LocationSample,
        audio_ref: Option<MediaRef>,
        video_ref: Option<MediaRef>,
        raised_at: UnixTimeMs,
    ) -> Self {
        Self {
            id: PanicId::generate(),
            location,
            audio_ref,
            video_ref,
            raised_at,
            status: PanicStatus::Pending,
        }
    }
}

// Media handles can point at private recordings; only log whether they exist.
impl fmt::Debug for PanicEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicEvent")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("audio_present", &self.audio_ref.is_some())
            .field("video_present", &self.video_ref.is_some())
            .field("raised_at", &self.raised_at)
            .field("status", &self.status)
            .finish()
    }
}

// --- Outbound requests ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    #[must_use]
    pub const fn has_request_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route plus method, relative to the configured API base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub route: String,
    pub method: HttpMethod,
}

impl Endpoint {
    pub fn new(method: HttpMethod, route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            method,
        }
    }

    #[must_use]
    pub fn location_ping() -> Self {
        Self::new(HttpMethod::Post, LOCATION_PING_ROUTE)
    }

    #[must_use]
    pub fn panic_alert() -> Self {
        Self::new(HttpMethod::Post, PANIC_ALERT_ROUTE)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}

/// A request that failed direct dispatch and waits in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: RequestId,
    pub target: Endpoint,
    /// Serialized JSON body, sent verbatim on replay.
    pub payload: String,
    pub enqueued_at: UnixTimeMs,
}
