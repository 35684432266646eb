use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::{Coordinate, Endpoint, Zone};

pub const MAX_URL_LENGTH: usize = 2048;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error {status}")]
    HttpStatus { status: u16 },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl TransportError {
    /// Cause classification for diagnostics. The retry queue does not consult
    /// this; every failure halts a drain.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection { .. } | TransportError::Timeout { .. } => true,
            TransportError::HttpStatus { status } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            TransportError::InvalidUrl { .. } | TransportError::InvalidResponse { .. } => false,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, TransportError::HttpStatus { status } if (400..500).contains(status))
    }
}

/// Sends one serialized request body to an endpoint.
///
/// Implementations must be safe to call repeatedly with the same payload;
/// deduplication is the server's job.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, target: &Endpoint, payload: &str) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ZoneLookup: Send + Sync {
    async fn lookup_zone(&self, coordinate: Coordinate) -> Result<Zone, TransportError>;
}

/// API base URL: http(s), with a host, no embedded credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        let parsed = Self::validate(&url)?;
        Ok(Self {
            url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Appends an absolute route such as `/api/v1/location/ping`.
    pub fn join(&self, route: &str) -> Result<Url, TransportError> {
        let full = format!("{}/{}", self.url, route.trim_start_matches('/'));
        Url::parse(&full).map_err(|e| TransportError::InvalidUrl {
            url: Self::truncate_url(&full),
            reason: e.to_string(),
        })
    }

    fn validate(url: &str) -> Result<Url, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: Self::truncate_url(url),
            reason,
        };

        if url.trim().is_empty() {
            return Err(invalid("URL cannot be empty".to_string()));
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(invalid(format!(
                "URL exceeds maximum length of {MAX_URL_LENGTH} bytes"
            )));
        }

        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;

        let scheme = parsed.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(invalid(format!(
                "invalid scheme '{scheme}', only 'http' and 'https' are allowed"
            )));
        }
        if parsed.host_str().is_none() {
            return Err(invalid("URL must have a host".to_string()));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("credentials in URL are not allowed".to_string()));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid("base URL cannot carry a query or fragment".to_string()));
        }

        Ok(parsed)
    }

    fn truncate_url(url: &str) -> String {
        if url.len() > 100 {
            format!("{}...", url.chars().take(100).collect::<String>())
        } else {
            url.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneCheckResponse {
    #[serde(rename = "zoneType")]
    zone_type: Option<String>,
}

#[cfg(feature = "http")]
pub use self::transport::HttpTransport;

#[cfg(feature = "http")]
mod transport {
    use super::{Dispatcher, TransportError, ValidatedUrl, ZoneCheckResponse, ZoneLookup};
    use crate::model::{Coordinate, Endpoint, HttpMethod, Zone, ZONE_CHECK_ROUTE};
    use async_trait::async_trait;
    use reqwest::header::{ACCEPT, CONTENT_TYPE};
    use secrecy::{ExposeSecret, SecretString};
    use std::time::Duration;
    use tracing::{debug, instrument};

    /// JSON-over-HTTP transport for both event dispatch and zone lookups.
    pub struct HttpTransport {
        client: reqwest::Client,
        base: ValidatedUrl,
        bearer_token: Option<SecretString>,
        timeout_ms: u64,
    }

    impl HttpTransport {
        pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
            let base = ValidatedUrl::new(base_url)?;
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::Connection {
                    message: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self {
                client,
                base,
                bearer_token: None,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }

        #[must_use]
        pub fn with_bearer_token(mut self, token: SecretString) -> Self {
            self.bearer_token = Some(token);
            self
        }

        pub fn base_url(&self) -> &ValidatedUrl {
            &self.base
        }

        fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            match &self.bearer_token {
                Some(token) => request.bearer_auth(token.expose_secret()),
                None => request,
            }
        }

        fn map_error(&self, e: &reqwest::Error) -> TransportError {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else if let Some(status) = e.status() {
                TransportError::HttpStatus {
                    status: status.as_u16(),
                }
            } else {
                TransportError::Connection {
                    message: e.to_string(),
                }
            }
        }
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    #[async_trait]
    impl Dispatcher for HttpTransport {
        #[instrument(skip(self, target, payload), fields(target = %target))]
        async fn send(&self, target: &Endpoint, payload: &str) -> Result<(), TransportError> {
            let url = self.base.join(&target.route)?;
            let mut request = self
                .client
                .request(method(target.method), url)
                .header(ACCEPT, "application/json");
            if target.method.has_request_body() {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(payload.to_owned());
            }

            let response = self
                .authorize(request)
                .send()
                .await
                .map_err(|e| self.map_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            debug!(status = status.as_u16(), "request delivered");
            Ok(())
        }
    }

    #[async_trait]
    impl ZoneLookup for HttpTransport {
        #[instrument(skip(self))]
        async fn lookup_zone(&self, coordinate: Coordinate) -> Result<Zone, TransportError> {
            let url = self.base.join(ZONE_CHECK_ROUTE)?;
            let request = self.client.get(url).query(&[
                ("latitude", coordinate.latitude()),
                ("longitude", coordinate.longitude()),
            ]);

            let response = self
                .authorize(request)
                .send()
                .await
                .map_err(|e| self.map_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                });
            }

            let body: ZoneCheckResponse =
                response
                    .json()
                    .await
                    .map_err(|e| TransportError::InvalidResponse {
                        reason: e.to_string(),
                    })?;
            Ok(Zone::from_wire(body.zone_type.as_deref()))
        }
    }
}
