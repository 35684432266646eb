use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("position unavailable: {reason}")]
pub struct PositionError {
    pub reason: String,
}

impl PositionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Platform positioning. Permission prompts are user-gated, so callers never
/// retry `request_permission` on their own.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    /// Raw `(latitude, longitude)` fix; validation happens in the pipeline.
    async fn current_position(&self) -> Result<(f64, f64), PositionError>;
}
