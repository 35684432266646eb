use thiserror::Error;

use crate::capabilities::{KvError, TransportError};
use crate::config::ConfigError;
use crate::model::ValidationError;
use crate::panic_alert::PanicState;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] KvError),

    #[error("a current location is required to dispatch a panic alert")]
    LocationRequired,

    #[error("a panic sequence is already in progress ({state})")]
    PanicInProgress { state: PanicState },

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: PanicState,
        action: &'static str,
    },

    #[error("the panic alert is already dispatching and can no longer be cancelled")]
    NotCancellable,

    #[error("panic alert delivery task failed: {0}")]
    DispatchAborted(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SafetyError {
    /// Whether waiting and trying again can succeed without user action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::PositionUnavailable(_) | Self::Persistence(_) => true,
            Self::PermissionDenied
            | Self::LocationRequired
            | Self::PanicInProgress { .. }
            | Self::InvalidTransition { .. }
            | Self::NotCancellable
            | Self::DispatchAborted(_)
            | Self::Serialization(_)
            | Self::Validation(_)
            | Self::Config(_) => false,
        }
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Transport(_) => {
                "Unable to reach the safety service. Your data will be sent when you are back online."
                    .into()
            }
            Self::PermissionDenied => {
                "Location access is required for safety monitoring. Please enable it in Settings."
                    .into()
            }
            Self::PositionUnavailable(_) => {
                "Your location is temporarily unavailable. We will try again shortly.".into()
            }
            Self::LocationRequired => {
                "Location not available. Move to an open area and try the SOS button again."
                    .into()
            }
            Self::PanicInProgress { .. } => "An emergency alert is already in progress.".into(),
            Self::NotCancellable => "The emergency alert is already being sent.".into(),
            Self::DispatchAborted(_) => {
                "The emergency alert could not be sent. Please call emergency services directly."
                    .into()
            }
            Self::Persistence(_)
            | Self::InvalidTransition { .. }
            | Self::Serialization(_)
            | Self::Validation(_)
            | Self::Config(_) => "Something went wrong. Please try again.".into(),
        }
    }
}

pub type SafetyResult<T> = Result<T, SafetyError>;
