//! Error types for gapless playback

use crate::types::TrackId;
use thiserror::Error;

/// Queue and track command errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Queue has no tracks
    #[error("Queue is empty")]
    QueueEmpty,

    /// Index out of bounds
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    /// No track with this identity is in the queue
    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    /// The active backend refused to start (e.g. autoplay policy, no device)
    #[error("Playback could not start: {0}")]
    StartRejected(#[source] BackendError),

    /// The precise context could not be created or used
    #[error("Backend unavailable: {0}")]
    Backend(#[from] BackendError),
}

/// Errors reported by backend handles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Redundant start/stop on a handle that is no longer in a valid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The backend refused to start playback
    #[error("Start refused: {0}")]
    StartRefused(String),

    /// Output device or context is not available
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether this is a harmless double-stop/disconnect style error
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, BackendError::InvalidState(_))
    }
}

/// Errors from the asynchronous fetch-then-decode pipeline
///
/// These never abort playback: the track stays on the streaming backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Network failure while fetching the track
    #[error("Fetch failed: {0}")]
    Network(String),

    /// Server answered with a non-2xx status
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// Payload could not be decoded as audio
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Pipeline was dropped before it could answer
    #[error("Load cancelled")]
    Cancelled,
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
