/// Desktop backend errors
use gapless_playback::{BackendError, LoadError, PlaybackError};
use thiserror::Error;

/// Result type for desktop operations
pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio errors
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device not found
    #[error("Audio device not found")]
    DeviceNotFound,

    /// Device error
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Failed to build output stream
    #[error("Failed to build output stream: {0}")]
    StreamBuildError(String),

    /// Failed to play stream
    #[error("Failed to play stream: {0}")]
    PlayError(String),

    /// Unsupported audio format
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Decoding failed
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Sample rate conversion error
    #[error("Sample rate conversion error: {0}")]
    ResampleError(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Queue command failed
    #[error("Playback error: {0}")]
    PlaybackError(#[from] PlaybackError),

    /// Worker thread could not be started or is gone
    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::StreamBuildError(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::PlayError(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::DeviceError(err.to_string())
    }
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;
        match err {
            SymphoniaError::Unsupported(what) => AudioError::UnsupportedFormat(what.to_string()),
            other => AudioError::DecodeError(other.to_string()),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        AudioError::ResampleError(err.to_string())
    }
}

impl From<rubato::ResampleError> for AudioError {
    fn from(err: rubato::ResampleError) -> Self {
        AudioError::ResampleError(err.to_string())
    }
}

impl From<reqwest::Error> for AudioError {
    fn from(err: reqwest::Error) -> Self {
        AudioError::HttpError(err.to_string())
    }
}

impl From<config::ConfigError> for AudioError {
    fn from(err: config::ConfigError) -> Self {
        AudioError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::ThreadError(err.to_string())
    }
}

impl From<AudioError> for BackendError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound
            | AudioError::DeviceError(_)
            | AudioError::StreamBuildError(_) => BackendError::Unavailable(err.to_string()),
            AudioError::PlayError(_) => BackendError::StartRefused(err.to_string()),
            other => BackendError::Other(other.to_string()),
        }
    }
}

impl From<AudioError> for LoadError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::HttpError(message) => LoadError::Network(message),
            other => LoadError::Decode(other.to_string()),
        }
    }
}
