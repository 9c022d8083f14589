//! Core types for gapless playback

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Remaining time (seconds) below which the next track's stream is warmed up
pub const DEFAULT_PRELOAD_THRESHOLD_SECS: f64 = 25.0;

/// Position (seconds) past which "previous" restarts the current track
pub const DEFAULT_RESTART_THRESHOLD_SECS: f64 = 8.0;

/// Stable identity of a track unit
///
/// Indices shift when tracks are removed; ids never do. Asynchronous load
/// completions are addressed by id so a late answer for a removed track is
/// simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque key/value bag passed through untouched
pub type Metadata = BTreeMap<String, String>;

/// Playlist entry used to create a track unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    /// Remote location of the audio
    pub url: String,

    /// Caller-defined metadata (title, artist, ...)
    #[serde(default)]
    pub metadata: Metadata,

    /// Never use the precise backend for this track
    #[serde(default)]
    pub disable_precise: bool,
}

impl TrackSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: Metadata::new(),
            disable_precise: false,
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for TrackSpec {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for TrackSpec {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// Which backend a track unit is currently driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendMode {
    /// Progressive streaming handle
    Streaming,

    /// Streaming while the fetch-then-decode pipeline runs
    LoadingPrecise,

    /// Sample-accurate buffer playback
    Precise,
}

/// Progress of the fetch-then-decode pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    /// Not requested yet, or reset after a failure
    None,

    /// Fetch or decode in flight
    Loading,

    /// Decoded buffer available
    Loaded,
}

/// Playback dimension of a track unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackPlayback {
    Paused,
    Playing,
}

/// Queue-level playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueState {
    /// Initial state, and after pause/goto without play
    Paused,

    /// Current track is playing
    Playing,

    /// Last track finished; next `play` restarts from index 0
    Ended,
}

/// Fully decoded track audio
///
/// Samples are interleaved f32 in [-1.0, 1.0].
#[derive(Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Silent buffer of the given length, mostly useful in tests
    pub fn silence(duration_secs: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = (duration_secs.max(0.0) * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; frames * channels.max(1) as usize], channels, sample_rate)
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

impl fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("frames", &self.frames())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Successful result of the fetch-then-decode pipeline
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub audio: DecodedAudio,

    /// Final URL after redirects, when it differs from the requested one
    pub resolved_url: Option<String>,
}

impl From<DecodedAudio> for LoadedTrack {
    fn from(audio: DecodedAudio) -> Self {
        Self {
            audio,
            resolved_url: None,
        }
    }
}

/// Configuration for the queue unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial volume (0.0 - 1.0, default: 1.0)
    pub volume: f32,

    /// Never use the precise backend (default: false)
    pub disable_precise: bool,

    /// Remaining seconds that trigger the next track's stream preload (default: 25)
    pub preload_threshold_secs: f64,

    /// Seconds into a track after which "previous" restarts it (default: 8)
    pub restart_threshold_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            disable_precise: false,
            preload_threshold_secs: DEFAULT_PRELOAD_THRESHOLD_SECS,
            restart_threshold_secs: DEFAULT_RESTART_THRESHOLD_SECS,
        }
    }
}
