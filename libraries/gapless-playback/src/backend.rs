//! Backend abstraction
//!
//! The core never touches an audio device or the network. A platform crate
//! implements these traits and hands an [`AudioBackend`] to the queue:
//!
//! - [`StreamingHandle`]: progressive playback that starts before the
//!   download completes, with coarse timing
//! - [`AudioContext`] + [`BufferSource`]: sample-accurate playback of a fully
//!   decoded buffer, driven by a context clock
//! - [`AudioBackend::load`]: asynchronous fetch-then-decode whose completion
//!   comes back through a [`LoadReply`]

use crate::error::{BackendError, LoadError};
use crate::types::{DecodedAudio, LoadedTrack, TrackId};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Progressive streaming handle for one track
pub trait StreamingHandle: Send {
    /// Start or resume playback
    fn play(&mut self) -> Result<(), BackendError>;

    /// Pause playback, keeping the position
    fn pause(&mut self);

    /// Current position in seconds
    fn position(&self) -> f64;

    /// Jump to a position in seconds
    fn set_position(&mut self, secs: f64);

    /// Total length, once known
    fn duration(&self) -> Option<f64>;

    /// Output volume (0.0 - 1.0)
    fn set_volume(&mut self, volume: f32);

    /// Warm up the handle so a later `play` starts without delay
    ///
    /// Must stay lightweight: no full download or decode.
    fn preload(&mut self);

    /// Enough data is buffered to start playing
    fn is_ready(&self) -> bool;

    /// Natural end of the media was reached
    fn has_ended(&self) -> bool;
}

/// One-shot, sample-accurate player of a decoded buffer
///
/// A source is started at most once. After `stop` it must be discarded and a
/// fresh one created for the next start or seek.
pub trait BufferSource: Send {
    /// Start at context time `when`, `offset` seconds into the buffer
    fn start(&mut self, when: f64, offset: f64) -> Result<(), BackendError>;

    /// Stop playback
    ///
    /// Stopping twice, or stopping a source that was never started,
    /// returns [`BackendError::InvalidState`].
    fn stop(&mut self) -> Result<(), BackendError>;

    /// The buffer played through to its end (never true after `stop`)
    fn has_ended(&self) -> bool;
}

/// Precise playback context (clock + output destination)
pub trait AudioContext: Send + Sync {
    /// Context clock in seconds
    fn now(&self) -> f64;

    /// Create a source reading `buffer` through the given gain control
    fn create_buffer_source(
        &self,
        buffer: Arc<DecodedAudio>,
        gain: Gain,
    ) -> Result<Box<dyn BufferSource>, BackendError>;
}

/// Platform entry point handed to the queue
pub trait AudioBackend: Send + Sync {
    /// Create a (not yet loading) streaming handle for `url`
    fn create_stream(&self, url: &str) -> Box<dyn StreamingHandle>;

    /// The process-wide precise context, created on first call
    fn context(&self) -> Result<Arc<dyn AudioContext>, BackendError>;

    /// Start fetching and decoding `url` in the background
    ///
    /// Must return immediately. The outcome is delivered through `reply`.
    fn load(&self, url: &str, reply: LoadReply);
}

/// Gain control shared between a track unit and the output mixer
#[derive(Debug, Clone)]
pub struct Gain(Arc<AtomicU32>);

impl Gain {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Lazily initialised, process-wide audio context
///
/// Meant to live in a `static`. The first successful `get_or_init` stores
/// the context; every later call returns the same instance. A failed
/// initialisation stores nothing, so the next call tries again.
///
/// Platform crates can keep the concrete type (`SharedContext<MyOutput>`) and
/// coerce to `Arc<dyn AudioContext>` at the trait boundary.
pub struct SharedContext<T: ?Sized = dyn AudioContext> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> SharedContext<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> Result<Arc<T>, BackendError>
    where
        F: FnOnce() -> Result<Arc<T>, BackendError>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }

        let context = init()?;
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// The context, if it has been created
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// Whether the context has been created
    pub fn is_initialized(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T: ?Sized> Default for SharedContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a background load, addressed to one track
#[derive(Debug)]
pub struct LoadCompletion {
    pub track: TrackId,
    pub outcome: Result<LoadedTrack, LoadError>,
}

/// Reply slot for one [`AudioBackend::load`] call
///
/// Dropping an unanswered reply reports [`LoadError::Cancelled`], so a
/// pipeline that dies halfway never leaves the track stuck in `Loading`.
#[derive(Debug)]
pub struct LoadReply {
    track: TrackId,
    tx: Option<Sender<LoadCompletion>>,
}

impl LoadReply {
    pub fn new(track: TrackId, tx: Sender<LoadCompletion>) -> Self {
        Self {
            track,
            tx: Some(tx),
        }
    }

    /// Track this reply belongs to
    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Deliver the outcome
    pub fn send(mut self, outcome: Result<LoadedTrack, LoadError>) {
        self.deliver(outcome);
    }

    fn deliver(&mut self, outcome: Result<LoadedTrack, LoadError>) {
        if let Some(tx) = self.tx.take() {
            // Queue already dropped: nobody is waiting for this track anymore
            let _ = tx.send(LoadCompletion {
                track: self.track,
                outcome,
            });
        }
    }
}

impl Drop for LoadReply {
    fn drop(&mut self) {
        self.deliver(Err(LoadError::Cancelled));
    }
}

/// Stop a buffer source, swallowing redundant-stop errors
pub fn stop_quietly(source: &mut dyn BufferSource) {
    match source.stop() {
        Ok(()) => {}
        Err(e) if e.is_invalid_state() => {
            tracing::trace!("Ignoring redundant stop: {}", e);
        }
        Err(e) => {
            tracing::warn!("Failed to stop buffer source: {}", e);
        }
    }
}
