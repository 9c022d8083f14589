//! Gapless - Queue Playback Core
//!
//! Platform-agnostic gapless playback of remote tracks.
//!
//! This crate provides:
//! - Track unit: per-track switching between a streaming backend and a
//!   sample-accurate buffer backend, with position-preserving handoff
//! - Queue unit: play/pause/next/previous/goto/seek/volume, auto-advance and
//!   end-of-queue handling
//! - Preloading cascade: the track after the current one is fetched and
//!   decoded as soon as the current one is ready
//! - Event draining for UI synchronisation
//!
//! # Architecture
//!
//! `gapless-playback` owns no device and no network connection. Audio output,
//! streaming and fetch-then-decode are provided by a platform crate through
//! the traits in [`backend`]. Background loads report back through a channel
//! that the queue drains on [`GaplessQueue::tick`], so every state change
//! happens on the caller's thread, one event at a time.
//!
//! # Example
//!
//! ```rust
//! use gapless_playback::testing::MockBackend;
//! use gapless_playback::{GaplessQueue, PlaybackConfig, PlayerEvent, QueueState, TrackSpec};
//!
//! let backend = MockBackend::new();
//! let mut queue = GaplessQueue::new(
//!     PlaybackConfig::default(),
//!     backend.shared(),
//!     vec![
//!         TrackSpec::new("https://example.com/one.mp3").with_metadata("title", "One"),
//!         TrackSpec::new("https://example.com/two.mp3"),
//!     ],
//! );
//!
//! queue.play().unwrap();
//! assert_eq!(queue.state(), QueueState::Playing);
//!
//! // Drive the queue from a timer or the render loop
//! backend.clock().advance(0.5);
//! queue.tick();
//!
//! for event in queue.drain_events() {
//!     if let PlayerEvent::Progress(progress) = event {
//!         println!("{} / {:?}", progress.current_time, progress.duration);
//!     }
//! }
//! ```

pub mod backend;
pub mod error;
pub mod events;
pub mod queue;
pub mod testing;
pub mod track;
pub mod types;

pub use backend::{
    stop_quietly, AudioBackend, AudioContext, BufferSource, Gain, LoadCompletion, LoadReply,
    SharedContext, StreamingHandle,
};
pub use error::{BackendError, LoadError, PlaybackError, Result};
pub use events::{PlayerEvent, ProgressSnapshot, TrackInfo};
pub use queue::GaplessQueue;
pub use track::{Track, TrackTick};
pub use types::{
    BackendMode, DecodedAudio, LoadState, LoadedTrack, Metadata, PlaybackConfig, QueueState,
    TrackId, TrackPlayback, TrackSpec, DEFAULT_PRELOAD_THRESHOLD_SECS,
    DEFAULT_RESTART_THRESHOLD_SECS,
};
