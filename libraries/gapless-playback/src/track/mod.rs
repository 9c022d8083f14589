//! Track unit
//!
//! Owns one playlist entry and both of its backends. State is the product of
//! two independent dimensions:
//!
//! - backend: `Streaming` / `LoadingPrecise` / `Precise` (see [`machine`])
//! - playback: `Paused` / `Playing`
//!
//! Playback starts on the streaming handle immediately. Once the decoded
//! buffer arrives the track hands off to a buffer source at the exact
//! position the stream had reached.

pub mod machine;
pub mod timing;

use crate::backend::{
    stop_quietly, AudioBackend, AudioContext, BufferSource, Gain, LoadCompletion, LoadReply,
    StreamingHandle,
};
use crate::error::{BackendError, LoadError, PlaybackError, Result};
use crate::events::{ProgressSnapshot, TrackInfo};
use crate::types::{
    BackendMode, DecodedAudio, LoadState, LoadedTrack, Metadata, TrackId, TrackPlayback,
    TrackSpec,
};
use crossbeam_channel::Sender;
use machine::{transition, BackendEffect, BackendInput, Guards};
use std::sync::Arc;
use timing::PreciseClock;

/// Outcome of one progress poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackTick {
    /// Still playing; `remaining` is known once the duration is
    Progress { remaining: Option<f64> },

    /// The active backend reached the natural end
    Ended,
}

pub struct Track {
    id: TrackId,
    index: usize,
    url: String,
    metadata: Metadata,
    volume: f32,
    precise_disabled: bool,

    mode: BackendMode,
    playback: TrackPlayback,
    load_state: LoadState,
    active: bool,
    polling: bool,

    current_time: f64,
    duration: Option<f64>,
    decoded: Option<Arc<DecodedAudio>>,

    stream: Option<Box<dyn StreamingHandle>>,
    gain: Gain,
    source: Option<Box<dyn BufferSource>>,
    clock: Option<PreciseClock>,
    context: Option<Arc<dyn AudioContext>>,

    backend: Arc<dyn AudioBackend>,
    inbox: Sender<LoadCompletion>,
}

impl Track {
    pub(crate) fn new(
        id: TrackId,
        index: usize,
        spec: TrackSpec,
        volume: f32,
        disable_precise: bool,
        backend: Arc<dyn AudioBackend>,
        inbox: Sender<LoadCompletion>,
    ) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        Self {
            id,
            index,
            url: spec.url,
            metadata: spec.metadata,
            volume,
            precise_disabled: disable_precise || spec.disable_precise,
            mode: BackendMode::Streaming,
            playback: TrackPlayback::Paused,
            load_state: LoadState::None,
            active: false,
            polling: false,
            current_time: 0.0,
            duration: None,
            decoded: None,
            stream: None,
            gain: Gain::new(volume),
            source: None,
            clock: None,
            context: None,
            backend,
            inbox,
        }
    }

    // ===== Accessors =====

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Gain control read by the precise output
    pub fn gain(&self) -> &Gain {
        &self.gain
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn playback(&self) -> TrackPlayback {
        self.playback
    }

    pub fn is_playing(&self) -> bool {
        self.playback == TrackPlayback::Playing
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a progress loop is armed for this track
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn is_loaded(&self) -> bool {
        self.decoded.is_some()
    }

    pub fn is_precise_disabled(&self) -> bool {
        self.precise_disabled
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Ready to start without delay on either backend
    pub fn is_ready(&self) -> bool {
        self.decoded.is_some() || self.stream.as_ref().is_some_and(|s| s.is_ready())
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Introspection snapshot
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id,
            index: self.index,
            url: self.url.clone(),
            metadata: self.metadata.clone(),
            backend: self.mode,
            load_state: self.load_state,
            playback: self.playback,
            current_time: self.current_time,
            duration: self.duration,
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            index: self.index,
            current_time: self.current_time,
            duration: self.duration,
            is_playing: self.is_playing(),
            is_paused: !self.is_playing(),
            volume: self.volume,
            track_url: self.url.clone(),
            backend: self.mode,
            precise_state: self.load_state,
        }
    }

    // ===== Playback dimension =====

    /// Start or resume playback
    ///
    /// On a start error the track stays paused.
    pub fn play(&mut self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }

        if self.mode == BackendMode::Precise && self.decoded.is_some() {
            self.resume_precise().map_err(PlaybackError::StartRejected)?;
        } else {
            let stream = self.ensure_stream();
            stream.play().map_err(PlaybackError::StartRejected)?;
            if !self.precise_disabled {
                self.request_load();
            }
        }

        tracing::debug!(track = %self.id, index = self.index, backend = ?self.mode, "Track playing");
        self.playback = TrackPlayback::Playing;
        self.polling = true;
        Ok(())
    }

    pub fn pause(&mut self) {
        if !self.is_playing() {
            return;
        }

        if self.source.is_some() {
            if let Some(now) = self.context.as_ref().map(|c| c.now()) {
                if let Some(clock) = self.clock.as_mut() {
                    self.current_time = clamp_time(clock.elapsed(now), self.duration);
                    clock.pause(now);
                }
            }
            self.release_source();
        } else if let Some(stream) = self.stream.as_mut() {
            stream.pause();
            self.current_time = clamp_time(stream.position(), self.duration);
        }

        tracing::debug!(track = %self.id, position = self.current_time, "Track paused");
        self.playback = TrackPlayback::Paused;
        self.polling = false;
    }

    /// Jump to `secs`, clamped to `[0, duration]`
    pub fn seek(&mut self, secs: f64) -> Result<()> {
        let target = clamp_time(secs, self.duration);
        self.current_time = target;

        if self.mode == BackendMode::Precise && self.decoded.is_some() {
            self.release_source();
            if self.is_playing() {
                if let Err(e) = self.start_source(target) {
                    tracing::warn!(track = %self.id, "Restart after seek failed: {}", e);
                    self.playback = TrackPlayback::Paused;
                    self.polling = false;
                    return Err(PlaybackError::StartRejected(e));
                }
            } else if let Some(now) = self.context.as_ref().map(|c| c.now()) {
                self.clock = Some(PreciseClock::paused(now, target));
            }
        } else if let Some(stream) = self.stream.as_mut() {
            stream.set_position(target);
        }

        Ok(())
    }

    /// Set volume on both backends at once
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume = volume;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_volume(volume);
        }
        self.gain.set(volume);
    }

    // ===== Backend dimension =====

    /// Ask for the fetch-then-decode pipeline to start
    ///
    /// No-op when precise playback is disabled, already loaded or loading.
    pub fn request_load(&mut self) {
        self.step(BackendInput::RequestLoad, None);
    }

    /// Apply a pipeline outcome
    ///
    /// Returns true if the track just became loaded.
    pub fn on_load_finished(&mut self, outcome: std::result::Result<LoadedTrack, LoadError>) -> bool {
        match outcome {
            Ok(loaded) => self.step(BackendInput::LoadSucceeded, Some(loaded)),
            Err(e) => {
                if self.mode == BackendMode::LoadingPrecise {
                    tracing::warn!(
                        track = %self.id,
                        url = %self.url,
                        "Precise load failed, staying on streaming: {}",
                        e
                    );
                }
                self.step(BackendInput::LoadFailed, None)
            }
        }
    }

    /// Track became the current one in the queue
    pub fn activate(&mut self) {
        self.active = true;
        self.step(BackendInput::Activate, None);
    }

    /// Track is no longer current: stop it and release both backends
    ///
    /// The position survives in `current_time`; the stream is reopened
    /// there if the track plays again.
    pub fn deactivate(&mut self) {
        self.pause();
        self.active = false;
        self.step(BackendInput::Deactivate, None);
        self.release_stream();
    }

    /// Warm up the streaming handle only (no decode)
    pub fn preload_stream(&mut self) {
        let stream = self.ensure_stream();
        if !stream.is_ready() {
            stream.preload();
        }
    }

    // ===== Progress =====

    /// Recompute position and detect natural end
    ///
    /// Returns `None` when no progress loop is armed.
    pub fn poll(&mut self) -> Option<TrackTick> {
        if !self.polling {
            return None;
        }

        let ended = if let Some(source) = self.source.as_ref() {
            if let (Some(clock), Some(context)) = (self.clock.as_ref(), self.context.as_ref()) {
                self.current_time = clamp_time(clock.elapsed(context.now()), self.duration);
            }
            source.has_ended()
        } else if let Some(stream) = self.stream.as_ref() {
            if self.decoded.is_none() {
                if let Some(duration) = stream.duration().filter(|d| d.is_finite()) {
                    self.duration = Some(duration);
                }
            }
            self.current_time = clamp_time(stream.position(), self.duration);
            stream.has_ended()
        } else {
            false
        };

        if ended {
            self.finish();
            return Some(TrackTick::Ended);
        }

        Some(TrackTick::Progress {
            remaining: self.duration.map(|d| (d - self.current_time).max(0.0)),
        })
    }

    /// Release every live handle
    pub fn teardown(&mut self) {
        self.release_source();
        self.release_stream();
        self.decoded = None;
        self.context = None;
        self.playback = TrackPlayback::Paused;
        self.polling = false;
        self.active = false;
    }

    // ===== Internals =====

    fn guards(&self) -> Guards {
        Guards {
            has_buffer: self.decoded.is_some(),
            precise_disabled: self.precise_disabled,
            active: self.active,
        }
    }

    /// Feed one input through the transition function and run its effects
    fn step(&mut self, input: BackendInput, mut loaded: Option<LoadedTrack>) -> bool {
        let (mode, effects) = transition(self.mode, input, self.guards());
        if effects.is_empty() {
            if matches!(input, BackendInput::LoadSucceeded | BackendInput::LoadFailed) {
                tracing::debug!(track = %self.id, mode = ?self.mode, "Ignoring stale load completion");
            }
            return false;
        }

        self.mode = mode;
        let mut notify = false;
        for effect in effects {
            match effect {
                BackendEffect::StartLoad => self.start_load(),
                BackendEffect::StoreBuffer => {
                    if let Some(loaded) = loaded.take() {
                        self.store_buffer(loaded);
                    }
                }
                BackendEffect::Handoff => self.handoff(),
                BackendEffect::NotifyLoaded => notify = true,
                BackendEffect::ReleaseSource => {
                    self.release_source();
                    self.clock = None;
                    if let Some(stream) = self.stream.as_mut() {
                        stream.set_position(self.current_time);
                    }
                }
                BackendEffect::ResetLoadState => self.load_state = LoadState::None,
            }
        }
        notify
    }

    fn start_load(&mut self) {
        tracing::debug!(track = %self.id, url = %self.url, "Starting precise load");
        self.load_state = LoadState::Loading;
        self.backend
            .load(&self.url, LoadReply::new(self.id, self.inbox.clone()));
    }

    fn store_buffer(&mut self, loaded: LoadedTrack) {
        if self.decoded.is_some() {
            return;
        }

        if let Some(resolved) = loaded.resolved_url.filter(|u| *u != self.url) {
            tracing::debug!(track = %self.id, from = %self.url, to = %resolved, "Resolved redirect");
            self.url = resolved;
        }

        let audio = Arc::new(loaded.audio);
        self.duration = Some(audio.duration());
        self.current_time = clamp_time(self.current_time, self.duration);
        self.decoded = Some(audio);
        self.load_state = LoadState::Loaded;
        tracing::info!(track = %self.id, duration = ?self.duration, "Track decoded");
    }

    /// Switch from the stream to a buffer source at the stream's position
    fn handoff(&mut self) {
        if let Err(e) = self.shared_context() {
            tracing::warn!(track = %self.id, "Precise context unavailable, staying on streaming: {}", e);
            self.mode = BackendMode::Streaming;
            return;
        }

        let position = match self.stream.as_mut() {
            Some(stream) => {
                let position = stream.position();
                stream.pause();
                position
            }
            None => self.current_time,
        };
        self.current_time = clamp_time(position, self.duration);
        self.clock = None;

        if !self.is_playing() {
            tracing::debug!(track = %self.id, position = self.current_time, "Handoff while paused");
            self.release_stream();
            return;
        }

        match self.start_source(self.current_time) {
            Ok(()) => {
                tracing::debug!(track = %self.id, position = self.current_time, "Handed off to precise backend");
                self.release_stream();
            }
            Err(e) => {
                tracing::warn!(track = %self.id, "Handoff failed, resuming stream: {}", e);
                self.mode = BackendMode::Streaming;
                if let Some(stream) = self.stream.as_mut() {
                    if let Err(e) = stream.play() {
                        tracing::error!(track = %self.id, "Stream resume failed: {}", e);
                        self.playback = TrackPlayback::Paused;
                        self.polling = false;
                    }
                }
            }
        }
    }

    /// Resume precise playback at `current_time`
    fn resume_precise(&mut self) -> std::result::Result<(), BackendError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.pause();
        }

        let offset = self.current_time;
        let resumable = self.clock.filter(PreciseClock::is_paused);
        self.start_source(offset)?;

        // Keep the accumulated anchors when the frozen position still matches
        if let (Some(mut clock), Some(now)) = (resumable, self.context.as_ref().map(|c| c.now())) {
            if (clock.elapsed(now) - offset).abs() < 1e-6 {
                clock.resume(now);
                self.clock = Some(clock);
            }
        }
        Ok(())
    }

    /// Create and start a fresh buffer source at `offset`
    fn start_source(&mut self, offset: f64) -> std::result::Result<(), BackendError> {
        let context = self.shared_context()?;
        let buffer = self
            .decoded
            .clone()
            .ok_or_else(|| BackendError::InvalidState("no decoded buffer".into()))?;

        self.release_source();
        let mut source = context.create_buffer_source(buffer, self.gain.clone())?;
        let now = context.now();
        source.start(now, offset)?;

        self.clock = Some(PreciseClock::start(now, offset));
        self.source = Some(source);
        Ok(())
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            stop_quietly(source.as_mut());
        }
    }

    fn shared_context(&mut self) -> std::result::Result<Arc<dyn AudioContext>, BackendError> {
        if let Some(context) = self.context.as_ref() {
            return Ok(Arc::clone(context));
        }
        let context = self.backend.context()?;
        self.context = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Drop the streaming handle along with its download and decoder
    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.pause();
            tracing::trace!(track = %self.id, "Released stream");
        }
    }

    fn ensure_stream(&mut self) -> &mut Box<dyn StreamingHandle> {
        let volume = self.volume;
        let position = self.current_time;
        let backend = &self.backend;
        let url = &self.url;
        let stream = self.stream.get_or_insert_with(|| {
            let mut stream = backend.create_stream(url);
            if position > 0.0 {
                stream.set_position(position);
            }
            stream
        });
        stream.set_volume(volume);
        stream
    }

    /// Natural end of the active backend
    fn finish(&mut self) {
        tracing::debug!(track = %self.id, index = self.index, "Track ended");
        self.release_source();
        self.clock = None;
        if let Some(stream) = self.stream.as_mut() {
            stream.pause();
        }
        if let Some(duration) = self.duration {
            self.current_time = duration;
        }
        self.playback = TrackPlayback::Paused;
        self.polling = false;
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("url", &self.url)
            .field("mode", &self.mode)
            .field("playback", &self.playback)
            .field("load_state", &self.load_state)
            .field("current_time", &self.current_time)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

fn clamp_time(secs: f64, duration: Option<f64>) -> f64 {
    if !secs.is_finite() {
        return 0.0;
    }
    match duration {
        Some(d) if d.is_finite() => secs.clamp(0.0, d.max(0.0)),
        _ => secs.max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn track(backend: &MockBackend, url: &str) -> (Track, crossbeam_channel::Receiver<LoadCompletion>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let track = Track::new(
            TrackId(1),
            0,
            TrackSpec::new(url),
            1.0,
            false,
            backend.shared(),
            tx,
        );
        (track, rx)
    }

    fn deliver(track: &mut Track, rx: &crossbeam_channel::Receiver<LoadCompletion>) -> bool {
        let completion = rx.try_recv().unwrap();
        track.on_load_finished(completion.outcome)
    }

    #[test]
    fn clamp_time_bounds() {
        assert_eq!(clamp_time(-3.0, Some(10.0)), 0.0);
        assert_eq!(clamp_time(30.0, Some(10.0)), 10.0);
        assert_eq!(clamp_time(30.0, None), 30.0);
        assert_eq!(clamp_time(f64::NAN, Some(10.0)), 0.0);
        assert_eq!(clamp_time(f64::INFINITY, Some(10.0)), 0.0);
        assert_eq!(clamp_time(f64::NEG_INFINITY, None), 0.0);
        assert_eq!(clamp_time(f64::INFINITY, None), 0.0);
    }

    #[test]
    fn seek_to_infinity_restarts() {
        let backend = MockBackend::new();
        let (mut track, _rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.clock().advance(4.0);

        track.seek(f64::INFINITY).unwrap();
        assert_eq!(track.current_time(), 0.0);
        assert_eq!(backend.stream_position("a"), Some(0.0));

        track.poll();
        assert!(track.current_time().is_finite());
    }

    #[test]
    fn play_starts_stream_and_load() {
        let backend = MockBackend::new();
        let (mut track, _rx) = track(&backend, "a");

        track.activate();
        track.play().unwrap();

        assert!(track.is_playing());
        assert!(track.is_polling());
        assert_eq!(track.mode(), BackendMode::LoadingPrecise);
        assert_eq!(track.load_state(), LoadState::Loading);
        assert!(backend.stream_playing("a"));
        assert_eq!(backend.pending_loads(), vec!["a".to_string()]);
    }

    #[test]
    fn disabled_track_never_loads() {
        let backend = MockBackend::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut track = Track::new(
            TrackId(1),
            0,
            TrackSpec::new("a"),
            1.0,
            true,
            backend.shared(),
            tx,
        );

        track.activate();
        track.play().unwrap();
        track.request_load();

        assert_eq!(track.mode(), BackendMode::Streaming);
        assert_eq!(track.load_state(), LoadState::None);
        assert!(backend.pending_loads().is_empty());
    }

    #[test]
    fn load_success_hands_off_at_stream_position() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();

        backend.clock().advance(3.0);
        track.poll();
        let before = track.current_time();

        backend.complete_load("a", 120.0);
        assert!(deliver(&mut track, &rx));

        assert_eq!(track.mode(), BackendMode::Precise);
        assert_eq!(track.load_state(), LoadState::Loaded);
        assert!(!backend.stream_playing("a"));
        assert_eq!(backend.active_sources(), 1);

        track.poll();
        assert!((track.current_time() - before).abs() < 1e-9);
    }

    #[test]
    fn load_failure_returns_to_streaming() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();

        backend.fail_load("a");
        assert!(!deliver(&mut track, &rx));

        assert_eq!(track.mode(), BackendMode::Streaming);
        assert_eq!(track.load_state(), LoadState::None);
        assert!(track.is_playing());
        assert!(backend.stream_playing("a"));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.complete_load("a", 60.0);
        assert!(deliver(&mut track, &rx));

        let duplicate = DecodedAudio::silence(5.0, 2, 8_000);
        assert!(!track.on_load_finished(Ok(duplicate.into())));
        assert_eq!(track.duration(), Some(60.0));
    }

    #[test]
    fn redirect_replaces_url() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.request_load();
        backend.complete_load_redirected("a", 10.0, "https://cdn/a");
        deliver(&mut track, &rx);
        assert_eq!(track.url(), "https://cdn/a");
    }

    #[test]
    fn start_rejection_keeps_track_paused() {
        let backend = MockBackend::new();
        backend.refuse_stream_play(true);
        let (mut track, _rx) = track(&backend, "a");

        let err = track.play().unwrap_err();
        assert!(matches!(err, PlaybackError::StartRejected(_)));
        assert!(!track.is_playing());
        assert!(!track.is_polling());
    }

    #[test]
    fn precise_seek_replaces_source() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.complete_load("a", 100.0);
        deliver(&mut track, &rx);

        track.seek(40.0).unwrap();
        assert_eq!(backend.active_sources(), 1);
        assert_eq!(backend.sources_created(), 2);
        track.poll();
        assert!((track.current_time() - 40.0).abs() < 1e-9);

        track.seek(500.0).unwrap();
        assert_eq!(track.current_time(), 100.0);
    }

    #[test]
    fn deactivate_releases_precise_source() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.complete_load("a", 100.0);
        deliver(&mut track, &rx);

        track.deactivate();
        assert_eq!(track.mode(), BackendMode::Streaming);
        assert!(!track.is_playing());
        assert_eq!(backend.active_sources(), 0);
        assert!(track.is_loaded());
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn deactivate_drops_stream_and_reopens_at_position() {
        let backend = MockBackend::new();
        let (mut track, _rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.clock().advance(5.0);
        track.poll();

        track.deactivate();
        assert_eq!(backend.live_streams(), 0);
        assert!((track.current_time() - 5.0).abs() < 1e-9);

        track.activate();
        track.play().unwrap();
        assert_eq!(backend.streams_created("a"), 2);
        assert_eq!(backend.live_streams(), 1);
        assert_eq!(backend.stream_position("a"), Some(5.0));
    }

    #[test]
    fn handoff_drops_stream() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        assert_eq!(backend.live_streams(), 1);

        backend.complete_load("a", 60.0);
        assert!(deliver(&mut track, &rx));
        assert_eq!(track.mode(), BackendMode::Precise);
        assert_eq!(backend.live_streams(), 0);
        assert_eq!(backend.active_sources(), 1);
    }

    #[test]
    fn natural_end_pauses_track() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.complete_load("a", 10.0);
        deliver(&mut track, &rx);

        backend.clock().advance(11.0);
        assert_eq!(track.poll(), Some(TrackTick::Ended));
        assert!(!track.is_playing());
        assert_eq!(track.current_time(), 10.0);
        assert_eq!(track.poll(), None);
    }

    #[test]
    fn teardown_releases_everything() {
        let backend = MockBackend::new();
        let (mut track, rx) = track(&backend, "a");
        track.activate();
        track.play().unwrap();
        backend.complete_load("a", 10.0);
        deliver(&mut track, &rx);

        track.teardown();
        assert!(!track.is_loaded());
        assert_eq!(backend.active_sources(), 0);
        assert!(!backend.stream_playing("a"));
    }
}
