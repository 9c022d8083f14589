//! In-memory backend for tests
//!
//! [`MockBackend`] implements every backend trait on top of a
//! [`ManualClock`], so queue behaviour can be driven tick by tick without a
//! device, a network or wall-clock time. Loads stay pending until a test
//! completes or fails them.

use crate::backend::{
    AudioBackend, AudioContext, BufferSource, Gain, LoadReply, SharedContext, StreamingHandle,
};
use crate::error::{BackendError, LoadError};
use crate::types::{DecodedAudio, LoadedTrack};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sample rate of buffers produced by [`MockBackend::complete_load`]
const MOCK_SAMPLE_RATE: u32 = 1_000;

/// Logical clock shared by all mock handles
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, secs: f64) {
        self.0.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct StreamState {
    url: String,
    playing: bool,
    base: f64,
    played_from: f64,
    volume: f32,
    duration: Option<f64>,
    ready: bool,
    ended: bool,
    preloads: usize,
    /// Handle still owned by a track
    live: bool,
}

impl StreamState {
    fn position(&self, now: f64) -> f64 {
        let position = if self.playing {
            self.base + (now - self.played_from)
        } else {
            self.base
        };
        match self.duration {
            Some(d) => position.min(d),
            None => position,
        }
    }
}

#[derive(Debug)]
struct SourceState {
    duration: f64,
    gain: Gain,
    started: Option<(f64, f64)>,
    stopped: bool,
    forced_end: bool,
}

impl SourceState {
    fn has_ended(&self, now: f64) -> bool {
        match self.started {
            Some((when, offset)) if !self.stopped => {
                self.forced_end || now >= when + (self.duration - offset)
            }
            _ => false,
        }
    }

    fn is_active(&self, now: f64) -> bool {
        self.started.is_some() && !self.stopped && !self.has_ended(now)
    }
}

#[derive(Default)]
struct Inner {
    clock: ManualClock,
    context: SharedContext,
    context_builds: AtomicUsize,
    context_unavailable: AtomicBool,
    refuse_play: AtomicBool,
    streams: Mutex<Vec<Arc<Mutex<StreamState>>>>,
    stream_durations: Mutex<HashMap<String, f64>>,
    sources: Arc<Mutex<Vec<Arc<Mutex<SourceState>>>>>,
    pending: Mutex<Vec<(String, LoadReply)>>,
}

/// Scriptable backend; clones share state
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to pass to the queue
    pub fn shared(&self) -> Arc<dyn AudioBackend> {
        Arc::new(self.clone())
    }

    pub fn clock(&self) -> &ManualClock {
        &self.inner.clock
    }

    // ===== Loads =====

    /// URLs with a load in flight, oldest first
    pub fn pending_loads(&self) -> Vec<String> {
        lock(&self.inner.pending)
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Answer the oldest pending load of `url` with `secs` of silence
    pub fn complete_load(&self, url: &str, secs: f64) -> bool {
        self.answer(url, Ok(DecodedAudio::silence(secs, 1, MOCK_SAMPLE_RATE).into()))
    }

    /// Like [`Self::complete_load`], reporting a redirect target
    pub fn complete_load_redirected(&self, url: &str, secs: f64, resolved: &str) -> bool {
        self.answer(
            url,
            Ok(LoadedTrack {
                audio: DecodedAudio::silence(secs, 1, MOCK_SAMPLE_RATE),
                resolved_url: Some(resolved.to_string()),
            }),
        )
    }

    /// Fail the oldest pending load of `url`
    pub fn fail_load(&self, url: &str) -> bool {
        self.answer(url, Err(LoadError::Network(format!("mock failure for {url}"))))
    }

    fn answer(&self, url: &str, outcome: Result<LoadedTrack, LoadError>) -> bool {
        let reply = {
            let mut pending = lock(&self.inner.pending);
            pending
                .iter()
                .position(|(u, _)| u == url)
                .map(|i| pending.remove(i).1)
        };
        match reply {
            Some(reply) => {
                reply.send(outcome);
                true
            }
            None => false,
        }
    }

    // ===== Streams =====

    /// Make every `play` on a stream fail
    pub fn refuse_stream_play(&self, refuse: bool) {
        self.inner.refuse_play.store(refuse, Ordering::SeqCst);
    }

    /// Duration reported by streams of `url` (unknown by default)
    pub fn set_stream_duration(&self, url: &str, secs: f64) {
        lock(&self.inner.stream_durations).insert(url.to_string(), secs);
        if let Some(stream) = self.stream(url) {
            lock(&stream).duration = Some(secs);
        }
    }

    pub fn streams_created(&self, url: &str) -> usize {
        lock(&self.inner.streams)
            .iter()
            .filter(|s| lock(s).url == url)
            .count()
    }

    pub fn stream_playing(&self, url: &str) -> bool {
        self.stream(url).is_some_and(|s| lock(&s).playing)
    }

    /// Number of streams currently playing
    pub fn playing_streams(&self) -> usize {
        lock(&self.inner.streams)
            .iter()
            .filter(|s| lock(s).playing)
            .count()
    }

    /// Stream handles created and not yet dropped
    pub fn live_streams(&self) -> usize {
        lock(&self.inner.streams)
            .iter()
            .filter(|s| lock(s).live)
            .count()
    }

    pub fn stream_volume(&self, url: &str) -> Option<f32> {
        self.stream(url).map(|s| lock(&s).volume)
    }

    pub fn stream_position(&self, url: &str) -> Option<f64> {
        let now = self.inner.clock.now();
        self.stream(url).map(|s| lock(&s).position(now))
    }

    pub fn stream_preloads(&self, url: &str) -> usize {
        self.stream(url).map_or(0, |s| lock(&s).preloads)
    }

    /// Signal natural end on the stream of `url`
    pub fn finish_stream(&self, url: &str) {
        if let Some(stream) = self.stream(url) {
            lock(&stream).ended = true;
        }
    }

    fn stream(&self, url: &str) -> Option<Arc<Mutex<StreamState>>> {
        lock(&self.inner.streams)
            .iter()
            .rev()
            .find(|s| lock(s).url == url)
            .cloned()
    }

    // ===== Precise context =====

    /// Make context creation fail
    pub fn set_context_unavailable(&self, unavailable: bool) {
        self.inner.context_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many times the precise context was constructed
    pub fn context_builds(&self) -> usize {
        self.inner.context_builds.load(Ordering::SeqCst)
    }

    pub fn sources_created(&self) -> usize {
        lock(&self.inner.sources).len()
    }

    /// Sources started, not stopped and not yet ended
    pub fn active_sources(&self) -> usize {
        let now = self.inner.clock.now();
        lock(&self.inner.sources)
            .iter()
            .filter(|s| lock(s).is_active(now))
            .count()
    }

    /// Gain of the most recent active source
    pub fn active_gain(&self) -> Option<f32> {
        let now = self.inner.clock.now();
        lock(&self.inner.sources)
            .iter()
            .rev()
            .find(|s| lock(s).is_active(now))
            .map(|s| lock(s).gain.get())
    }

    /// Force natural end on every active source
    pub fn finish_active_sources(&self) {
        let now = self.inner.clock.now();
        for source in lock(&self.inner.sources).iter() {
            let mut source = lock(source);
            if source.is_active(now) {
                source.forced_end = true;
            }
        }
    }
}

impl AudioBackend for MockBackend {
    fn create_stream(&self, url: &str) -> Box<dyn StreamingHandle> {
        let state = Arc::new(Mutex::new(StreamState {
            url: url.to_string(),
            playing: false,
            base: 0.0,
            played_from: 0.0,
            volume: 1.0,
            duration: lock(&self.inner.stream_durations).get(url).copied(),
            ready: false,
            ended: false,
            preloads: 0,
            live: true,
        }));
        lock(&self.inner.streams).push(Arc::clone(&state));
        Box::new(MockStream {
            state,
            clock: self.inner.clock.clone(),
            backend: self.clone(),
        })
    }

    fn context(&self) -> Result<Arc<dyn AudioContext>, BackendError> {
        self.inner.context.get_or_init(|| {
            if self.inner.context_unavailable.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("mock context disabled".into()));
            }
            self.inner.context_builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockContext {
                clock: self.inner.clock.clone(),
                sources: Arc::clone(&self.inner.sources),
            }))
        })
    }

    fn load(&self, url: &str, reply: LoadReply) {
        lock(&self.inner.pending).push((url.to_string(), reply));
    }
}

struct MockStream {
    state: Arc<Mutex<StreamState>>,
    clock: ManualClock,
    backend: MockBackend,
}

impl StreamingHandle for MockStream {
    fn play(&mut self) -> Result<(), BackendError> {
        if self.backend.inner.refuse_play.load(Ordering::SeqCst) {
            return Err(BackendError::StartRefused("mock refused play".into()));
        }
        let mut state = lock(&self.state);
        if !state.playing {
            state.played_from = self.clock.now();
            state.playing = true;
            state.ready = true;
        }
        Ok(())
    }

    fn pause(&mut self) {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        if state.playing {
            state.base = state.position(now);
            state.playing = false;
        }
    }

    fn position(&self) -> f64 {
        lock(&self.state).position(self.clock.now())
    }

    fn set_position(&mut self, secs: f64) {
        let mut state = lock(&self.state);
        state.base = secs.max(0.0);
        state.played_from = self.clock.now();
        state.ended = false;
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration
    }

    fn set_volume(&mut self, volume: f32) {
        lock(&self.state).volume = volume;
    }

    fn preload(&mut self) {
        let mut state = lock(&self.state);
        state.preloads += 1;
        state.ready = true;
    }

    fn is_ready(&self) -> bool {
        lock(&self.state).ready
    }

    fn has_ended(&self) -> bool {
        let state = lock(&self.state);
        state.ended || state.duration.is_some_and(|d| state.position(self.clock.now()) >= d)
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        if state.playing {
            state.base = state.position(now);
            state.playing = false;
        }
        state.live = false;
    }
}

struct MockContext {
    clock: ManualClock,
    sources: Arc<Mutex<Vec<Arc<Mutex<SourceState>>>>>,
}

impl AudioContext for MockContext {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn create_buffer_source(
        &self,
        buffer: Arc<DecodedAudio>,
        gain: Gain,
    ) -> Result<Box<dyn BufferSource>, BackendError> {
        let state = Arc::new(Mutex::new(SourceState {
            duration: buffer.duration(),
            gain,
            started: None,
            stopped: false,
            forced_end: false,
        }));
        lock(&self.sources).push(Arc::clone(&state));
        Ok(Box::new(MockSource {
            state,
            clock: self.clock.clone(),
        }))
    }
}

struct MockSource {
    state: Arc<Mutex<SourceState>>,
    clock: ManualClock,
}

impl BufferSource for MockSource {
    fn start(&mut self, when: f64, offset: f64) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if state.started.is_some() || state.stopped {
            return Err(BackendError::InvalidState("source already used".into()));
        }
        state.started = Some((when, offset));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if state.stopped || state.started.is_none() {
            return Err(BackendError::InvalidState("source not running".into()));
        }
        state.stopped = true;
        Ok(())
    }

    fn has_ended(&self) -> bool {
        lock(&self.state).has_ended(self.clock.now())
    }
}
