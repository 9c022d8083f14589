//! HTTP streaming backend
//!
//! Playback starts as soon as the first bytes are decodable:
//!
//! ```text
//! tokio task ──chunks──> ProgressiveBytes ──read──> decoder thread ──push──> StreamVoice ──> Mixer
//! ```
//!
//! The decoder keeps at most `buffer_secs` of audio ahead of the play head.
//! A seek starts a new decoder generation from the requested timestamp; the
//! old decoder is cancelled and anything it still pushes is rejected.

use crate::decode::{ChunkResampler, StreamDecoder};
use crate::fetch;
use crate::mixer::{StreamVoice, STREAM_CHANNELS};
use crate::output::OutputTarget;
use crate::progressive::{self, ProgressiveBytes, ProgressiveReader};
use gapless_playback::{BackendError, Gain, StreamingHandle};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::runtime::Handle;

/// Facts discovered by the decoder thread
#[derive(Debug, Default)]
struct StreamInfo {
    duration: Mutex<Option<f64>>,
    error: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running decoder thread
///
/// Dropping the worker detaches the thread; cancellation is explicit.
struct DecoderWorker {
    cancel: Arc<AtomicBool>,
    _thread: thread::JoinHandle<()>,
}

impl DecoderWorker {
    fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Streaming handle for one remote track
pub struct HttpStream {
    url: String,
    client: Client,
    runtime: Handle,
    output: OutputTarget,
    buffer_secs: f64,
    gain: Gain,
    info: Arc<StreamInfo>,
    bytes: Option<Arc<ProgressiveBytes>>,
    download: Option<tokio::task::JoinHandle<()>>,
    voice: Option<Arc<StreamVoice>>,
    worker: Option<DecoderWorker>,
    /// Track position at which the current decoder generation starts
    base: f64,
    rate: u32,
    playing: bool,
}

impl HttpStream {
    pub fn new(
        url: impl Into<String>,
        client: Client,
        runtime: Handle,
        output: OutputTarget,
        buffer_secs: f64,
    ) -> Self {
        Self {
            url: url.into(),
            client,
            runtime,
            output,
            buffer_secs: buffer_secs.max(0.1),
            gain: Gain::default(),
            info: Arc::new(StreamInfo::default()),
            bytes: None,
            download: None,
            voice: None,
            worker: None,
            base: 0.0,
            rate: 1,
            playing: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Download or decode failure, if any
    pub fn error(&self) -> Option<String> {
        lock(&self.info.error).clone()
    }

    /// Bytes received so far
    pub fn downloaded(&self) -> usize {
        self.bytes.as_ref().map_or(0, |bytes| bytes.len())
    }

    fn ensure_download(&mut self) -> Arc<ProgressiveBytes> {
        if let Some(bytes) = &self.bytes {
            return Arc::clone(bytes);
        }

        tracing::debug!(url = %self.url, "Starting stream download");
        let bytes = ProgressiveBytes::new();
        self.download = Some(self.runtime.spawn(progressive::download(
            self.client.clone(),
            self.url.clone(),
            Arc::clone(&bytes),
        )));
        self.bytes = Some(Arc::clone(&bytes));
        bytes
    }

    fn ensure_decoder(&mut self, rate: u32) {
        if self.worker.is_some() {
            return;
        }

        if self.voice.is_none() {
            self.rate = rate.max(1);
            let capacity = (self.buffer_secs * f64::from(self.rate)).ceil() as usize;
            self.voice = Some(Arc::new(StreamVoice::new(capacity, self.gain.clone())));
        }
        self.spawn_decoder();
    }

    fn spawn_decoder(&mut self) {
        let Some(voice) = self.voice.clone() else {
            return;
        };
        let bytes = self.ensure_download();

        if let Some(old) = self.worker.take() {
            old.cancel();
            bytes.wake();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let job = DecodeJob {
            url: self.url.clone(),
            bytes,
            voice: Arc::clone(&voice),
            info: Arc::clone(&self.info),
            cancel: Arc::clone(&cancel),
            generation: voice.reset(),
            start: self.base,
            target_rate: self.rate,
        };

        match thread::Builder::new()
            .name("gapless-stream".to_string())
            .spawn(move || job.run())
        {
            Ok(thread) => {
                self.worker = Some(DecoderWorker {
                    cancel,
                    _thread: thread,
                });
            }
            Err(e) => {
                tracing::error!(url = %self.url, "Failed to spawn stream decoder: {}", e);
                *lock(&self.info.error) = Some(e.to_string());
            }
        }
    }

    fn clamp(&self, secs: f64) -> f64 {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        match self.duration() {
            Some(duration) => secs.min(duration),
            None => secs,
        }
    }
}

impl StreamingHandle for HttpStream {
    fn play(&mut self) -> Result<(), BackendError> {
        let mixer = self.output.mixer()?;
        self.ensure_decoder(mixer.sample_rate());

        let Some(voice) = self.voice.clone() else {
            return Err(BackendError::Other("stream voice missing".into()));
        };
        mixer.add_stream(Arc::clone(&voice));
        voice.set_playing(true);
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(voice) = &self.voice {
            voice.set_playing(false);
        }
        self.playing = false;
    }

    fn position(&self) -> f64 {
        let consumed = self
            .voice
            .as_ref()
            .map_or(0.0, |voice| voice.consumed_frames() as f64 / f64::from(self.rate));
        self.clamp(self.base + consumed)
    }

    fn set_position(&mut self, secs: f64) {
        self.base = self.clamp(secs);
        if self.worker.is_some() {
            tracing::debug!(url = %self.url, position = self.base, "Restarting stream decoder");
            self.spawn_decoder();
        }
    }

    fn duration(&self) -> Option<f64> {
        *lock(&self.info.duration)
    }

    fn set_volume(&mut self, volume: f32) {
        self.gain.set(volume);
    }

    fn preload(&mut self) {
        self.ensure_download();
        if let Some(rate) = self.output.sample_rate() {
            self.ensure_decoder(rate);
        }
    }

    fn is_ready(&self) -> bool {
        self.voice
            .as_ref()
            .is_some_and(|voice| voice.buffered_frames() > 0 || voice.is_eof())
    }

    fn has_ended(&self) -> bool {
        self.voice.as_ref().is_some_and(|voice| voice.is_drained())
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel();
        }
        if let Some(voice) = self.voice.take() {
            voice.close();
        }
        if let Some(bytes) = self.bytes.take() {
            bytes.cancel();
        }
        if let Some(download) = self.download.take() {
            download.abort();
        }
    }
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("url", &self.url)
            .field("playing", &self.playing)
            .field("base", &self.base)
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

/// One decoder generation
struct DecodeJob {
    url: String,
    bytes: Arc<ProgressiveBytes>,
    voice: Arc<StreamVoice>,
    info: Arc<StreamInfo>,
    cancel: Arc<AtomicBool>,
    generation: u64,
    start: f64,
    target_rate: u32,
}

impl DecodeJob {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run(self) {
        if !self.bytes.wait_started(&self.cancel) {
            if !self.cancelled() {
                let message = self
                    .bytes
                    .error()
                    .unwrap_or_else(|| "empty response".to_string());
                self.fail(&message);
            }
            return;
        }

        let extension = fetch::extension_hint(&self.url, self.bytes.content_type().as_deref());
        let reader = ProgressiveReader::new(Arc::clone(&self.bytes), Arc::clone(&self.cancel));

        let mut decoder = match StreamDecoder::open(Box::new(reader), extension.as_deref()) {
            Ok(decoder) => decoder,
            Err(e) => return self.fail(&e.to_string()),
        };
        *lock(&self.info.duration) = decoder.duration();

        // Frames to drop when the container cannot seek
        let mut discard = 0u64;
        if self.start > 0.0 {
            if let Err(e) = decoder.seek(self.start) {
                tracing::debug!(url = %self.url, "Seek unsupported, decoding forward: {}", e);
                discard = (self.start * f64::from(decoder.sample_rate())).round() as u64;
            }
        }

        let mut resampler = if decoder.sample_rate() == self.target_rate {
            None
        } else {
            match ChunkResampler::new(decoder.sample_rate(), self.target_rate) {
                Ok(resampler) => Some(resampler),
                Err(e) => return self.fail(&e.to_string()),
            }
        };

        loop {
            if self.cancelled() {
                return;
            }

            match decoder.next_chunk() {
                Ok(Some(mut chunk)) => {
                    if discard > 0 {
                        let frames = (chunk.len() / STREAM_CHANNELS) as u64;
                        let drop_frames = discard.min(frames);
                        chunk.drain(..drop_frames as usize * STREAM_CHANNELS);
                        discard -= drop_frames;
                    }

                    let samples = match resampler.as_mut() {
                        Some(resampler) => match resampler.process(&chunk) {
                            Ok(samples) => samples,
                            Err(e) => return self.fail(&e.to_string()),
                        },
                        None => chunk,
                    };

                    if !samples.is_empty() && !self.voice.push(&samples, self.generation) {
                        return;
                    }
                }
                Ok(None) => {
                    if let Some(resampler) = resampler.as_mut() {
                        match resampler.finish() {
                            Ok(tail) if !tail.is_empty() => {
                                if !self.voice.push(&tail, self.generation) {
                                    return;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(url = %self.url, "Resampler flush failed: {}", e),
                        }
                    }
                    tracing::debug!(url = %self.url, "Stream decoded to the end");
                    self.voice.finish(self.generation);
                    return;
                }
                Err(e) => return self.fail(&e.to_string()),
            }
        }
    }

    /// Record a fatal error; the stream then reports its end
    fn fail(&self, message: &str) {
        if self.cancelled() {
            return;
        }
        tracing::warn!(url = %self.url, "Stream playback failed: {}", message);
        *lock(&self.info.error) = Some(message.to_string());
        self.voice.finish(self.generation);
    }
}
