//! Software mixer behind the output device
//!
//! The mixer is the precise context: its clock is the number of frames
//! rendered so far, so buffer voices start on an exact frame and report their
//! end from the same counter the device consumes. Streaming handles feed a
//! [`StreamVoice`] ring that the mixer drains at the device rate.
//!
//! Nothing here touches a device. [`Mixer::render`] is called from the cpal
//! callback in production and directly from tests.

use gapless_playback::{AudioContext, BackendError, BufferSource, DecodedAudio, Gain};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Channels of every stream voice ring (interleaved stereo)
pub const STREAM_CHANNELS: usize = 2;

/// How long a blocked producer sleeps before re-checking for cancellation
const PUSH_WAIT: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Voice registered with the mixer
enum Voice {
    Buffer(Arc<BufferVoice>),
    Stream(Arc<StreamVoice>),
}

impl Voice {
    fn is_finished(&self) -> bool {
        match self {
            Voice::Buffer(voice) => voice.is_finished(),
            Voice::Stream(voice) => voice.is_closed(),
        }
    }
}

/// Frame-counting mixer shared by the output callback and the players
pub struct Mixer {
    sample_rate: u32,
    rendered: Arc<AtomicU64>,
    voices: Mutex<Vec<Voice>>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            rendered: Arc::new(AtomicU64::new(0)),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far
    pub fn rendered_frames(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }

    /// Context clock in seconds
    pub fn now(&self) -> f64 {
        self.rendered_frames() as f64 / f64::from(self.sample_rate)
    }

    /// Number of registered voices
    pub fn voice_count(&self) -> usize {
        lock(&self.voices).len()
    }

    /// Register a stream voice; it is heard whenever its play flag is set
    pub fn add_stream(&self, voice: Arc<StreamVoice>) {
        let mut voices = lock(&self.voices);
        let known = voices
            .iter()
            .any(|v| matches!(v, Voice::Stream(s) if Arc::ptr_eq(s, &voice)));
        if !known {
            voices.push(Voice::Stream(voice));
        }
    }

    /// Mix every voice into `output` (interleaved, `channels` wide)
    ///
    /// Runs on the real-time audio thread.
    pub fn render(&self, output: &mut [f32], channels: usize) {
        output.fill(0.0);
        let channels = channels.max(1);
        let frames = output.len() / channels;
        let first_frame = self.rendered.load(Ordering::Acquire);

        {
            let mut voices = lock(&self.voices);
            voices.retain(|voice| !voice.is_finished());
            for voice in voices.iter() {
                match voice {
                    Voice::Buffer(v) => v.mix_into(output, channels, first_frame, self.sample_rate),
                    Voice::Stream(v) => v.mix_into(output, channels),
                }
            }
        }

        self.rendered.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("sample_rate", &self.sample_rate)
            .field("rendered", &self.rendered_frames())
            .field("voices", &self.voice_count())
            .finish()
    }
}

impl AudioContext for Mixer {
    fn now(&self) -> f64 {
        Mixer::now(self)
    }

    fn create_buffer_source(
        &self,
        buffer: Arc<DecodedAudio>,
        gain: Gain,
    ) -> Result<Box<dyn BufferSource>, BackendError> {
        let voice = Arc::new(BufferVoice::new(buffer, gain));
        lock(&self.voices).push(Voice::Buffer(Arc::clone(&voice)));

        Ok(Box::new(MixerSource {
            voice,
            rendered: Arc::clone(&self.rendered),
            sample_rate: self.sample_rate,
        }))
    }
}

/// Mixer frame for context time `when`; past times start on the next frame
fn frame_at(when: f64, sample_rate: u32, rendered: u64) -> u64 {
    if !when.is_finite() || when <= 0.0 {
        return rendered;
    }
    ((when * f64::from(sample_rate)).round() as u64).max(rendered)
}

// ===== Buffer voices =====

const VOICE_IDLE: u8 = 0;
const VOICE_SCHEDULED: u8 = 1;
const VOICE_STOPPED: u8 = 2;
const VOICE_ENDED: u8 = 3;

/// One-shot player of a decoded buffer
struct BufferVoice {
    audio: Arc<DecodedAudio>,
    gain: Gain,
    state: AtomicU8,
    /// Mixer frame at which the first sample plays
    start_frame: AtomicU64,
    /// Offset into the buffer in seconds (f64 bits)
    offset: AtomicU64,
}

impl BufferVoice {
    fn new(audio: Arc<DecodedAudio>, gain: Gain) -> Self {
        Self {
            audio,
            gain,
            state: AtomicU8::new(VOICE_IDLE),
            start_frame: AtomicU64::new(0),
            offset: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn schedule(&self, start_frame: u64, offset: f64) -> Result<(), BackendError> {
        if self.state.load(Ordering::Acquire) != VOICE_IDLE {
            return Err(BackendError::InvalidState(
                "buffer source already started".into(),
            ));
        }

        self.start_frame.store(start_frame, Ordering::Release);
        self.offset.store(offset.max(0.0).to_bits(), Ordering::Release);

        self.state
            .compare_exchange(
                VOICE_IDLE,
                VOICE_SCHEDULED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| BackendError::InvalidState("buffer source already started".into()))
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.state
            .compare_exchange(
                VOICE_SCHEDULED,
                VOICE_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|state| {
                let reason = match state {
                    VOICE_IDLE => "buffer source was never started",
                    VOICE_ENDED => "buffer source already ended",
                    _ => "buffer source already stopped",
                };
                BackendError::InvalidState(reason.into())
            })
    }

    /// Retire the voice whatever its state, so the mixer drops it
    fn release(&self) {
        let _ = self.state.compare_exchange(
            VOICE_IDLE,
            VOICE_STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.stop();
    }

    fn has_ended(&self) -> bool {
        self.state.load(Ordering::Acquire) == VOICE_ENDED
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            VOICE_STOPPED | VOICE_ENDED
        )
    }

    fn mix_into(&self, output: &mut [f32], channels: usize, first_frame: u64, mix_rate: u32) {
        if self.state.load(Ordering::Acquire) != VOICE_SCHEDULED {
            return;
        }

        let audio = &self.audio;
        let width = usize::from(audio.channels.max(1));
        let total = audio.frames();
        let step = f64::from(audio.sample_rate) / f64::from(mix_rate);
        let start_frame = self.start_frame.load(Ordering::Acquire);
        let offset_frames =
            f64::from_bits(self.offset.load(Ordering::Acquire)) * f64::from(audio.sample_rate);
        let gain = self.gain.get();

        for (i, frame) in output.chunks_exact_mut(channels).enumerate() {
            let mixer_frame = first_frame + i as u64;
            if mixer_frame < start_frame {
                continue;
            }

            let position = offset_frames + (mixer_frame - start_frame) as f64 * step;
            let index = position.floor() as usize;
            if index >= total {
                break;
            }

            let next = (index + 1).min(total - 1);
            let frac = (position - index as f64) as f32;
            let current = &audio.samples[index * width..(index + 1) * width];
            let following = &audio.samples[next * width..(next + 1) * width];

            for (ch, out) in frame.iter_mut().enumerate() {
                let a = channel_sample(current, ch, channels);
                let b = channel_sample(following, ch, channels);
                *out += (a + (b - a) * frac) * gain;
            }
        }

        let end_frame = first_frame + (output.len() / channels) as u64;
        let next_position = offset_frames + end_frame.saturating_sub(start_frame) as f64 * step;
        if next_position >= total as f64 {
            let _ = self.state.compare_exchange(
                VOICE_SCHEDULED,
                VOICE_ENDED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

/// Sample of `frame` heard on output channel `ch` of a `channels` wide device
fn channel_sample(frame: &[f32], ch: usize, channels: usize) -> f32 {
    match frame.len() {
        0 => 0.0,
        1 => frame[0],
        _ if channels == 1 => (frame[0] + frame[1]) * 0.5,
        len => frame[(ch % 2).min(len - 1)],
    }
}

/// [`BufferSource`] handed to a track unit
pub struct MixerSource {
    voice: Arc<BufferVoice>,
    rendered: Arc<AtomicU64>,
    sample_rate: u32,
}

impl BufferSource for MixerSource {
    fn start(&mut self, when: f64, offset: f64) -> Result<(), BackendError> {
        let rendered = self.rendered.load(Ordering::Acquire);
        self.voice
            .schedule(frame_at(when, self.sample_rate, rendered), offset)
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.voice.stop()
    }

    fn has_ended(&self) -> bool {
        self.voice.has_ended()
    }
}

impl Drop for MixerSource {
    fn drop(&mut self) {
        self.voice.release();
    }
}

// ===== Stream voices =====

struct Ring {
    samples: VecDeque<f32>,
    generation: u64,
}

/// Ring of decoded stereo samples fed by a streaming decoder
///
/// Every seek starts a new generation; pushes from an older decoder are
/// rejected so stale audio never reaches the device.
pub struct StreamVoice {
    ring: Mutex<Ring>,
    space: Condvar,
    capacity: usize,
    gain: Gain,
    playing: AtomicBool,
    consumed: AtomicU64,
    eof: AtomicBool,
    closed: AtomicBool,
}

impl StreamVoice {
    /// Voice holding at most `capacity_frames` frames ahead of the play head
    pub fn new(capacity_frames: usize, gain: Gain) -> Self {
        let capacity = capacity_frames.max(1) * STREAM_CHANNELS;
        Self {
            ring: Mutex::new(Ring {
                samples: VecDeque::with_capacity(capacity),
                generation: 0,
            }),
            space: Condvar::new(),
            capacity,
            gain,
            playing: AtomicBool::new(false),
            consumed: AtomicU64::new(0),
            eof: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn gain(&self) -> &Gain {
        &self.gain
    }

    pub fn generation(&self) -> u64 {
        lock(&self.ring).generation
    }

    /// Drop buffered audio and start a new generation
    pub fn reset(&self) -> u64 {
        let mut ring = lock(&self.ring);
        ring.generation += 1;
        ring.samples.clear();
        self.consumed.store(0, Ordering::Release);
        self.eof.store(false, Ordering::Release);
        self.space.notify_all();
        ring.generation
    }

    /// Append interleaved stereo samples, blocking while the ring is full
    ///
    /// Returns `false` once the voice is closed or `generation` is stale.
    pub fn push(&self, samples: &[f32], generation: u64) -> bool {
        let mut ring = lock(&self.ring);
        loop {
            if self.is_closed() || ring.generation != generation {
                return false;
            }
            if ring.samples.is_empty() || ring.samples.len() + samples.len() <= self.capacity {
                ring.samples.extend(samples.iter().copied());
                return true;
            }
            ring = self
                .space
                .wait_timeout(ring, PUSH_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The decoder of `generation` reached the end of the media
    pub fn finish(&self, generation: u64) {
        let ring = lock(&self.ring);
        if ring.generation == generation {
            self.eof.store(true, Ordering::Release);
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn buffered_frames(&self) -> usize {
        lock(&self.ring).samples.len() / STREAM_CHANNELS
    }

    /// Frames played since the last reset
    pub fn consumed_frames(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    /// End of media reached and every buffered frame played
    pub fn is_drained(&self) -> bool {
        self.is_eof() && self.buffered_frames() == 0
    }

    /// Detach from the mixer and wake any blocked producer
    pub fn close(&self) {
        self.playing.store(false, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        let _ring = lock(&self.ring);
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mix_into(&self, output: &mut [f32], channels: usize) {
        if !self.is_playing() {
            return;
        }

        let gain = self.gain.get();
        let mut ring = lock(&self.ring);
        let wanted = output.len() / channels;
        let available = ring.samples.len() / STREAM_CHANNELS;
        let frames = wanted.min(available);

        for frame in output.chunks_exact_mut(channels).take(frames) {
            let left = ring.samples.pop_front().unwrap_or(0.0);
            let right = ring.samples.pop_front().unwrap_or(0.0);
            let pair = [left, right];
            for (ch, out) in frame.iter_mut().enumerate() {
                *out += channel_sample(&pair, ch, channels) * gain;
            }
        }

        if frames > 0 {
            self.consumed.fetch_add(frames as u64, Ordering::AcqRel);
            self.space.notify_one();
        }
    }
}

impl std::fmt::Debug for StreamVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamVoice")
            .field("buffered", &self.buffered_frames())
            .field("consumed", &self.consumed_frames())
            .field("playing", &self.is_playing())
            .field("eof", &self.is_eof())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: Vec<f32>, rate: u32) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(samples, 1, rate))
    }

    fn render(mixer: &Mixer, frames: usize, channels: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * channels];
        mixer.render(&mut out, channels);
        out
    }

    #[test]
    fn clock_counts_rendered_frames() {
        let mixer = Mixer::new(1_000);
        render(&mixer, 500, 2);
        assert_eq!(mixer.rendered_frames(), 500);
        assert_eq!(mixer.now(), 0.5);
    }

    #[test]
    fn buffer_voice_plays_to_its_end() {
        let mixer = Mixer::new(100);
        let mut source = mixer
            .create_buffer_source(mono(vec![0.5; 100], 100), Gain::new(1.0))
            .unwrap();
        source.start(0.0, 0.0).unwrap();

        let out = render(&mixer, 50, 2);
        assert!(out.iter().all(|s| *s == 0.5));
        assert!(!source.has_ended());

        let out = render(&mixer, 60, 2);
        assert!(out[..100].iter().all(|s| *s == 0.5));
        assert!(out[100..].iter().all(|s| *s == 0.0));
        assert!(source.has_ended());

        render(&mixer, 1, 2);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn start_honours_when_and_offset() {
        let mixer = Mixer::new(100);
        let ramp: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut source = mixer
            .create_buffer_source(mono(ramp, 100), Gain::new(1.0))
            .unwrap();
        source.start(0.1, 0.5).unwrap();

        let out = render(&mixer, 20, 1);
        assert!(out[..10].iter().all(|s| *s == 0.0));
        assert_eq!(out[10], 50.0);
        assert_eq!(out[19], 59.0);
    }

    #[test]
    fn start_in_the_past_begins_now() {
        let mixer = Mixer::new(100);
        render(&mixer, 30, 1);

        let ramp: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut source = mixer
            .create_buffer_source(mono(ramp, 100), Gain::new(1.0))
            .unwrap();
        source.start(0.1, 0.0).unwrap();

        let out = render(&mixer, 3, 1);
        assert_eq!(out, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn redundant_start_and_stop_are_invalid_state() {
        let mixer = Mixer::new(100);
        let mut source = mixer
            .create_buffer_source(mono(vec![0.1; 10], 100), Gain::new(1.0))
            .unwrap();

        assert!(source.stop().unwrap_err().is_invalid_state());
        source.start(0.0, 0.0).unwrap();
        assert!(source.start(0.0, 0.0).unwrap_err().is_invalid_state());
        source.stop().unwrap();
        assert!(source.stop().unwrap_err().is_invalid_state());
        assert!(!source.has_ended());
    }

    #[test]
    fn gain_scales_output_and_follows_changes() {
        let mixer = Mixer::new(100);
        let gain = Gain::new(0.5);
        let mut source = mixer
            .create_buffer_source(mono(vec![0.5; 100], 100), gain.clone())
            .unwrap();
        source.start(0.0, 0.0).unwrap();

        assert_eq!(render(&mixer, 1, 1), vec![0.25]);
        gain.set(1.0);
        assert_eq!(render(&mixer, 1, 1), vec![0.5]);
    }

    #[test]
    fn dropped_source_is_pruned() {
        let mixer = Mixer::new(100);
        let source = mixer
            .create_buffer_source(mono(vec![0.1; 10], 100), Gain::new(1.0))
            .unwrap();
        assert_eq!(mixer.voice_count(), 1);

        drop(source);
        render(&mixer, 1, 2);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn mono_device_downmixes_stereo() {
        let mixer = Mixer::new(100);
        let stereo = Arc::new(DecodedAudio::new(vec![1.0, 0.0, 1.0, 0.0], 2, 100));
        let mut source = mixer.create_buffer_source(stereo, Gain::new(1.0)).unwrap();
        source.start(0.0, 0.0).unwrap();

        assert_eq!(render(&mixer, 2, 1), vec![0.5, 0.5]);
    }

    #[test]
    fn stream_voice_drains_only_while_playing() {
        let mixer = Mixer::new(100);
        let voice = Arc::new(StreamVoice::new(100, Gain::new(1.0)));
        mixer.add_stream(Arc::clone(&voice));
        mixer.add_stream(Arc::clone(&voice));
        assert_eq!(mixer.voice_count(), 1);

        let generation = voice.generation();
        let samples: Vec<f32> = [0.1, 0.2].repeat(10);
        assert!(voice.push(&samples, generation));

        render(&mixer, 4, 2);
        assert_eq!(voice.consumed_frames(), 0);

        voice.set_playing(true);
        let out = render(&mixer, 4, 2);
        assert_eq!(&out[..2], &[0.1, 0.2]);
        assert_eq!(voice.consumed_frames(), 4);
        assert_eq!(voice.buffered_frames(), 6);

        voice.finish(generation);
        assert!(!voice.is_drained());
        let out = render(&mixer, 10, 2);
        assert_eq!(out[12], 0.0, "underrun renders silence");
        assert!(voice.is_drained());
        assert_eq!(voice.consumed_frames(), 10);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let voice = StreamVoice::new(100, Gain::new(1.0));
        let old = voice.generation();
        assert!(voice.push(&[0.0, 0.0], old));

        let current = voice.reset();
        assert_eq!(voice.buffered_frames(), 0);
        assert!(!voice.push(&[0.0, 0.0], old));
        assert!(voice.push(&[0.0, 0.0], current));

        voice.finish(old);
        assert!(!voice.is_eof());
    }

    #[test]
    fn closed_voice_unblocks_producer_and_is_pruned() {
        let mixer = Mixer::new(100);
        let voice = Arc::new(StreamVoice::new(1, Gain::new(1.0)));
        mixer.add_stream(Arc::clone(&voice));
        let generation = voice.generation();
        assert!(voice.push(&[0.0, 0.0], generation));

        let producer = {
            let voice = Arc::clone(&voice);
            std::thread::spawn(move || voice.push(&[0.0, 0.0], generation))
        };
        std::thread::sleep(Duration::from_millis(20));
        voice.close();

        assert!(!producer.join().unwrap());
        render(&mixer, 1, 2);
        assert_eq!(mixer.voice_count(), 0);
    }
}
