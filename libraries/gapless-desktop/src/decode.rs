//! Symphonia decoding and rubato resampling
//!
//! Everything leaves this module as interleaved stereo f32: mono sources are
//! duplicated, extra channels beyond the front pair are dropped. Both the
//! fetch-then-decode pipeline and the streaming decoder go through
//! [`StreamDecoder`], optionally followed by a [`ChunkResampler`].

use crate::error::{AudioError, Result};
use crate::mixer::STREAM_CHANNELS;
use gapless_playback::DecodedAudio;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

/// Input frames per resampler chunk
const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Decode a complete in-memory payload
///
/// With a `target_rate` that differs from the source rate the result is
/// resampled to it.
pub fn decode_bytes(
    bytes: Vec<u8>,
    extension: Option<&str>,
    target_rate: Option<u32>,
) -> Result<DecodedAudio> {
    let mut decoder = StreamDecoder::open(Box::new(Cursor::new(bytes)), extension)?;
    let source_rate = decoder.sample_rate();

    let mut samples = Vec::with_capacity(
        decoder
            .total_frames()
            .map_or(0, |frames| frames as usize * STREAM_CHANNELS),
    );
    while let Some(chunk) = decoder.next_chunk()? {
        samples.extend_from_slice(&chunk);
    }

    if samples.is_empty() {
        return Err(AudioError::DecodeError("no audio frames decoded".into()));
    }

    match target_rate {
        Some(rate) if rate != source_rate => {
            let mut resampler = ChunkResampler::new(source_rate, rate)?;
            let mut resampled = resampler.process(&samples)?;
            resampled.extend(resampler.finish()?);
            tracing::debug!(
                from = source_rate,
                to = rate,
                frames = resampled.len() / STREAM_CHANNELS,
                "Resampled decoded track"
            );
            Ok(DecodedAudio::new(resampled, STREAM_CHANNELS as u16, rate))
        }
        _ => Ok(DecodedAudio::new(
            samples,
            STREAM_CHANNELS as u16,
            source_rate,
        )),
    }
}

/// Packet-by-packet decoder over any media source
pub struct StreamDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: TimeBase,
    total_frames: Option<u64>,
    /// Frames still to drop after an accurate seek landed early
    skip_frames: u64,
}

impl StreamDecoder {
    /// Probe `source` and prepare a decoder for its default track
    pub fn open(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| AudioError::UnsupportedFormat("no audio tracks found".into()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::UnsupportedFormat("unknown sample rate".into()))?;
        let track_id = track.id;
        let time_base = track
            .codec_params
            .time_base
            .unwrap_or(TimeBase::new(1, sample_rate));
        let total_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        tracing::debug!(
            sample_rate,
            channels = track.codec_params.channels.map(|c| c.count()),
            frames = total_frames,
            "Opened audio stream"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            time_base,
            total_frames,
            skip_frames: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// Length in seconds, when the container declares it
    pub fn duration(&self) -> Option<f64> {
        self.total_frames
            .map(|frames| frames as f64 / f64::from(self.sample_rate))
    }

    /// Jump to `secs`; the next chunk starts exactly there
    pub fn seek(&mut self, secs: f64) -> Result<()> {
        let target = Duration::try_from_secs_f64(secs.max(0.0))
            .map_err(|e| AudioError::DecodeError(format!("invalid seek target {secs}: {e}")))?;
        let ts = self.time_base.calc_timestamp(target.into());

        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();

        let early = seeked.required_ts.saturating_sub(seeked.actual_ts);
        let early_secs = {
            let time = self.time_base.calc_time(early);
            time.seconds as f64 + time.frac
        };
        self.skip_frames = (early_secs * f64::from(self.sample_rate)).round() as u64;

        Ok(())
    }

    /// Next block of interleaved stereo samples at the source rate
    ///
    /// `Ok(None)` at the end of the media. Corrupt packets are skipped.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            let mut stereo = to_stereo(buffer.samples(), spec.channels.count());
            if self.skip_frames > 0 {
                let frames = (stereo.len() / STREAM_CHANNELS) as u64;
                let skip = self.skip_frames.min(frames);
                stereo.drain(..skip as usize * STREAM_CHANNELS);
                self.skip_frames -= skip;
            }

            if !stereo.is_empty() {
                return Ok(Some(stereo));
            }
        }
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("track_id", &self.track_id)
            .field("sample_rate", &self.sample_rate)
            .field("total_frames", &self.total_frames)
            .finish_non_exhaustive()
    }
}

/// Interleaved samples of any width to interleaved stereo
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Streaming stereo resampler
///
/// Accepts input of any length, emits whatever full chunks allow, and on
/// [`finish`](Self::finish) flushes the tail so the total output length
/// matches the rate ratio. The filter delay is trimmed from the front.
pub struct ChunkResampler {
    inner: SincFixedIn<f32>,
    ratio: f64,
    pending: Vec<Vec<f32>>,
    skip: usize,
    input_frames: u64,
    output_frames: u64,
}

impl ChunkResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let ratio = f64::from(to_rate) / f64::from(from_rate.max(1));
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let inner =
            SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLER_CHUNK_FRAMES, STREAM_CHANNELS)?;
        let skip = inner.output_delay();

        Ok(Self {
            inner,
            ratio,
            pending: vec![Vec::with_capacity(RESAMPLER_CHUNK_FRAMES); STREAM_CHANNELS],
            skip,
            input_frames: 0,
            output_frames: 0,
        })
    }

    /// Feed interleaved stereo samples, returning resampled output so far
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        for frame in interleaved.chunks_exact(STREAM_CHANNELS) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        self.input_frames += (interleaved.len() / STREAM_CHANNELS) as u64;

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let resampled = self.inner.process(&chunk, None)?;
            self.emit(&resampled, &mut output, None);
        }

        Ok(output)
    }

    /// Flush buffered input and the filter tail
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let expected = (self.input_frames as f64 * self.ratio).round() as u64;
        let mut output = Vec::new();

        if !self.pending[0].is_empty() {
            let pending = std::mem::replace(
                &mut self.pending,
                vec![Vec::new(); STREAM_CHANNELS],
            );
            let resampled = self.inner.process_partial(Some(pending.as_slice()), None)?;
            self.emit(&resampled, &mut output, Some(expected));
        }

        // Each empty call pushes out one more chunk of the delay line
        let mut flushes = 0;
        while self.output_frames < expected && flushes < 8 {
            let resampled = self.inner.process_partial::<Vec<f32>>(None, None)?;
            self.emit(&resampled, &mut output, Some(expected));
            flushes += 1;
        }

        Ok(output)
    }

    fn emit(&mut self, resampled: &[Vec<f32>], output: &mut Vec<f32>, limit: Option<u64>) {
        let frames = resampled.first().map_or(0, Vec::len);
        for index in 0..frames {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if limit.is_some_and(|limit| self.output_frames >= limit) {
                return;
            }
            for channel in resampled {
                output.push(channel[index]);
            }
            self.output_frames += 1;
        }
    }
}

impl std::fmt::Debug for ChunkResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkResampler")
            .field("ratio", &self.ratio)
            .field("input_frames", &self.input_frames)
            .field("output_frames", &self.output_frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_is_duplicated() {
        assert_eq!(to_stereo(&[0.1, 0.2], 1), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn surround_keeps_front_pair() {
        let frame = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(to_stereo(&frame, 6), vec![1.0, 2.0]);
    }

    #[test]
    fn resampler_output_matches_rate_ratio() {
        let mut resampler = ChunkResampler::new(22_050, 44_100).unwrap();
        let input = vec![0.0f32; 22_050 * STREAM_CHANNELS];

        // Feed in uneven pieces like a packet-by-packet decoder would
        let mut output = Vec::new();
        for piece in input.chunks(1_152 * STREAM_CHANNELS) {
            output.extend(resampler.process(piece).unwrap());
        }
        output.extend(resampler.finish().unwrap());

        assert_eq!(output.len(), 44_100 * STREAM_CHANNELS);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let result = decode_bytes(vec![0x42; 4096], None, None);
        assert!(result.is_err());
    }
}
