//! Decoding real container payloads

mod common;

use gapless_desktop::decode::{decode_bytes, StreamDecoder};
use std::io::Cursor;
use gapless_desktop::AudioError;

#[test]
fn wav_decodes_to_interleaved_stereo() {
    common::init_tracing();
    let audio = decode_bytes(common::wav_bytes(1.0, 44_100, 2), Some("wav"), None).unwrap();

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.sample_rate, 44_100);
    assert_eq!(audio.frames(), 44_100);
    assert!((audio.duration() - 1.0).abs() < 1e-9);
    assert!(audio.samples.iter().any(|s| s.abs() > 0.1));
}

#[test]
fn non_finite_seek_is_rejected() {
    common::init_tracing();
    let bytes = Cursor::new(common::wav_bytes(1.0, 44_100, 2));
    let mut decoder = StreamDecoder::open(Box::new(bytes), Some("wav")).unwrap();

    assert!(matches!(decoder.seek(f64::INFINITY), Err(AudioError::DecodeError(_))));
    decoder.seek(0.5).unwrap();
    assert!(decoder.next_chunk().unwrap().is_some());
}

#[test]
fn mono_is_upmixed() {
    let audio = decode_bytes(common::wav_bytes(0.5, 16_000, 1), None, None).unwrap();

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.frames(), 8_000);
    for frame in audio.samples.chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }
}

#[test]
fn decoded_audio_is_resampled_to_target_rate() {
    let audio = decode_bytes(common::wav_bytes(1.0, 22_050, 2), Some("wav"), Some(48_000)).unwrap();

    assert_eq!(audio.sample_rate, 48_000);
    assert_eq!(audio.frames(), 48_000);
    assert!((audio.duration() - 1.0).abs() < 1e-3);
}

#[test]
fn same_rate_target_is_untouched() {
    let audio = decode_bytes(common::wav_bytes(0.25, 48_000, 2), Some("wav"), Some(48_000)).unwrap();
    assert_eq!(audio.frames(), 12_000);
}

#[test]
fn truncated_header_is_an_error() {
    let mut bytes = common::wav_bytes(0.1, 8_000, 1);
    bytes.truncate(20);

    let err = decode_bytes(bytes, Some("wav"), None).unwrap_err();
    assert!(
        matches!(err, AudioError::DecodeError(_) | AudioError::UnsupportedFormat(_)),
        "got {:?}",
        err
    );
}

mod properties {
    use gapless_desktop::decode::to_stereo;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn stereo_fold_keeps_frame_count(channels in 1usize..=8, frames in 0usize..256) {
            let samples = vec![0.25f32; channels * frames];
            let stereo = to_stereo(&samples, channels);
            prop_assert_eq!(stereo.len(), frames * 2);
        }
    }
}
