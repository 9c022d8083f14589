//! Fetch-then-decode pipeline end to end

mod common;

use gapless_desktop::loader::fetch_and_decode;
use gapless_desktop::{HttpLoader, HttpSettings};
use gapless_playback::{LoadCompletion, LoadError, LoadReply, TrackId};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn completion(rx: crossbeam_channel::Receiver<LoadCompletion>) -> LoadCompletion {
    tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .expect("load did not complete")
}

#[tokio::test(flavor = "multi_thread")]
async fn load_delivers_decoded_track_to_reply() {
    common::init_tracing();
    let server = MockServer::start().await;
    common::serve_wav(&server, "/a.wav", common::wav_bytes(0.5, 44_100, 2)).await;

    let loader = HttpLoader::with_handle(tokio::runtime::Handle::current(), &HttpSettings::default())
        .unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    loader.load(&format!("{}/a.wav", server.uri()), LoadReply::new(TrackId(7), tx));

    let done = completion(rx).await;
    assert_eq!(done.track, TrackId(7));

    let loaded = done.outcome.unwrap();
    assert_eq!(loaded.audio.sample_rate, 44_100);
    assert_eq!(loaded.audio.frames(), 22_050);
    assert_eq!(loaded.resolved_url, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn load_resamples_to_the_output_rate() {
    let server = MockServer::start().await;
    common::serve_wav(&server, "/a.wav", common::wav_bytes(0.5, 44_100, 2)).await;

    let loader = HttpLoader::with_handle(tokio::runtime::Handle::current(), &HttpSettings::default())
        .unwrap()
        .with_target_rate(Arc::new(|| Some(48_000)));
    let (tx, rx) = crossbeam_channel::unbounded();
    loader.load(&format!("{}/a.wav", server.uri()), LoadReply::new(TrackId(1), tx));

    let loaded = completion(rx).await.outcome.unwrap();
    assert_eq!(loaded.audio.sample_rate, 48_000);
    assert_eq!(loaded.audio.frames(), 24_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_reports_an_error() {
    let server = MockServer::start().await;
    Mock::given(path("/missing.wav"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let loader = HttpLoader::with_handle(tokio::runtime::Handle::current(), &HttpSettings::default())
        .unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    loader.load(&format!("{}/missing.wav", server.uri()), LoadReply::new(TrackId(2), tx));

    let done = completion(rx).await;
    assert!(matches!(done.outcome, Err(LoadError::Status { status: 500, .. })));
}

#[tokio::test]
async fn redirected_load_reports_resolved_url() {
    let server = MockServer::start().await;
    let target = format!("{}/files/a.wav", server.uri());
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", target.as_str()))
        .mount(&server)
        .await;
    common::serve_wav(&server, "/files/a.wav", common::wav_bytes(0.1, 8_000, 1)).await;

    let client = gapless_desktop::fetch::build_client(&HttpSettings::default()).unwrap();
    let loaded = fetch_and_decode(&client, &format!("{}/a", server.uri()), true, None)
        .await
        .unwrap();

    assert_eq!(loaded.resolved_url, Some(target));
    assert_eq!(loaded.audio.frames(), 800);
}

#[tokio::test]
async fn undecodable_payload_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(path("/noise.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x42u8; 4096]))
        .mount(&server)
        .await;

    let client = gapless_desktop::fetch::build_client(&HttpSettings::default()).unwrap();
    let err = fetch_and_decode(&client, &format!("{}/noise.bin", server.uri()), false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Decode(_)), "got {:?}", err);
}
