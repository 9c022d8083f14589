//! Property-based tests for the queue unit
//!
//! Random command sequences against the in-memory backend. Every sequence
//! must keep the queue's structural invariants.

use gapless_playback::testing::MockBackend;
use gapless_playback::{GaplessQueue, PlaybackConfig, PlayerEvent, QueueState, TrackSpec};
use proptest::prelude::*;

// ===== Helpers =====

#[derive(Debug, Clone)]
enum Op {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    Goto(usize, bool),
    Seek(f64),
    Volume(f32),
    Add,
    Remove(usize),
    Tick(f64),
    CompleteLoad(usize, f64),
    FailLoad(usize),
    FinishStream(usize),
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Play),
        Just(Op::Pause),
        Just(Op::Toggle),
        Just(Op::Next),
        Just(Op::Previous),
        (0usize..8, any::<bool>()).prop_map(|(i, p)| Op::Goto(i, p)),
        (-20.0f64..400.0).prop_map(Op::Seek),
        (-0.5f32..1.5).prop_map(Op::Volume),
        Just(Op::Add),
        (0usize..8).prop_map(Op::Remove),
        (0.0f64..15.0).prop_map(Op::Tick),
        (0usize..8, 1.0f64..60.0).prop_map(|(i, d)| Op::CompleteLoad(i, d)),
        (0usize..8).prop_map(Op::FailLoad),
        (0usize..8).prop_map(Op::FinishStream),
    ]
}

struct Harness {
    queue: GaplessQueue,
    backend: MockBackend,
    added: usize,
}

impl Harness {
    fn new(tracks: usize) -> Self {
        let backend = MockBackend::new();
        let urls: Vec<String> = (0..tracks).map(|i| format!("t{i}")).collect();
        for url in &urls {
            backend.set_stream_duration(url, 45.0);
        }
        let queue = GaplessQueue::new(
            PlaybackConfig::default(),
            backend.shared(),
            urls.into_iter().map(TrackSpec::new),
        );
        Self {
            queue,
            backend,
            added: tracks,
        }
    }

    fn url_at(&self, index: usize) -> Option<String> {
        self.queue.track(index).map(|t| t.url().to_string())
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Play => {
                self.queue.play().ok();
            }
            Op::Pause => self.queue.pause(),
            Op::Toggle => {
                self.queue.toggle_play_pause().ok();
            }
            Op::Next => {
                self.queue.next().ok();
            }
            Op::Previous => {
                self.queue.previous().ok();
            }
            Op::Goto(index, play) => {
                self.queue.goto(index, play).ok();
            }
            Op::Seek(secs) => {
                self.queue.seek(secs).ok();
            }
            Op::Volume(volume) => self.queue.set_volume(volume),
            Op::Add => {
                let url = format!("t{}", self.added);
                self.added += 1;
                self.backend.set_stream_duration(&url, 45.0);
                self.queue.add_track(url.as_str());
            }
            Op::Remove(index) => {
                if let Some(id) = self.queue.track(index).map(|t| t.id()) {
                    self.queue.remove_track(id).ok();
                }
            }
            Op::Tick(secs) => {
                self.backend.clock().advance(secs);
                self.queue.tick();
            }
            Op::CompleteLoad(index, secs) => {
                if let Some(url) = self.url_at(index) {
                    self.backend.complete_load(&url, secs);
                    self.queue.pump();
                }
            }
            Op::FailLoad(index) => {
                if let Some(url) = self.url_at(index) {
                    self.backend.fail_load(&url);
                    self.queue.pump();
                }
            }
            Op::FinishStream(index) => {
                if let Some(url) = self.url_at(index) {
                    self.backend.finish_stream(&url);
                }
            }
        }
    }

    fn playing_tracks(&self) -> usize {
        self.queue.tracks().iter().filter(|t| t.is_playing()).count()
    }
}

// ===== Property Tests =====

proptest! {
    /// Property: index stays in bounds and at most one track plays
    #[test]
    fn queue_invariants_hold(
        tracks in 0usize..6,
        ops in prop::collection::vec(arbitrary_op(), 1..60)
    ) {
        let mut h = Harness::new(tracks);

        for op in &ops {
            h.apply(op);

            if !h.queue.is_empty() {
                prop_assert!(h.queue.current_index() < h.queue.len(), "index out of bounds after {:?}", op);
            } else {
                prop_assert_eq!(h.queue.current_index(), 0);
            }

            prop_assert!(h.playing_tracks() <= 1, "two tracks playing after {:?}", op);
            prop_assert!(
                h.backend.playing_streams() + h.backend.active_sources() <= 1,
                "two backends audible after {:?}", op
            );

            let indices: Vec<usize> = h.queue.tracks().iter().map(|t| t.index()).collect();
            let expected: Vec<usize> = (0..h.queue.len()).collect();
            prop_assert_eq!(indices, expected);
        }
    }

    /// Property: queue state agrees with the tracks
    #[test]
    fn state_matches_tracks(
        ops in prop::collection::vec(arbitrary_op(), 1..60)
    ) {
        let mut h = Harness::new(3);

        for op in &ops {
            h.apply(op);
            if h.queue.state() == QueueState::Playing {
                prop_assert!(h.queue.current_track().is_some_and(|t| t.is_playing()), "playing queue with paused track after {:?}", op);
            } else {
                prop_assert_eq!(h.playing_tracks(), 0, "paused queue with playing track after {:?}", op);
            }
        }
    }

    /// Property: current time never leaves [0, duration]
    #[test]
    fn seek_is_clamped(
        duration in 1.0f64..300.0,
        target in -1000.0f64..1000.0,
        play in any::<bool>()
    ) {
        let mut h = Harness::new(1);
        h.queue.play().unwrap();
        h.backend.complete_load("t0", duration);
        h.queue.pump();
        if !play {
            h.queue.pause();
        }

        h.queue.seek(target).unwrap();
        let now = h.queue.current_time();
        let known = h.queue.duration().unwrap();
        prop_assert!((known - duration).abs() < 1e-2);
        prop_assert!((0.0..=known).contains(&now));
        if target <= 0.0 {
            prop_assert_eq!(now, 0.0);
        }
        if target >= known {
            prop_assert_eq!(now, known);
        }
    }

    /// Property: volume is always clamped and mirrored into every track
    #[test]
    fn volume_mirrored(volume in -10.0f32..10.0, tracks in 1usize..6) {
        let mut h = Harness::new(tracks);
        h.queue.set_volume(volume);

        let expected = volume.clamp(0.0, 1.0);
        prop_assert_eq!(h.queue.volume(), expected);
        for track in h.queue.tracks() {
            prop_assert_eq!(track.volume(), expected);
            prop_assert_eq!(track.gain().get(), expected);
        }
    }

    /// Property: goto(i, true) always lands on i and plays
    #[test]
    fn goto_plays_target(tracks in 1usize..8, picks in prop::collection::vec(0usize..8, 1..10)) {
        let mut h = Harness::new(tracks);
        for pick in picks {
            let index = pick % tracks;
            h.queue.goto(index, true).unwrap();
            prop_assert_eq!(h.queue.current_index(), index);
            prop_assert_eq!(h.queue.state(), QueueState::Playing);
        }
    }

    /// Property: the ended event fires at most once per end of queue
    #[test]
    fn playlist_ended_once(tracks in 1usize..5, extra_ticks in 1usize..5) {
        let mut h = Harness::new(tracks);
        h.queue.goto(tracks - 1, true).unwrap();
        h.backend.finish_stream(&format!("t{}", tracks - 1));
        for _ in 0..extra_ticks {
            h.backend.clock().advance(0.5);
            h.queue.tick();
        }

        let ended = h
            .queue
            .drain_events()
            .iter()
            .filter(|e| matches!(e, PlayerEvent::PlaylistEnded(_)))
            .count();
        prop_assert_eq!(ended, 1);
        prop_assert_eq!(h.queue.state(), QueueState::Ended);
    }
}
