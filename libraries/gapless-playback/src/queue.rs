//! Queue unit - orchestration of track units
//!
//! Owns the ordered track units, the current index, the global volume and the
//! queue-level state (`Paused` / `Playing` / `Ended`). Commands are applied
//! synchronously; background load completions arrive on an inbox and are
//! applied by [`GaplessQueue::pump`] or [`GaplessQueue::tick`], one at a time.

use crate::backend::{AudioBackend, LoadCompletion};
use crate::error::{PlaybackError, Result};
use crate::events::PlayerEvent;
use crate::track::{Track, TrackTick};
use crate::types::{PlaybackConfig, QueueState, TrackId, TrackSpec};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

pub struct GaplessQueue {
    config: PlaybackConfig,
    backend: Arc<dyn AudioBackend>,

    tracks: Vec<Track>,
    current: usize,
    state: QueueState,
    volume: f32,
    next_id: u64,

    inbox_tx: Sender<LoadCompletion>,
    inbox: Receiver<LoadCompletion>,

    /// Events waiting for `drain_events`
    pending_events: Vec<PlayerEvent>,
}

impl GaplessQueue {
    /// Create a queue with one track unit per entry
    pub fn new(
        config: PlaybackConfig,
        backend: Arc<dyn AudioBackend>,
        tracks: impl IntoIterator<Item = TrackSpec>,
    ) -> Self {
        let (inbox_tx, inbox) = crossbeam_channel::unbounded();
        let volume = config.volume.clamp(0.0, 1.0);

        let mut queue = Self {
            config,
            backend,
            tracks: Vec::new(),
            current: 0,
            state: QueueState::Paused,
            volume,
            next_id: 0,
            inbox_tx,
            inbox,
            pending_events: Vec::new(),
        };

        for spec in tracks {
            queue.spawn_track(spec);
        }

        tracing::debug!(tracks = queue.tracks.len(), "Queue created");
        queue
    }

    // ===== Commands =====

    /// Play the current track
    ///
    /// From `Ended`, restarts the queue at index 0.
    pub fn play(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(PlaybackError::QueueEmpty);
        }

        if self.state == QueueState::Playing && self.tracks[self.current].is_playing() {
            return Ok(());
        }

        if self.state == QueueState::Ended {
            tracing::debug!("Restarting queue from the first track");
            self.tracks[self.current].deactivate();
            self.current = 0;
            self.tracks[0].seek(0.0)?;
        }

        self.start_current()
    }

    pub fn pause(&mut self) {
        if self.state == QueueState::Ended {
            return;
        }
        if let Some(track) = self.tracks.get_mut(self.current) {
            track.pause();
        }
        self.state = QueueState::Paused;
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.state == QueueState::Playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Move to the next track
    ///
    /// On the last track this ends the queue when playing, and does nothing
    /// otherwise.
    pub fn next(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(PlaybackError::QueueEmpty);
        }

        if self.is_last() {
            if self.state == QueueState::Playing {
                self.tracks[self.current].deactivate();
                self.end_queue();
            }
            return Ok(());
        }

        let target = self.current + 1;
        self.emit(PlayerEvent::AboutToPlayNext(self.tracks[target].info()));
        self.move_to(target)
    }

    /// Restart the current track, or move to the previous one
    ///
    /// Restarts when past the restart threshold or on the first track.
    pub fn previous(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(PlaybackError::QueueEmpty);
        }

        let position = self.tracks[self.current].current_time();
        if position > self.config.restart_threshold_secs || self.current == 0 {
            self.tracks[self.current].seek(0.0)?;
            if self.state == QueueState::Ended {
                self.state = QueueState::Paused;
            }
            return Ok(());
        }

        let target = self.current - 1;
        self.emit(PlayerEvent::AboutToPlayPrevious(self.tracks[target].info()));
        self.move_to(target)
    }

    /// Jump to `index`, starting playback only if `play_immediately`
    pub fn goto(&mut self, index: usize, play_immediately: bool) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(PlaybackError::IndexOutOfBounds(index));
        }

        for track in &mut self.tracks {
            track.pause();
        }
        self.tracks[self.current].deactivate();
        self.current = index;
        self.state = QueueState::Paused;
        self.tracks[index].seek(0.0)?;

        if play_immediately {
            self.start_current()
        } else {
            Ok(())
        }
    }

    /// Seek within the current track
    pub fn seek(&mut self, secs: f64) -> Result<()> {
        let track = self
            .tracks
            .get_mut(self.current)
            .ok_or(PlaybackError::QueueEmpty)?;
        let result = track.seek(secs);
        if result.is_err() && self.state == QueueState::Playing {
            self.state = QueueState::Paused;
        }
        result
    }

    /// Set volume on every track unit
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume = volume;
        for track in &mut self.tracks {
            track.set_volume(volume);
        }
    }

    /// Append a track, returning its identity
    pub fn add_track(&mut self, spec: impl Into<TrackSpec>) -> TrackId {
        let id = self.spawn_track(spec.into());
        let index = self.tracks.len() - 1;

        // Keep the preload cascade going when appending right after a loaded current track
        if index == self.current + 1 && self.tracks[self.current].is_loaded() {
            self.tracks[index].request_load();
        }

        self.emit(PlayerEvent::QueueChanged {
            length: self.tracks.len(),
        });
        id
    }

    /// Remove a track by identity
    ///
    /// Removing the current track while playing pauses the queue.
    pub fn remove_track(&mut self, id: TrackId) -> Result<()> {
        let position = self
            .tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(PlaybackError::TrackNotFound(id))?;

        let was_current = position == self.current;
        let mut removed = self.tracks.remove(position);
        removed.teardown();

        for (index, track) in self.tracks.iter_mut().enumerate().skip(position) {
            track.set_index(index);
        }

        if self.tracks.is_empty() {
            self.current = 0;
            self.state = QueueState::Paused;
        } else {
            if position <= self.current && self.current > 0 {
                self.current -= 1;
            }
            self.current = self.current.min(self.tracks.len() - 1);
            if was_current && self.state != QueueState::Paused {
                self.state = QueueState::Paused;
            }
            // Splicing may bring an unloaded track next to a loaded current
            if self.tracks[self.current].is_loaded() {
                self.request_load(self.current + 1);
            }
        }

        tracing::debug!(track = %id, position, current = self.current, "Track removed");
        self.emit(PlayerEvent::QueueChanged {
            length: self.tracks.len(),
        });
        Ok(())
    }

    // ===== Event loop =====

    /// Apply load completions that arrived since the last call
    pub fn pump(&mut self) {
        while let Ok(completion) = self.inbox.try_recv() {
            self.on_load_completion(completion);
        }
    }

    /// One progress tick
    ///
    /// Applies pending completions, polls every armed track, preloads the
    /// next stream near the end of the current track and auto-advances.
    pub fn tick(&mut self) {
        self.pump();

        let mut near_end = false;
        let mut ended = false;

        for index in 0..self.tracks.len() {
            let Some(tick) = self.tracks[index].poll() else {
                continue;
            };
            self.emit(PlayerEvent::Progress(self.tracks[index].progress()));

            if index != self.current {
                continue;
            }
            match tick {
                TrackTick::Progress { remaining } => {
                    near_end = remaining.is_some_and(|r| r <= self.config.preload_threshold_secs);
                }
                TrackTick::Ended => ended = true,
            }
        }

        if near_end {
            if let Some(next) = self.tracks.get_mut(self.current + 1) {
                if !next.is_ready() {
                    tracing::debug!(index = next.index(), "Preloading next stream");
                    next.preload_stream();
                }
            }
        }

        if ended {
            self.on_track_ended();
        }
    }

    /// Take all events recorded since the last call
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending_events.is_empty()
    }

    // ===== Read access =====

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == QueueState::Playing
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current)
    }

    pub fn current_time(&self) -> f64 {
        self.current_track().map_or(0.0, Track::current_time)
    }

    pub fn duration(&self) -> Option<f64> {
        self.current_track().and_then(Track::duration)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    // ===== Internals =====

    fn spawn_track(&mut self, spec: TrackSpec) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;

        let track = Track::new(
            id,
            self.tracks.len(),
            spec,
            self.volume,
            self.config.disable_precise,
            Arc::clone(&self.backend),
            self.inbox_tx.clone(),
        );
        self.tracks.push(track);
        id
    }

    fn is_last(&self) -> bool {
        self.current + 1 >= self.tracks.len()
    }

    /// Activate and play the current track, entering `Playing`
    fn start_current(&mut self) -> Result<()> {
        let index = self.current;
        let track = &mut self.tracks[index];
        let from_start = track.current_time() <= 0.0;

        track.activate();
        if let Err(e) = track.play() {
            tracing::warn!(index, "Play rejected: {}", e);
            self.state = QueueState::Paused;
            self.emit(PlayerEvent::Error {
                message: e.to_string(),
            });
            return Err(e);
        }

        self.state = QueueState::Playing;
        if from_start {
            self.emit(PlayerEvent::TrackStarted(self.tracks[index].info()));
        }
        if self.tracks[index].is_loaded() {
            self.request_load(index + 1);
        }
        Ok(())
    }

    /// Manual move between tracks (next / previous)
    fn move_to(&mut self, target: usize) -> Result<()> {
        let was_playing = self.state == QueueState::Playing;

        self.tracks[self.current].deactivate();
        self.current = target;
        self.tracks[target].seek(0.0)?;

        if was_playing {
            self.start_current()
        } else {
            if self.state == QueueState::Ended {
                self.state = QueueState::Paused;
            }
            Ok(())
        }
    }

    fn on_track_ended(&mut self) {
        if self.state == QueueState::Ended {
            return;
        }

        if self.is_last() {
            self.end_queue();
            return;
        }

        let target = self.current + 1;
        tracing::debug!(from = self.current, to = target, "Auto-advancing");
        self.emit(PlayerEvent::AboutToPlayNext(self.tracks[target].info()));

        self.tracks[self.current].deactivate();
        self.current = target;
        if let Err(e) = self.tracks[target].seek(0.0) {
            tracing::warn!(index = target, "Seek before auto-advance failed: {}", e);
        }

        // Errors are already reported as events and leave the queue paused
        if self.start_current().is_ok() {
            self.request_load(target + 1);
        }
    }

    fn end_queue(&mut self) {
        self.state = QueueState::Ended;
        tracing::info!(index = self.current, "Playlist ended");
        self.emit(PlayerEvent::PlaylistEnded(self.tracks[self.current].info()));
    }

    fn on_load_completion(&mut self, completion: LoadCompletion) {
        let Some(index) = self.tracks.iter().position(|t| t.id() == completion.track) else {
            tracing::debug!(track = %completion.track, "Dropping load completion for removed track");
            return;
        };

        if self.tracks[index].on_load_finished(completion.outcome) {
            self.emit(PlayerEvent::TrackLoaded(self.tracks[index].info()));
            if index == self.current {
                self.request_load(index + 1);
            }
        }
    }

    fn request_load(&mut self, index: usize) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.request_load();
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.pending_events.push(event);
    }
}

impl std::fmt::Debug for GaplessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaplessQueue")
            .field("tracks", &self.tracks)
            .field("current", &self.current)
            .field("state", &self.state)
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}
