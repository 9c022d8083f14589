//! Threaded player driving a [`GaplessQueue`]
//!
//! The queue lives on a dedicated thread that applies commands and ticks it
//! at the configured interval. Callers get a cheap handle:
//!
//! ```text
//! DesktopPlayer ──Message──> player thread ──tick──> GaplessQueue
//!       ▲                        │
//!       └──── PlayerEvent ───────┤
//!       └──── PlayerStatus ──────┘ (published before every reply)
//! ```

use crate::backend::DesktopBackend;
use crate::config::DesktopConfig;
use crate::error::{AudioError, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use gapless_playback::{
    AudioBackend, GaplessQueue, PlaybackError, PlayerEvent, QueueState, TrackId, TrackInfo,
    TrackSpec,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Backlog past which progress events are no longer forwarded
const EVENT_CAPACITY: usize = 256;

/// Snapshot of the queue, refreshed after every command and tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub state: QueueState,
    pub index: usize,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub volume: f32,
    pub length: usize,
    pub track: Option<TrackInfo>,
}

impl PlayerStatus {
    fn capture(queue: &GaplessQueue) -> Self {
        Self {
            state: queue.state(),
            index: queue.current_index(),
            current_time: queue.current_time(),
            duration: queue.duration(),
            volume: queue.volume(),
            length: queue.len(),
            track: queue.current_track().map(|track| track.info()),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == QueueState::Playing
    }
}

#[derive(Debug)]
enum Command {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    Goto { index: usize, play: bool },
    Seek(f64),
    SetVolume(f32),
    AddTrack(TrackSpec),
    RemoveTrack(TrackId),
}

#[derive(Debug)]
enum Outcome {
    Done,
    Added(TrackId),
}

enum Message {
    Command {
        command: Command,
        reply: Sender<std::result::Result<Outcome, PlaybackError>>,
    },
    Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the player thread
pub struct DesktopPlayer {
    command_tx: Sender<Message>,
    events: Receiver<PlayerEvent>,
    status: Arc<Mutex<PlayerStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl DesktopPlayer {
    /// Player on the default output device
    pub fn new(
        config: &DesktopConfig,
        tracks: impl IntoIterator<Item = TrackSpec>,
    ) -> Result<Self> {
        let backend = DesktopBackend::new(config)?.into_shared();
        Self::with_backend(config, backend, tracks)
    }

    /// Player over any backend
    pub fn with_backend(
        config: &DesktopConfig,
        backend: Arc<dyn AudioBackend>,
        tracks: impl IntoIterator<Item = TrackSpec>,
    ) -> Result<Self> {
        let queue = GaplessQueue::new(config.playback.clone(), backend, tracks);
        let status = Arc::new(Mutex::new(PlayerStatus::capture(&queue)));

        let (command_tx, command_rx) = bounded::<Message>(32);
        let (event_tx, events) = unbounded::<PlayerEvent>();

        let worker = PlayerThread {
            queue,
            commands: command_rx,
            events: event_tx,
            status: Arc::clone(&status),
        };
        let interval = config.tick_interval();

        let thread = thread::Builder::new()
            .name("gapless-player".to_string())
            .spawn(move || worker.run(interval))?;

        tracing::info!("Player thread started");

        Ok(Self {
            command_tx,
            events,
            status,
            thread: Some(thread),
        })
    }

    fn request(&self, command: Command) -> Result<Outcome> {
        let (reply, response) = bounded(1);
        self.command_tx
            .send(Message::Command { command, reply })
            .map_err(|_| AudioError::ThreadError("player thread stopped".into()))?;

        response
            .recv()
            .map_err(|_| AudioError::ThreadError("player thread stopped".into()))?
            .map_err(AudioError::from)
    }

    fn run(&self, command: Command) -> Result<()> {
        self.request(command).map(|_| ())
    }

    pub fn play(&self) -> Result<()> {
        self.run(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.run(Command::Pause)
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        self.run(Command::TogglePlayPause)
    }

    pub fn next(&self) -> Result<()> {
        self.run(Command::Next)
    }

    pub fn previous(&self) -> Result<()> {
        self.run(Command::Previous)
    }

    pub fn goto(&self, index: usize, play: bool) -> Result<()> {
        self.run(Command::Goto { index, play })
    }

    pub fn seek(&self, secs: f64) -> Result<()> {
        self.run(Command::Seek(secs))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.run(Command::SetVolume(volume))
    }

    pub fn add_track(&self, spec: impl Into<TrackSpec>) -> Result<TrackId> {
        match self.request(Command::AddTrack(spec.into()))? {
            Outcome::Added(id) => Ok(id),
            Outcome::Done => Err(AudioError::ThreadError("unexpected reply to add_track".into())),
        }
    }

    pub fn remove_track(&self, id: TrackId) -> Result<()> {
        self.run(Command::RemoveTrack(id))
    }

    /// Latest published status
    pub fn status(&self) -> PlayerStatus {
        lock(&self.status).clone()
    }

    /// Event stream
    ///
    /// Lifecycle events are always delivered. Progress events are skipped
    /// while the backlog is full.
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    /// Take every event currently queued
    pub fn drain_events(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }
}

impl Drop for DesktopPlayer {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for DesktopPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopPlayer")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct PlayerThread {
    queue: GaplessQueue,
    commands: Receiver<Message>,
    events: Sender<PlayerEvent>,
    status: Arc<Mutex<PlayerStatus>>,
}

impl PlayerThread {
    fn run(mut self, interval: std::time::Duration) {
        let ticker = crossbeam_channel::tick(interval);
        let commands = self.commands.clone();

        loop {
            select! {
                recv(commands) -> message => match message {
                    Ok(Message::Command { command, reply }) => {
                        let outcome = self.apply(command);
                        self.publish();
                        let _ = reply.send(outcome);
                    }
                    Ok(Message::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    self.queue.tick();
                    self.publish();
                }
            }
        }

        if self.queue.is_playing() {
            self.queue.pause();
        }
        tracing::info!("Player thread stopped");
    }

    fn apply(&mut self, command: Command) -> std::result::Result<Outcome, PlaybackError> {
        tracing::debug!(?command, "Player command");

        let queue = &mut self.queue;
        match command {
            Command::Play => queue.play()?,
            Command::Pause => queue.pause(),
            Command::TogglePlayPause => queue.toggle_play_pause()?,
            Command::Next => queue.next()?,
            Command::Previous => queue.previous()?,
            Command::Goto { index, play } => queue.goto(index, play)?,
            Command::Seek(secs) => queue.seek(secs)?,
            Command::SetVolume(volume) => queue.set_volume(volume),
            Command::AddTrack(spec) => return Ok(Outcome::Added(queue.add_track(spec))),
            Command::RemoveTrack(id) => queue.remove_track(id)?,
        }
        Ok(Outcome::Done)
    }

    /// Forward queue events and refresh the shared status
    fn publish(&mut self) {
        let mut skipped = 0usize;
        for event in self.queue.drain_events() {
            if matches!(event, PlayerEvent::Progress(_)) && self.events.len() >= EVENT_CAPACITY {
                skipped += 1;
                continue;
            }
            // Only fails once the handle is gone
            let _ = self.events.send(event);
        }
        if skipped > 0 {
            tracing::trace!(skipped, "Event backlog full, skipped progress events");
        }

        *lock(&self.status) = PlayerStatus::capture(&self.queue);
    }
}
