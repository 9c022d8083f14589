//! Playback Events
//!
//! The queue never calls back into the caller. It records events while it
//! processes commands and ticks, and the caller collects them with
//! [`crate::GaplessQueue::drain_events`]:
//! - Progress (every tick, for every track that is polling)
//! - Track lifecycle (about to play next/previous, started, loaded)
//! - End of playlist
//! - Queue edits

use crate::types::{BackendMode, LoadState, Metadata, TrackId, TrackPlayback};
use serde::{Deserialize, Serialize};

/// Events emitted by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// Position update for a playing track
    Progress(ProgressSnapshot),

    /// The last track finished; the queue is now `Ended`
    PlaylistEnded(TrackInfo),

    /// The queue is about to move forward to this track
    AboutToPlayNext(TrackInfo),

    /// The queue is about to move back to this track
    AboutToPlayPrevious(TrackInfo),

    /// A track started playing from its beginning
    TrackStarted(TrackInfo),

    /// A track finished its fetch-then-decode pipeline
    TrackLoaded(TrackInfo),

    /// Tracks were added or removed
    QueueChanged {
        /// New queue length
        length: usize,
    },

    /// A non-fatal error worth surfacing
    Error {
        /// Error message
        message: String,
    },
}

/// Progress observation, one per polled track per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub index: usize,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub volume: f32,
    pub track_url: String,
    /// Backend in use
    pub backend: BackendMode,
    /// Precise prefetch state
    pub precise_state: LoadState,
}

/// Introspection snapshot of one track unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub index: usize,
    pub url: String,
    pub metadata: Metadata,
    pub backend: BackendMode,
    pub load_state: LoadState,
    pub playback: TrackPlayback,
    pub current_time: f64,
    pub duration: Option<f64>,
}

impl TrackInfo {
    pub fn is_playing(&self) -> bool {
        self.playback == TrackPlayback::Playing
    }

    /// Convenience accessor for the `title` metadata entry
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize() {
        let event = PlayerEvent::QueueChanged { length: 3 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("QueueChanged"));

        let back: PlayerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
