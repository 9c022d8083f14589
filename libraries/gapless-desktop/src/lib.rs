//! Gapless - Desktop Backend
//!
//! Native implementation of the `gapless-playback` backend traits:
//! - HTTP streaming: tracks start while they download ([`HttpStream`])
//! - Fetch-then-decode into memory with symphonia, resampled with rubato to
//!   the output rate ([`HttpLoader`])
//! - Frame-counting software mixer as the sample-accurate context
//!   ([`Mixer`]), rendered by a cpal output stream ([`CpalContext`])
//! - A threaded player with layered configuration ([`DesktopPlayer`],
//!   [`DesktopConfig`])
//!
//! # Example
//!
//! ```rust,no_run
//! use gapless_desktop::{DesktopConfig, DesktopPlayer};
//! use gapless_playback::TrackSpec;
//!
//! let config = DesktopConfig::load()?;
//! let player = DesktopPlayer::new(
//!     &config,
//!     vec![
//!         TrackSpec::new("https://example.com/one.flac"),
//!         TrackSpec::new("https://example.com/two.flac"),
//!     ],
//! )?;
//!
//! player.play()?;
//! for event in player.events() {
//!     println!("{:?}", event);
//! }
//! # Ok::<(), gapless_desktop::AudioError>(())
//! ```

pub mod backend;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod mixer;
pub mod output;
pub mod player;
pub mod progressive;
pub mod stream;

pub use backend::DesktopBackend;
pub use config::{DesktopConfig, HttpSettings, OutputSettings};
pub use error::{AudioError, Result};
pub use loader::HttpLoader;
pub use mixer::{Mixer, StreamVoice};
pub use output::{CpalContext, OutputTarget};
pub use player::{DesktopPlayer, PlayerStatus};
pub use stream::HttpStream;
