//! Per-guild music playback sessions: queueing, loop and shuffle policy, and
//! supervision of the voice connection that carries the audio.

pub mod audio;
pub mod bot;
pub mod config;
pub mod driver;
pub mod error;
pub mod sources;
pub mod ui;

pub use error::{PlaybackError, Result};
