//! # UI Module
//!
//! Plain-text rendering of playback state for the console adapter.

pub mod format;
