//! Playback engine for queued, playlisted and generated ambience loops.

pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod library;
pub mod playback;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_utils;
