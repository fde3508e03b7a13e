use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Track metadata as produced by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique name within the catalog
    pub name: String,
    /// Source locator (URL or path) at the time the track was listed
    pub locator: String,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub added_at: SystemTime,
}

impl Track {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            artist: None,
            title: None,
            added_at: SystemTime::now(),
        }
    }

    /// Human readable label for logs and events
    pub fn display_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => self.name.clone(),
        }
    }
}

/// Named, ordered list of tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub tracks: Vec<Track>,
    pub created_at: SystemTime,
    pub last_modified: SystemTime,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            tracks: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    pub fn contains(&self, track_name: &str) -> bool {
        self.tracks.iter().any(|t| t.name == track_name)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Entry in the manual play queue
#[derive(Debug, Clone)]
pub struct ManualQueueEntry {
    pub track: Track,
    pub added_at: SystemTime,
}

/// Where the engine fetches the bytes for an item from
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOrigin {
    /// Ask the catalog for a fresh locator
    Catalog,
    /// Generated artifact already on disk
    Cached(PathBuf),
}

/// A track scheduled for playback
#[derive(Debug, Clone, PartialEq)]
pub struct PlayItem {
    pub track: Track,
    pub origin: TrackOrigin,
    /// Loop seamlessly via crossfade until skipped or stopped
    pub looping: bool,
}

impl PlayItem {
    pub fn catalog(track: Track) -> Self {
        Self {
            track,
            origin: TrackOrigin::Catalog,
            looping: false,
        }
    }

    pub fn generated(key: &str, path: PathBuf) -> Self {
        let mut track = Track::new(key, path.display().to_string());
        track.title = Some(format!("{} (generated)", key));
        Self {
            track,
            origin: TrackOrigin::Cached(path),
            looping: true,
        }
    }
}

/// Player state for one session
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlayerState {
    /// Nothing bound or playing
    #[default]
    Idle,
    /// Fetching and decoding bytes
    Loading { track: Track },
    /// Resource live on the sink
    Playing { track: Track },
    /// Resource live but paused
    Paused { track: Track },
}

impl PlayerState {
    pub fn track(&self) -> Option<&Track> {
        match self {
            PlayerState::Loading { track }
            | PlayerState::Playing { track }
            | PlayerState::Paused { track } => Some(track),
            PlayerState::Idle => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlayerState::Playing { .. })
    }

    /// Get status string for display
    pub fn status_text(&self) -> &'static str {
        match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Loading { .. } => "LOADING",
            PlayerState::Playing { .. } => "PLAYING",
            PlayerState::Paused { .. } => "PAUSED",
        }
    }
}

/// Point-in-time view of a session, published on a watch channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub state: PlayerState,
    /// Volume in [0, 1]
    pub volume: f32,
    pub shuffle: bool,
    pub repeat: bool,
    pub active_playlist: Option<String>,
    pub queued: usize,
}

impl SessionSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.state.track()
    }
}
