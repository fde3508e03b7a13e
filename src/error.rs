use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Audio processing error: {0}")]
    Audio(#[from] AudioError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Track cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Generation job API errors
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rejected generation parameters: {0}")]
    InvalidParams(String),

    #[error("Rate limited {attempts} times, giving up")]
    RateLimited { attempts: u32 },

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Circuit open after {0} consecutive transport errors")]
    CircuitOpen(u32),

    #[error("Generation job cancelled")]
    Cancelled,

    #[error("Malformed job response: {0}")]
    Malformed(String),
}

/// Errors reported by a generation job API for a single request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobApiError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Unprocessable parameters: {0}")]
    InvalidParams(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Audio fetch and decode errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Fetch HTTP error: {0}")]
    FetchHttpError(reqwest::StatusCode),

    #[error("Fetch error: {0}")]
    FetchError(#[source] reqwest::Error),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("Empty source - no audio data received")]
    EmptySource,

    #[error("ffmpeg not found - please install ffmpeg")]
    FfmpegNotFound,

    #[error("ffmpeg failed with status {0}")]
    FfmpegFailed(std::process::ExitStatus),

    #[error("ffmpeg error: {0}")]
    FfmpegError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

/// Playback errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Output transport failed: {0}")]
    Transport(String),

    #[error("Track unavailable: {0}")]
    Fetch(String),

    #[error("Not connected to an output")]
    NotConnected,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("No audio device available")]
    NoDevice,

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("Track cache is not configured")]
    NoTrackCache,
}

/// Queue and playlist validation errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid playlist name: {0:?}")]
    InvalidPlaylistName(String),

    #[error("Playlist {0:?} already exists")]
    PlaylistExists(String),

    #[error("Playlist {0:?} not found")]
    PlaylistNotFound(String),

    #[error("Track {track:?} is already in playlist {playlist:?}")]
    DuplicateTrack { playlist: String, track: String },

    #[error("Track {track:?} is not in playlist {playlist:?}")]
    TrackNotInPlaylist { playlist: String, track: String },

    #[error("Playlist {0:?} is empty")]
    EmptyPlaylist(String),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Playlist store error: {0}")]
    Store(String),
}

/// On-disk track cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Download HTTP status {0}")]
    DownloadStatus(reqwest::StatusCode),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Track catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Track {0:?} not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Driver command line errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown command {0:?}")]
    Unknown(String),

    #[error("{command} needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Invalid number {0:?}")]
    InvalidNumber(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Check if this error is recoverable (session can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Playback(PlaybackError::Transport(_)) => false,
            EngineError::Playback(PlaybackError::Device(_)) => false,
            EngineError::Playback(PlaybackError::NoDevice) => false,
            EngineError::Config(_) => false,
            _ => true,
        }
    }
}
