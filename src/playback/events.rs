use crate::app::Track;
use crate::error::CacheError;
use crate::library::CachedArtifact;

use super::resource::ResourceId;

/// Lifecycle events published to collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStarted(Track),
    TrackEnded,
    QueueEmpty,
    TrackChanged(Track),
    StateUpdate {
        is_playing: bool,
        current_track: Option<Track>,
    },
    ShuffleToggled(bool),
    RepeatToggled(bool),
    PlayerError(String),
}

impl PlayerEvent {
    /// Short wire name used by the daemon's event lines
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::TrackStarted(_) => "track_started",
            PlayerEvent::TrackEnded => "track_ended",
            PlayerEvent::QueueEmpty => "queue_empty",
            PlayerEvent::TrackChanged(_) => "track_changed",
            PlayerEvent::StateUpdate { .. } => "state",
            PlayerEvent::ShuffleToggled(_) => "shuffle",
            PlayerEvent::RepeatToggled(_) => "repeat",
            PlayerEvent::PlayerError(_) => "error",
        }
    }
}

/// Internal notifications that re-enter the session loop
#[derive(Debug)]
pub enum SessionSignal {
    /// A resource finished (exhausted or stopped) on the output
    ResourceIdle(ResourceId),
    /// The loop crossfade point of `resource` has been reached
    CrossfadeDue { resource: ResourceId },
    /// The failure backoff elapsed; fall back past `failures` failed items
    RetryDue { token: u64, failures: u32 },
    /// A background generation finished for the session with `epoch`
    Generated {
        epoch: u64,
        key: String,
        result: Result<CachedArtifact, CacheError>,
    },
}
