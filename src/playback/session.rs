use crate::app::{PlayItem, PlayerState};

use super::events::PlayerEvent;
use super::queue::QueueManager;
use super::resource::ResourceId;

/// Why the session is looking for its next item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceCause {
    /// The live resource finished or was skipped
    Completed,
    /// The chosen item could not be played
    Failed,
}

/// What the engine should do after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    Play(PlayItem),
    /// Play the current item again (repeat)
    Replay(PlayItem),
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: NextAction,
    /// Events to publish once the transition is applied
    pub events: Vec<PlayerEvent>,
}

/// State of the one session bound to an output
#[derive(Debug)]
pub struct PlaybackSession {
    epoch: u64,
    state: PlayerState,
    current: Option<PlayItem>,
    /// Gain in [0, 1]
    volume: f32,
    live: Option<ResourceId>,
}

impl PlaybackSession {
    pub fn new(epoch: u64, volume: f32) -> Self {
        Self {
            epoch,
            state: PlayerState::Idle,
            current: None,
            volume: volume.clamp(0.0, 1.0),
            live: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn current(&self) -> Option<&PlayItem> {
        self.current.as_ref()
    }

    pub fn live(&self) -> Option<ResourceId> {
        self.live
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, PlayerState::Idle)
    }

    pub fn begin_loading(&mut self, item: &PlayItem) {
        self.state = PlayerState::Loading {
            track: item.track.clone(),
        };
        self.current = Some(item.clone());
        self.live = None;
    }

    /// Loading -> Idle on a fetch or decode failure
    pub fn fail_loading(&mut self) {
        self.state = PlayerState::Idle;
        self.current = None;
        self.live = None;
    }

    pub fn mark_playing(&mut self, item: &PlayItem, resource: ResourceId) {
        self.state = PlayerState::Playing {
            track: item.track.clone(),
        };
        self.current = Some(item.clone());
        self.live = Some(resource);
    }

    /// Hand the live slot to the incoming resource of a crossfade
    pub fn promote(&mut self, resource: ResourceId) {
        self.live = Some(resource);
    }

    pub fn clear_live(&mut self) -> Option<ResourceId> {
        self.live.take()
    }

    pub fn go_idle(&mut self) {
        self.state = PlayerState::Idle;
        self.current = None;
        self.live = None;
    }

    /// Playing -> Paused. Any other state is left alone.
    pub fn pause(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            PlayerState::Playing { track } => {
                self.state = PlayerState::Paused { track };
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Paused -> Playing. Any other state is left alone.
    pub fn resume(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            PlayerState::Paused { track } => {
                self.state = PlayerState::Playing { track };
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Choose what follows the current item.
    ///
    /// Priority: manual queue, then repeat of the current item (only after a
    /// completion), then the active playlist. With none of those the session
    /// goes idle.
    pub fn advance(&mut self, queue: &mut QueueManager, cause: AdvanceCause) -> Transition {
        if let Some(track) = queue.dequeue() {
            return Transition {
                next: NextAction::Play(PlayItem::catalog(track)),
                events: Vec::new(),
            };
        }

        if cause == AdvanceCause::Completed && queue.is_repeat() {
            if let Some(current) = &self.current {
                return Transition {
                    next: NextAction::Replay(current.clone()),
                    events: Vec::new(),
                };
            }
        }

        if let Some(track) = queue.get_next() {
            return Transition {
                next: NextAction::Play(PlayItem::catalog(track)),
                events: Vec::new(),
            };
        }

        self.go_idle();
        Transition {
            next: NextAction::Idle,
            events: vec![
                PlayerEvent::QueueEmpty,
                PlayerEvent::TrackEnded,
                PlayerEvent::StateUpdate {
                    is_playing: false,
                    current_track: None,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Track;
    use crate::library::MemoryPlaylistStore;
    use std::sync::Arc;

    fn item(name: &str) -> PlayItem {
        PlayItem::catalog(Track::new(name, format!("file:///music/{}", name)))
    }

    fn queue() -> QueueManager {
        QueueManager::with_seed(Arc::new(MemoryPlaylistStore::new()), "test", 3)
    }

    fn playing(name: &str) -> PlaybackSession {
        let mut session = PlaybackSession::new(1, 0.5);
        session.mark_playing(&item(name), ResourceId::from_raw(1));
        session
    }

    fn played(transition: &Transition) -> Option<&str> {
        match &transition.next {
            NextAction::Play(item) | NextAction::Replay(item) => Some(item.track.name.as_str()),
            NextAction::Idle => None,
        }
    }

    #[test]
    fn test_manual_queue_beats_repeat() {
        let mut queue = queue();
        queue.toggle_repeat();
        queue.enqueue(item("next").track);
        let mut session = playing("current");

        let t = session.advance(&mut queue, AdvanceCause::Completed);
        assert!(matches!(t.next, NextAction::Play(_)));
        assert_eq!(played(&t), Some("next"));
    }

    #[test]
    fn test_repeat_replays_after_completion_only() {
        let mut queue = queue();
        queue.toggle_repeat();

        let mut session = playing("loop");
        let t = session.advance(&mut queue, AdvanceCause::Completed);
        assert!(matches!(t.next, NextAction::Replay(_)));
        assert_eq!(played(&t), Some("loop"));

        let t = session.advance(&mut queue, AdvanceCause::Failed);
        assert_eq!(t.next, NextAction::Idle);
    }

    #[tokio::test]
    async fn test_playlist_follows_manual_queue() {
        let mut queue = queue();
        queue.create_playlist("mix").await.unwrap();
        queue.add_to_playlist("mix", item("p1").track).await.unwrap();
        queue.activate("mix").await.unwrap();
        queue.enqueue(item("m1").track);

        let mut session = playing("current");
        let first = session.advance(&mut queue, AdvanceCause::Completed);
        let second = session.advance(&mut queue, AdvanceCause::Completed);
        assert_eq!(played(&first), Some("m1"));
        assert_eq!(played(&second), Some("p1"));
    }

    #[test]
    fn test_exhausted_goes_idle_with_events() {
        let mut queue = queue();
        let mut session = playing("last");

        let t = session.advance(&mut queue, AdvanceCause::Completed);
        assert_eq!(t.next, NextAction::Idle);
        assert_eq!(
            t.events,
            vec![
                PlayerEvent::QueueEmpty,
                PlayerEvent::TrackEnded,
                PlayerEvent::StateUpdate {
                    is_playing: false,
                    current_track: None
                },
            ]
        );
        assert!(session.is_idle());
        assert!(session.live().is_none());
    }

    #[test]
    fn test_pause_resume_only_from_valid_states() {
        let mut session = PlaybackSession::new(1, 0.5);
        assert!(!session.pause());
        assert!(!session.resume());

        session.begin_loading(&item("a"));
        assert!(!session.pause());
        assert!(matches!(session.state(), PlayerState::Loading { .. }));

        session.mark_playing(&item("a"), ResourceId::from_raw(4));
        assert!(!session.resume());
        assert!(session.pause());
        assert!(!session.pause());
        assert!(session.resume());
        assert!(session.state().is_playing());
    }

    #[test]
    fn test_volume_clamped() {
        let mut session = PlaybackSession::new(1, 4.0);
        assert_eq!(session.volume(), 1.0);
        session.set_volume(-0.5);
        assert_eq!(session.volume(), 0.0);
    }
}
