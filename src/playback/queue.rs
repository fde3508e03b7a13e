use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, instrument};

use crate::app::{ManualQueueEntry, Playlist, Track};
use crate::error::QueueError;
use crate::library::PlaylistStore;

/// Longest accepted playlist name
const MAX_PLAYLIST_NAME: usize = 64;

/// Manual FIFO queue plus playlist sequencing for one session
pub struct QueueManager {
    store: Arc<dyn PlaylistStore>,
    scope: String,
    /// Playlists already read from the store
    playlists: HashMap<String, Playlist>,
    manual: VecDeque<ManualQueueEntry>,
    active: Option<String>,
    /// Next position in the active playlist when not shuffling
    index: usize,
    /// Tracks left in the current shuffled pass (popped from the end)
    shuffled: Vec<Track>,
    shuffle: bool,
    repeat: bool,
    rng: StdRng,
}

impl QueueManager {
    pub fn new(store: Arc<dyn PlaylistStore>, scope: impl Into<String>) -> Self {
        Self::with_rng(store, scope, StdRng::from_entropy())
    }

    /// Deterministic shuffles for tests and replays
    pub fn with_seed(store: Arc<dyn PlaylistStore>, scope: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(store, scope, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<dyn PlaylistStore>, scope: impl Into<String>, rng: StdRng) -> Self {
        Self {
            store,
            scope: scope.into(),
            playlists: HashMap::new(),
            manual: VecDeque::new(),
            active: None,
            index: 0,
            shuffled: Vec::new(),
            shuffle: false,
            repeat: false,
            rng,
        }
    }

    /// Trimmed name of 1-64 alphanumerics, spaces, `-` or `_`
    pub fn validate_name(name: &str) -> Result<String, QueueError> {
        let trimmed = name.trim();
        let valid = !trimmed.is_empty()
            && trimmed.chars().count() <= MAX_PLAYLIST_NAME
            && trimmed
                .chars()
                .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_');
        if valid {
            Ok(trimmed.to_string())
        } else {
            Err(QueueError::InvalidPlaylistName(name.to_string()))
        }
    }

    async fn load(&mut self, name: &str) -> Result<&mut Playlist, QueueError> {
        if !self.playlists.contains_key(name) {
            let playlist = self
                .store
                .get(&self.scope, name)
                .await?
                .ok_or_else(|| QueueError::PlaylistNotFound(name.to_string()))?;
            self.playlists.insert(name.to_string(), playlist);
        }
        self.playlists
            .get_mut(name)
            .ok_or_else(|| QueueError::PlaylistNotFound(name.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn create_playlist(&mut self, name: &str) -> Result<Playlist, QueueError> {
        let name = Self::validate_name(name)?;
        if self.playlists.contains_key(&name) || self.store.get(&self.scope, &name).await?.is_some()
        {
            return Err(QueueError::PlaylistExists(name));
        }

        let playlist = Playlist::new(&name);
        self.store.put(&self.scope, &playlist).await?;
        self.playlists.insert(name.clone(), playlist.clone());
        info!(playlist = %name, "Playlist created");
        Ok(playlist)
    }

    /// Append `track`, rejecting a second track with the same name
    #[instrument(skip(self, track), fields(track = %track.name))]
    pub async fn add_to_playlist(&mut self, name: &str, track: Track) -> Result<usize, QueueError> {
        let name = Self::validate_name(name)?;
        let scope = self.scope.clone();
        let store = Arc::clone(&self.store);
        let playlist = self.load(&name).await?;

        if playlist.contains(&track.name) {
            return Err(QueueError::DuplicateTrack {
                playlist: name,
                track: track.name,
            });
        }

        // Persist first so the cache never holds an unsaved mutation
        let mut updated = playlist.clone();
        updated.tracks.push(track);
        updated.last_modified = SystemTime::now();
        store.put(&scope, &updated).await?;

        let len = updated.len();
        *playlist = updated;
        debug!(playlist = %name, len, "Track added to playlist");
        Ok(len)
    }

    #[instrument(skip(self))]
    pub async fn remove_from_playlist(
        &mut self,
        name: &str,
        track_name: &str,
    ) -> Result<Track, QueueError> {
        let name = Self::validate_name(name)?;
        let scope = self.scope.clone();
        let store = Arc::clone(&self.store);
        let playlist = self.load(&name).await?;

        let Some(position) = playlist.tracks.iter().position(|t| t.name == track_name) else {
            return Err(QueueError::TrackNotInPlaylist {
                playlist: name,
                track: track_name.to_string(),
            });
        };

        let mut updated = playlist.clone();
        let removed = updated.tracks.remove(position);
        updated.last_modified = SystemTime::now();
        store.put(&scope, &updated).await?;
        *playlist = updated;

        if self.active.as_deref() == Some(name.as_str()) {
            self.shuffled.retain(|t| t.name != track_name);
        }
        debug!(playlist = %name, track = track_name, "Track removed from playlist");
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub async fn delete_playlist(&mut self, name: &str) -> Result<(), QueueError> {
        let name = Self::validate_name(name)?;
        if !self.store.delete(&self.scope, &name).await? {
            return Err(QueueError::PlaylistNotFound(name));
        }
        self.playlists.remove(&name);
        if self.active.as_deref() == Some(name.as_str()) {
            self.active = None;
            self.index = 0;
            self.shuffled.clear();
        }
        info!(playlist = %name, "Playlist deleted");
        Ok(())
    }

    pub async fn list_playlists(&self) -> Result<Vec<String>, QueueError> {
        self.store.list(&self.scope).await
    }

    pub async fn get_playlist(&mut self, name: &str) -> Result<Playlist, QueueError> {
        let name = Self::validate_name(name)?;
        Ok(self.load(&name).await?.clone())
    }

    /// Make `name` the playlist `get_next` draws from, starting at its head
    #[instrument(skip(self))]
    pub async fn activate(&mut self, name: &str) -> Result<usize, QueueError> {
        let name = Self::validate_name(name)?;
        let len = self.load(&name).await?.len();
        if len == 0 {
            return Err(QueueError::EmptyPlaylist(name));
        }

        self.active = Some(name.clone());
        self.index = 0;
        self.shuffled.clear();
        info!(playlist = %name, tracks = len, "Playlist activated");
        Ok(len)
    }

    /// Next track of the active playlist.
    ///
    /// Shuffled: a fresh permutation of the whole playlist once the previous
    /// one is used up. Ordered: cycles through the playlist.
    pub fn get_next(&mut self) -> Option<Track> {
        let name = self.active.as_ref()?;
        let playlist = self.playlists.get(name)?;
        if playlist.is_empty() {
            return None;
        }

        if self.shuffle {
            if self.shuffled.is_empty() {
                self.shuffled = playlist.tracks.clone();
                self.shuffled.shuffle(&mut self.rng);
                debug!(playlist = %name, len = self.shuffled.len(), "Rebuilt shuffle order");
            }
            return self.shuffled.pop();
        }

        let track = playlist.tracks[self.index % playlist.len()].clone();
        self.index = self.index.wrapping_add(1);
        Some(track)
    }

    /// Append to the manual queue. Returns the 1-based position.
    pub fn enqueue(&mut self, track: Track) -> usize {
        self.manual.push_back(ManualQueueEntry {
            track,
            added_at: SystemTime::now(),
        });
        self.manual.len()
    }

    pub fn dequeue(&mut self) -> Option<Track> {
        self.manual.pop_front().map(|entry| entry.track)
    }

    pub fn queue_len(&self) -> usize {
        self.manual.len()
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffled.clear();
        self.shuffle
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.repeat
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn active_playlist(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Forget the manual queue, playlist context and mode flags
    pub fn clear_context(&mut self) {
        self.manual.clear();
        self.active = None;
        self.index = 0;
        self.shuffled.clear();
        self.shuffle = false;
        self.repeat = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MemoryPlaylistStore;
    use std::collections::HashSet;

    fn track(name: &str) -> Track {
        Track::new(name, format!("file:///music/{}", name))
    }

    fn manager() -> QueueManager {
        QueueManager::with_seed(Arc::new(MemoryPlaylistStore::new()), "test", 42)
    }

    async fn manager_with(name: &str, tracks: &[&str]) -> QueueManager {
        let mut queue = manager();
        queue.create_playlist(name).await.unwrap();
        for t in tracks {
            queue.add_to_playlist(name, track(t)).await.unwrap();
        }
        queue
    }

    #[test]
    fn test_manual_queue_is_fifo() {
        let mut queue = manager();
        assert_eq!(queue.enqueue(track("a")), 1);
        assert_eq!(queue.enqueue(track("b")), 2);

        assert_eq!(queue.dequeue().unwrap().name, "a");
        assert_eq!(queue.dequeue().unwrap().name, "b");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_playlist_name_validation() {
        assert_eq!(QueueManager::validate_name("  Boss Fight_2 ").unwrap(), "Boss Fight_2");
        assert!(QueueManager::validate_name("   ").is_err());
        assert!(QueueManager::validate_name("a/b").is_err());
        assert!(QueueManager::validate_name(&"x".repeat(65)).is_err());
        assert!(QueueManager::validate_name(&"x".repeat(64)).is_ok());
    }

    #[tokio::test]
    async fn test_ordered_playlist_wraps() {
        let mut queue = manager_with("tavern", &["a", "b", "c"]).await;
        queue.activate("tavern").await.unwrap();

        let order: Vec<String> = (0..6).map(|_| queue.get_next().unwrap().name).collect();
        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_shuffle_plays_each_track_once_per_pass() {
        let names = ["a", "b", "c", "d", "e", "f", "g"];
        let mut queue = manager_with("mix", &names).await;
        queue.activate("mix").await.unwrap();
        assert!(queue.toggle_shuffle());

        for _ in 0..3 {
            let pass: HashSet<String> =
                (0..names.len()).map(|_| queue.get_next().unwrap().name).collect();
            assert_eq!(pass.len(), names.len());
        }
    }

    #[tokio::test]
    async fn test_duplicate_track_rejected() {
        let mut queue = manager_with("tavern", &["lute"]).await;
        let err = queue.add_to_playlist("tavern", track("lute")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateTrack { .. }));
        assert_eq!(queue.get_playlist("tavern").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_persists_and_touches_last_modified() {
        let store = Arc::new(MemoryPlaylistStore::new());
        let mut queue = QueueManager::with_seed(Arc::clone(&store) as Arc<dyn PlaylistStore>, "s", 1);
        let created = queue.create_playlist("calm").await.unwrap();
        queue.add_to_playlist("calm", track("rain")).await.unwrap();

        let stored = store.get("s", "calm").await.unwrap().unwrap();
        assert_eq!(stored.tracks[0].name, "rain");
        assert!(stored.last_modified >= created.last_modified);

        // A fresh manager sees the persisted playlist
        let mut other = QueueManager::new(store, "s");
        assert_eq!(other.activate("calm").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_existing_and_missing_playlists() {
        let mut queue = manager_with("tavern", &[]).await;
        assert!(matches!(
            queue.create_playlist(" tavern").await,
            Err(QueueError::PlaylistExists(_))
        ));
        assert!(matches!(
            queue.add_to_playlist("nope", track("a")).await,
            Err(QueueError::PlaylistNotFound(_))
        ));
        assert!(matches!(
            queue.activate("tavern").await,
            Err(QueueError::EmptyPlaylist(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_delete() {
        let mut queue = manager_with("tavern", &["a", "b"]).await;
        queue.activate("tavern").await.unwrap();

        assert_eq!(queue.remove_from_playlist("tavern", "a").await.unwrap().name, "a");
        assert!(matches!(
            queue.remove_from_playlist("tavern", "a").await,
            Err(QueueError::TrackNotInPlaylist { .. })
        ));
        assert_eq!(queue.get_next().unwrap().name, "b");

        queue.delete_playlist("tavern").await.unwrap();
        assert!(queue.active_playlist().is_none());
        assert!(queue.get_next().is_none());
        assert!(queue.list_playlists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_context_resets_everything() {
        let mut queue = manager_with("tavern", &["a"]).await;
        queue.activate("tavern").await.unwrap();
        queue.enqueue(track("x"));
        queue.toggle_repeat();
        queue.toggle_shuffle();

        queue.clear_context();
        assert_eq!(queue.queue_len(), 0);
        assert!(queue.active_playlist().is_none());
        assert!(!queue.is_repeat());
        assert!(!queue.is_shuffle());
        assert!(queue.get_next().is_none());
    }
}
