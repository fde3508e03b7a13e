use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::app::Playlist;
use crate::error::QueueError;

use super::atomic::write_atomic;

/// Persistence for playlists, partitioned by scope
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    async fn get(&self, scope: &str, name: &str) -> Result<Option<Playlist>, QueueError>;

    /// Insert or replace
    async fn put(&self, scope: &str, playlist: &Playlist) -> Result<(), QueueError>;

    /// Returns whether a playlist was removed
    async fn delete(&self, scope: &str, name: &str) -> Result<bool, QueueError>;

    /// Playlist names in the scope, sorted
    async fn list(&self, scope: &str) -> Result<Vec<String>, QueueError>;
}

/// In-memory store, used for ephemeral sessions and tests
#[derive(Default)]
pub struct MemoryPlaylistStore {
    scopes: RwLock<HashMap<String, BTreeMap<String, Playlist>>>,
}

impl MemoryPlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlaylistStore for MemoryPlaylistStore {
    async fn get(&self, scope: &str, name: &str) -> Result<Option<Playlist>, QueueError> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .and_then(|playlists| playlists.get(name))
            .cloned())
    }

    async fn put(&self, scope: &str, playlist: &Playlist) -> Result<(), QueueError> {
        self.scopes
            .write()
            .entry(scope.to_string())
            .or_default()
            .insert(playlist.name.clone(), playlist.clone());
        Ok(())
    }

    async fn delete(&self, scope: &str, name: &str) -> Result<bool, QueueError> {
        Ok(self
            .scopes
            .write()
            .get_mut(scope)
            .map(|playlists| playlists.remove(name).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>, QueueError> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .map(|playlists| playlists.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// One JSON file per scope holding every playlist of that scope
pub struct JsonPlaylistStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonPlaylistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn scope_path(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("{}.json", scope))
    }

    async fn load(&self, scope: &str) -> Result<BTreeMap<String, Playlist>, QueueError> {
        let path = self.scope_path(scope);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| QueueError::Store(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(store_error(&path, e)),
        }
    }

    /// Write via a temp file and rename so readers never see a partial file
    async fn save(
        &self,
        scope: &str,
        playlists: &BTreeMap<String, Playlist>,
    ) -> Result<(), QueueError> {
        let path = self.scope_path(scope);
        let json = serde_json::to_vec_pretty(playlists)
            .map_err(|e| QueueError::Store(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;
        write_atomic(&path, json)
            .await
            .map_err(|e| store_error(&path, e))?;

        debug!(scope, count = playlists.len(), "Saved playlists");
        Ok(())
    }
}

fn store_error(path: &Path, e: std::io::Error) -> QueueError {
    QueueError::Store(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl PlaylistStore for JsonPlaylistStore {
    async fn get(&self, scope: &str, name: &str) -> Result<Option<Playlist>, QueueError> {
        Ok(self.load(scope).await?.remove(name))
    }

    #[instrument(skip(self, playlist), fields(playlist = %playlist.name))]
    async fn put(&self, scope: &str, playlist: &Playlist) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut playlists = self.load(scope).await?;
        playlists.insert(playlist.name.clone(), playlist.clone());
        self.save(scope, &playlists).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, scope: &str, name: &str) -> Result<bool, QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut playlists = self.load(scope).await?;
        if playlists.remove(name).is_none() {
            return Ok(false);
        }
        self.save(scope, &playlists).await?;
        Ok(true)
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>, QueueError> {
        Ok(self.load(scope).await?.into_keys().collect())
    }
}
