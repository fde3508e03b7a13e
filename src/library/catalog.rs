use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::app::Track;
use crate::error::CatalogError;

/// File extensions recognized as audio
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "opus", "m4a", "aac"];

/// One entry of a catalog listing
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub locator: String,
    pub last_modified: SystemTime,
}

impl CatalogEntry {
    pub fn to_track(&self) -> Track {
        Track::new(&self.name, &self.locator)
    }
}

/// Track/blob catalog
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// All tracks, ordered by name
    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// Locator to fetch the bytes of `name`
    async fn get(&self, name: &str) -> Result<String, CatalogError>;

    async fn delete(&self, name: &str) -> Result<(), CatalogError>;
}

/// Catalog over a local directory of audio files
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` inside the root, rejecting anything that escapes it
    fn resolve(&self, name: &str) -> Result<PathBuf, CatalogError> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_locator(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[async_trait]
impl TrackCatalog for DirectoryCatalog {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if !metadata.is_file() || !is_audio(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            entries.push(CatalogEntry {
                name: name.to_string(),
                locator: file_locator(&path),
                last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = entries.len(), root = ?self.root, "Listed catalog");
        Ok(entries)
    }

    async fn get(&self, name: &str) -> Result<String, CatalogError> {
        let path = self.resolve(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(file_locator(&path)),
            Ok(_) => Err(CatalogError::NotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name, "Deleted track");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
