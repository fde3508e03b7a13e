use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use crate::audio::{is_remote, local_path};
use crate::error::{CacheError, GenerationError};
use crate::generation::{GenerationJobClient, GenerationParams};

use super::atomic::write_atomic;

/// Longest accepted mood key
const MAX_KEY_LEN: usize = 48;

/// A generated track resolved to a file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub key: String,
    pub path: PathBuf,
    /// Produced by a new generation job rather than read from disk
    pub regenerated: bool,
    /// The job API rate limited us while producing it
    pub rate_limited: bool,
}

/// On-disk cache of generated tracks, keyed by mood
pub struct TrackCache {
    dir: PathBuf,
    extension: String,
    client: Arc<GenerationJobClient>,
    http: Client,
}

impl TrackCache {
    pub fn new(dir: impl Into<PathBuf>, client: Arc<GenerationJobClient>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(path = ?dir, error = %e, "Failed to create track cache directory");
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client for artifact downloads");
        let extension = client.config().output_format.clone();

        debug!(path = ?dir, "Initialized track cache");
        Self {
            dir,
            extension,
            client,
            http,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are lowercase ASCII letters, digits, `_` and `-`
    pub fn validate_key(key: &str) -> Result<(), CacheError> {
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidKey(key.to_string()))
        }
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        Self::validate_key(key)?;
        Ok(self.dir.join(format!("{}.{}", key, self.extension)))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Return the cached track for `key`, generating it when missing or forced
    #[instrument(skip(self))]
    pub async fn get_or_generate(
        &self,
        key: &str,
        force_regen: bool,
    ) -> Result<CachedArtifact, CacheError> {
        let path = self.path_for(key)?;

        if !force_regen && tokio::fs::try_exists(&path).await? {
            debug!(key, "Track cache hit");
            return Ok(CachedArtifact {
                key: key.to_string(),
                path,
                regenerated: false,
                rate_limited: false,
            });
        }

        if force_regen {
            self.client.cache().invalidate(key);
        }

        info!(key, force_regen, "Generating track");
        let params = GenerationParams::for_mood(key, self.client.config());
        let outcome = self.client.submit(key, &params).await?;

        let bytes = self.download(&outcome.locator).await?;
        if bytes.is_empty() {
            return Err(GenerationError::Malformed("empty artifact".into()).into());
        }
        let len = bytes.len();
        write_atomic(&path, bytes)
            .await
            .map_err(|source| CacheError::Write {
                path: path.clone(),
                source,
            })?;

        info!(key, bytes = len, path = %path.display(), "Track cached");
        Ok(CachedArtifact {
            key: key.to_string(),
            path,
            regenerated: true,
            rate_limited: outcome.rate_limited,
        })
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>, CacheError> {
        if !is_remote(locator) {
            return Ok(tokio::fs::read(local_path(locator)).await?);
        }

        let response = self.http.get(locator).send().await?;
        if !response.status().is_success() {
            return Err(CacheError::DownloadStatus(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Delete the cached track. Returns whether one existed.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Removed cached track");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys with a cached track, sorted
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if Self::validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
