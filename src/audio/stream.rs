use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::AudioError;

/// Fetches encoded track bytes from a locator (HTTP URL, `file://` URL or path)
pub struct TrackFetcher {
    client: Client,
    fetch_timeout: Duration,
}

impl TrackFetcher {
    pub fn new(fetch_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .expect("Failed to create HTTP client for track fetching");

        Self {
            client,
            fetch_timeout,
        }
    }

    /// Fetch the full body behind `locator`
    #[instrument(skip(self))]
    pub async fn fetch(&self, locator: &str) -> Result<Vec<u8>, AudioError> {
        let bytes = if is_remote(locator) {
            self.fetch_remote(locator).await?
        } else {
            let path = local_path(locator);
            debug!(path = %path.display(), "Reading local track");
            tokio::fs::read(path).await?
        };

        if bytes.is_empty() {
            return Err(AudioError::EmptySource);
        }

        debug!(bytes = bytes.len(), "Fetch complete");
        Ok(bytes)
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, AudioError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AudioError::FetchError)?;

        if !response.status().is_success() {
            return Err(AudioError::FetchHttpError(response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        debug!(content_type, "Track content type");

        let capacity = response.content_length().unwrap_or(0) as usize;
        let mut buffer = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();

        let result = timeout(self.fetch_timeout, async {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(data) => buffer.extend_from_slice(&data),
                    Err(e) => {
                        warn!(error = %e, "Track body chunk error");
                        return Err(AudioError::FetchError(e));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner?,
            Err(_) => return Err(AudioError::FetchTimeout(self.fetch_timeout)),
        }

        Ok(buffer)
    }
}

impl Default for TrackFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

pub(crate) fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

pub(crate) fn local_path(locator: &str) -> &Path {
    Path::new(locator.strip_prefix("file://").unwrap_or(locator))
}
