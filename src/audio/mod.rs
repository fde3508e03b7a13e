mod buffer;
mod decode;
mod level;
mod stream;

pub use buffer::{AudioBuffer, CHANNELS, SAMPLE_RATE};
pub use decode::AudioDecoder;
pub use level::{AudioLevel, AudioLevelAnalyzer};
pub use stream::TrackFetcher;

pub(crate) use stream::{is_remote, local_path};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::AudioError;

/// Turns a locator into decoded audio.
///
/// The engine only depends on this trait so tests can hand it synthetic
/// buffers without ffmpeg or the network.
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load(&self, locator: &str) -> Result<AudioBuffer, AudioError>;
}

/// Fetch + decode pipeline backed by ffmpeg
pub struct AudioLoader {
    fetcher: TrackFetcher,
    decoder: AudioDecoder,
}

impl AudioLoader {
    pub fn new(fetcher: TrackFetcher, decoder: AudioDecoder) -> Self {
        Self { fetcher, decoder }
    }
}

#[async_trait]
impl TrackLoader for AudioLoader {
    #[instrument(skip(self))]
    async fn load(&self, locator: &str) -> Result<AudioBuffer, AudioError> {
        let raw_bytes = self.fetcher.fetch(locator).await?;
        debug!(bytes = raw_bytes.len(), "Track fetched");

        let buffer = self.decoder.decode(&raw_bytes).await?;
        debug!(
            samples = buffer.samples.len(),
            duration_secs = buffer.duration().as_secs_f32(),
            "Track decoded"
        );

        Ok(buffer)
    }
}
