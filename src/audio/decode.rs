use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::error::AudioError;

use super::buffer::{AudioBuffer, CHANNELS, SAMPLE_RATE};

/// Transcodes arbitrary encoded audio to PCM through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct AudioDecoder {
    ffmpeg: PathBuf,
}

impl AudioDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Check that the configured ffmpeg binary can be executed
    pub async fn probe(&self) -> Result<(), AudioError> {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|_| AudioError::FfmpegNotFound)?;
        Ok(())
    }

    /// Decode encoded bytes to 48kHz stereo f32 samples
    #[instrument(skip(self, input), fields(input_bytes = input.len()))]
    pub async fn decode(&self, input: &[u8]) -> Result<AudioBuffer, AudioError> {
        if input.is_empty() {
            return Err(AudioError::EmptySource);
        }

        let sample_rate = SAMPLE_RATE.to_string();
        let channels = CHANNELS.to_string();

        let mut child = Command::new(&self.ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "f32le",
                "-acodec",
                "pcm_f32le",
                "-ar",
                &sample_rate,
                "-ac",
                &channels,
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AudioError::FfmpegNotFound,
                _ => AudioError::FfmpegError(format!("Failed to spawn ffmpeg: {}", e)),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AudioError::FfmpegError("Failed to get stdin".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AudioError::FfmpegError("Failed to get stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AudioError::FfmpegError("Failed to get stderr".into()))?;

        // Feed stdin from its own task so a full stdout pipe cannot deadlock us
        let input_data = input.to_vec();
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input_data).await {
                error!(error = %e, "Failed to write to ffmpeg stdin");
            }
        });

        let mut pcm = Vec::new();
        let mut diagnostics = Vec::new();
        let (stdout_result, stderr_result) = tokio::join!(
            stdout.read_to_end(&mut pcm),
            stderr.read_to_end(&mut diagnostics),
        );
        stdout_result
            .map_err(|e| AudioError::FfmpegError(format!("Failed to read stdout: {}", e)))?;
        stderr_result
            .map_err(|e| AudioError::FfmpegError(format!("Failed to read stderr: {}", e)))?;

        let _ = writer.await;
        let status = child.wait().await?;

        if !status.success() {
            error!(stderr = %String::from_utf8_lossy(&diagnostics), "ffmpeg failed");
            return Err(AudioError::FfmpegFailed(status));
        }

        let samples = pcm_f32le_to_samples(&pcm);
        if samples.is_empty() {
            return Err(AudioError::DecodeError("ffmpeg produced no output".into()));
        }

        let buffer = AudioBuffer::new(samples, SAMPLE_RATE, CHANNELS);
        debug!(
            output_samples = buffer.samples.len(),
            duration_secs = buffer.duration().as_secs_f32(),
            "Decode complete"
        );
        Ok(buffer)
    }
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Reinterpret little-endian f32 PCM bytes; a trailing partial sample is dropped
fn pcm_f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    let whole = bytes.len() - bytes.len() % 4;
    let bytes = &bytes[..whole];

    if cfg!(target_endian = "little") {
        if let Ok(samples) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
            return samples.to_vec();
        }
    }

    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
