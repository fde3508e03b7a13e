use std::sync::Arc;
use std::time::Duration;

/// Standard sample rate for decoded audio
pub const SAMPLE_RATE: u32 = 48_000;

/// Number of audio channels (stereo)
pub const CHANNELS: u16 = 2;

/// Decoded audio ready to be wrapped into playable resources.
///
/// Samples are shared so a looping item can build its next resource from the
/// same buffer without copying.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples (f32, normalized to -1.0 to 1.0)
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Buffer of silence lasting `duration`, at the standard format
    pub fn silence(duration: Duration) -> Self {
        let frames = (duration.as_secs_f64() * SAMPLE_RATE as f64).round() as usize;
        Self::new(vec![0.0; frames * CHANNELS as usize], SAMPLE_RATE, CHANNELS)
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert a duration to an interleaved sample count for this buffer
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        frames * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_frames() {
        let buffer = AudioBuffer::new(vec![0.0; 96_000], SAMPLE_RATE, CHANNELS);
        assert_eq!(buffer.frame_count(), 48_000);
        assert!((buffer.duration().as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_silence_matches_duration() {
        let buffer = AudioBuffer::silence(Duration::from_millis(500));
        assert_eq!(buffer.samples.len(), 48_000);
        assert_eq!(buffer.samples_for(Duration::from_millis(250)), 24_000);
    }
}
