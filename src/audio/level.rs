use tracing::debug;

/// Level of a block of audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevel {
    /// Root mean square amplitude (0.0 - 1.0)
    pub rms: f32,
    /// Peak absolute amplitude (0.0 - 1.0)
    pub peak: f32,
    /// RMS mapped from [floor_db, 0] dBFS onto [0, 1]
    pub loudness: f32,
}

impl AudioLevel {
    pub const SILENT: AudioLevel = AudioLevel {
        rms: 0.0,
        peak: 0.0,
        loudness: 0.0,
    };
}

/// Computes normalized loudness from PCM frames
#[derive(Debug, Clone)]
pub struct AudioLevelAnalyzer {
    /// RMS below which a frame counts as silence
    silence_threshold: f32,
    /// dBFS value mapped to loudness 0.0
    floor_db: f32,
}

impl Default for AudioLevelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLevelAnalyzer {
    pub fn new() -> Self {
        Self {
            silence_threshold: 0.01, // -40dB
            floor_db: -60.0,
        }
    }

    /// Measure a frame of f32 samples
    pub fn analyze(&self, samples: &[f32]) -> AudioLevel {
        if samples.is_empty() {
            return AudioLevel::SILENT;
        }

        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        for &s in samples {
            sum_sq += s * s;
            peak = peak.max(s.abs());
        }
        let rms = (sum_sq / samples.len() as f32).sqrt().min(1.0);

        AudioLevel {
            rms,
            peak: peak.min(1.0),
            loudness: self.normalize(rms),
        }
    }

    /// Measure a frame of signed 16-bit little-endian PCM bytes
    pub fn analyze_pcm_s16le(&self, bytes: &[u8]) -> AudioLevel {
        let whole = bytes.len() - bytes.len() % 2;
        let bytes = &bytes[..whole];

        let aligned = if cfg!(target_endian = "little") {
            bytemuck::try_cast_slice::<u8, i16>(bytes).ok()
        } else {
            None
        };

        let samples: Vec<f32> = match aligned {
            Some(ints) => ints.iter().map(|&s| s as f32 / i16::MAX as f32).collect(),
            None => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
                .collect(),
        };

        self.analyze(&samples)
    }

    /// Whether a frame is quiet enough to skip fading it
    pub fn is_silent(&self, samples: &[f32]) -> bool {
        self.analyze(samples).rms < self.silence_threshold
    }

    /// Average loudness over windows of `window` samples
    pub fn integrated_loudness(&self, samples: &[f32], window: usize) -> f32 {
        let window = window.max(1);
        let levels: Vec<f32> = samples
            .chunks(window)
            .map(|chunk| self.analyze(chunk).loudness)
            .collect();

        if levels.is_empty() {
            return 0.0;
        }

        let loudness = levels.iter().sum::<f32>() / levels.len() as f32;
        debug!(windows = levels.len(), loudness, "Integrated loudness");
        loudness
    }

    fn normalize(&self, rms: f32) -> f32 {
        if rms <= 0.0 {
            return 0.0;
        }
        let db = 20.0 * rms.log10();
        ((db - self.floor_db) / -self.floor_db).clamp(0.0, 1.0)
    }
}
