use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cli::Args;
use crate::error::{EngineError, Result};

/// Playback engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial volume (0-100)
    pub default_volume: f32,
    /// Crossfade window for looped items
    pub crossfade: Duration,
    /// Fade at the edges of regular tracks
    pub track_fade: Duration,
    /// Pause before falling back to the next item
    pub failure_backoff: Duration,
    pub max_consecutive_failures: u32,
    /// Tick of volume ramps
    pub volume_ramp_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_volume: 50.0,
            crossfade: Duration::from_secs(3),
            track_fade: Duration::from_millis(150),
            failure_backoff: Duration::from_secs(1),
            max_consecutive_failures: 5,
            volume_ramp_tick: Duration::from_millis(20),
        }
    }
}

/// Generation job API and polling settings
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub model_version: String,
    pub model_variant: String,
    pub fallback_variant: String,
    pub duration_secs: u32,
    pub output_format: String,
    pub cache_ttl: Duration,
    pub fast_poll_interval: Duration,
    pub slow_poll_interval: Duration,
    /// Polls at the fast interval before slowing down
    pub fast_poll_count: u32,
    pub max_poll_duration: Duration,
    pub max_rate_limit_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of random jitter added to each backoff
    pub backoff_jitter: Duration,
    /// Consecutive transport errors before a job is abandoned
    pub circuit_breaker_threshold: u32,
    pub request_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.replicate.com/v1".into(),
            api_token: None,
            model_version: "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb"
                .into(),
            model_variant: "stereo-large".into(),
            fallback_variant: "stereo-melody-large".into(),
            duration_secs: 30,
            output_format: "mp3".into(),
            cache_ttl: Duration::from_secs(600),
            fast_poll_interval: Duration::from_secs(1),
            slow_poll_interval: Duration::from_secs(5),
            fast_poll_count: 10,
            max_poll_duration: Duration::from_secs(1200),
            max_rate_limit_retries: 8,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_jitter: Duration::from_millis(500),
            circuit_breaker_threshold: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// On-disk track cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Period of the generation cache sweeper
    pub sweep_interval: Duration,
}

/// Catalog and playlist storage settings
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub music_dir: PathBuf,
    pub playlist_dir: PathBuf,
    pub scope: String,
    pub ffmpeg: PathBuf,
    pub fetch_timeout: Duration,
}

/// Validated runtime configuration, built once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub library: LibraryConfig,
    pub device: Option<usize>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundweave")
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let engine = EngineConfig {
            default_volume: args.volume,
            crossfade: Duration::from_millis(args.crossfade_ms),
            track_fade: Duration::from_millis(args.track_fade_ms),
            failure_backoff: Duration::from_millis(args.failure_backoff_ms),
            max_consecutive_failures: args.max_consecutive_failures,
            ..EngineConfig::default()
        };

        let generation = GenerationConfig {
            base_url: args.api_url.trim_end_matches('/').to_string(),
            api_token: args.api_token.clone(),
            model_version: args.model_version.clone(),
            model_variant: args.model_variant.clone(),
            fallback_variant: args.fallback_variant.clone(),
            duration_secs: args.generate_seconds,
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
            max_poll_duration: Duration::from_secs(args.max_poll_secs),
            max_rate_limit_retries: args.max_rate_limit_retries,
            ..GenerationConfig::default()
        };

        let cache = CacheConfig {
            dir: args.cache_dir.clone().unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("soundweave")
                    .join("tracks")
            }),
            sweep_interval: Duration::from_secs(60),
        };

        let library = LibraryConfig {
            music_dir: args
                .music_dir
                .clone()
                .unwrap_or_else(|| data_dir().join("music")),
            playlist_dir: args
                .playlist_dir
                .clone()
                .unwrap_or_else(|| data_dir().join("playlists")),
            scope: args.scope.clone(),
            ffmpeg: args.ffmpeg.clone(),
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
        };

        let config = Self {
            engine,
            generation,
            cache,
            library,
            device: args.device,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with and create missing directories
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if !(0.0..=100.0).contains(&e.default_volume) {
            return Err(invalid(format!(
                "volume must be within 0-100, got {}",
                e.default_volume
            )));
        }
        if e.crossfade > Duration::from_secs(30) {
            return Err(invalid("crossfade must not exceed 30s".into()));
        }
        if e.max_consecutive_failures == 0 {
            return Err(invalid("max consecutive failures must be at least 1".into()));
        }

        let g = &self.generation;
        if g.fast_poll_interval.is_zero() || g.slow_poll_interval.is_zero() {
            return Err(invalid("poll intervals must be non-zero".into()));
        }
        if g.max_poll_duration.is_zero() {
            return Err(invalid("max poll duration must be non-zero".into()));
        }
        if g.cache_ttl.is_zero() {
            return Err(invalid("cache TTL must be non-zero".into()));
        }
        if g.initial_backoff > g.max_backoff {
            return Err(invalid("initial backoff exceeds max backoff".into()));
        }
        if g.base_url.is_empty() {
            return Err(invalid("API base URL is empty".into()));
        }
        if g.api_token.is_none() {
            warn!("No API token configured, generation requests will be rejected");
        }

        let scope = self.library.scope.trim();
        if scope.is_empty()
            || !scope
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(format!("invalid playlist scope {:?}", scope)));
        }

        for dir in [
            &self.cache.dir,
            &self.library.music_dir,
            &self.library.playlist_dir,
        ] {
            ensure_dir(dir)?;
        }

        debug!(
            cache_dir = ?self.cache.dir,
            music_dir = ?self.library.music_dir,
            "Configuration validated"
        );
        Ok(())
    }
}

fn invalid(msg: String) -> EngineError {
    EngineError::Config(msg)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| invalid(format!("cannot create {}: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args_in(dir: &Path, extra: &[&str]) -> Args {
        let mut argv = vec![
            "soundweave".to_string(),
            "--music-dir".into(),
            dir.join("music").display().to_string(),
            "--playlist-dir".into(),
            dir.join("playlists").display().to_string(),
            "--cache-dir".into(),
            dir.join("cache").display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_args(&args_in(dir.path(), &[])).unwrap();

        assert_eq!(config.engine.max_consecutive_failures, 5);
        assert_eq!(config.generation.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.generation.max_poll_duration, Duration::from_secs(1200));
        assert_eq!(config.generation.fast_poll_count, 10);
        assert_eq!(config.generation.circuit_breaker_threshold, 5);
        assert!(dir.path().join("cache").is_dir());
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_args(&args_in(dir.path(), &["--volume", "150"]));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_bad_scope_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_args(&args_in(dir.path(), &["--scope", "../etc"]));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_trailing_slash_trimmed_from_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_args(&args_in(
            dir.path(),
            &["--api-url", "http://localhost:8080/v1/"],
        ))
        .unwrap();
        assert_eq!(config.generation.base_url, "http://localhost:8080/v1");
    }
}
