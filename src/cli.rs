use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "soundweave")]
#[command(about = "Queue, loop and generate ambience for a live audio output")]
#[command(version)]
pub struct Args {
    // Library
    /// Directory of audio files served as the track catalog
    #[arg(long)]
    pub music_dir: Option<PathBuf>,

    /// Directory holding playlist JSON files
    #[arg(long)]
    pub playlist_dir: Option<PathBuf>,

    /// Playlist scope (one JSON file per scope)
    #[arg(long, default_value = "default")]
    pub scope: String,

    /// Path to the ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Timeout for fetching track bytes (seconds)
    #[arg(long, default_value = "60")]
    pub fetch_timeout_secs: u64,

    // Playback
    /// Output device index (see --list-devices)
    #[arg(long)]
    pub device: Option<usize>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Initial volume (0-100)
    #[arg(long, default_value = "50")]
    pub volume: f32,

    /// Crossfade window for looped items (milliseconds)
    #[arg(long, default_value = "3000")]
    pub crossfade_ms: u64,

    /// Fade applied at the start and end of regular tracks (milliseconds)
    #[arg(long, default_value = "150")]
    pub track_fade_ms: u64,

    /// Pause before falling back to the next item after a failure (milliseconds)
    #[arg(long, default_value = "1000")]
    pub failure_backoff_ms: u64,

    /// Consecutive failed items before the session goes idle
    #[arg(long, default_value = "5")]
    pub max_consecutive_failures: u32,

    // Generation
    /// Base URL of the generation job API
    #[arg(long, env = "SOUNDWEAVE_API_URL", default_value = "https://api.replicate.com/v1")]
    pub api_url: String,

    /// Bearer token for the generation job API
    #[arg(long, env = "SOUNDWEAVE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Model version submitted with each job
    #[arg(
        long,
        env = "SOUNDWEAVE_MODEL_VERSION",
        default_value = "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb"
    )]
    pub model_version: String,

    /// Model variant requested for generation
    #[arg(long, default_value = "stereo-large")]
    pub model_variant: String,

    /// Known-good variant used once after the API rejects parameters
    #[arg(long, default_value = "stereo-melody-large")]
    pub fallback_variant: String,

    /// Length of generated tracks (seconds)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=300))]
    pub generate_seconds: u32,

    /// Generation result cache TTL (seconds)
    #[arg(long, default_value = "600")]
    pub cache_ttl_secs: u64,

    /// Give up on a generation job after this long (seconds)
    #[arg(long, default_value = "1200")]
    pub max_poll_secs: u64,

    /// Maximum consecutive rate-limit retries per job
    #[arg(long, default_value = "8")]
    pub max_rate_limit_retries: u32,

    // Storage
    /// Directory for generated tracks
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    // Debug
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
