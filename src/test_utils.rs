//! Fakes shared by the unit tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::app::Track;
use crate::audio::{AudioBuffer, TrackLoader};
use crate::config::{EngineConfig, GenerationConfig};
use crate::error::{AudioError, CatalogError, JobApiError, PlaybackError};
use crate::generation::{GenerationJobApi, JobStatus};
use crate::library::{CatalogEntry, TrackCatalog};
use crate::playback::{OutputSink, PlayerEvent, ResourceId, ResourceSource};

/// Sample rate of synthetic test buffers, low to keep them small
pub const TEST_RATE: u32 = 8_000;

pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        default_volume: 50.0,
        crossfade: Duration::from_secs(2),
        track_fade: Duration::ZERO,
        failure_backoff: Duration::from_millis(100),
        max_consecutive_failures: 5,
        volume_ramp_tick: Duration::from_millis(10),
    }
}

pub fn test_generation_config() -> GenerationConfig {
    GenerationConfig {
        base_url: "http://jobs.test/v1".into(),
        api_token: None,
        model_variant: "stereo-large".into(),
        fallback_variant: "stereo-melody-large".into(),
        fast_poll_interval: Duration::from_secs(1),
        slow_poll_interval: Duration::from_secs(5),
        fast_poll_count: 10,
        max_poll_duration: Duration::from_secs(60),
        cache_ttl: Duration::from_secs(600),
        max_rate_limit_retries: 8,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(60),
        backoff_jitter: Duration::from_millis(100),
        circuit_breaker_threshold: 5,
        ..GenerationConfig::default()
    }
}

/// Track with a fixed timestamp so values compare equal across calls
pub fn track(name: &str) -> Track {
    let mut track = Track::new(name, format!("mem://{}", name));
    track.added_at = SystemTime::UNIX_EPOCH;
    track
}

pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// In-memory catalog whose locators are `mem://<name>`
pub struct FakeCatalog {
    tracks: Mutex<BTreeMap<String, String>>,
}

impl FakeCatalog {
    pub fn new(names: &[&str]) -> Self {
        let tracks = names
            .iter()
            .map(|n| (n.to_string(), format!("mem://{}", n)))
            .collect();
        Self {
            tracks: Mutex::new(tracks),
        }
    }
}

#[async_trait]
impl TrackCatalog for FakeCatalog {
    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        Ok(self
            .tracks
            .lock()
            .iter()
            .map(|(name, locator)| CatalogEntry {
                name: name.clone(),
                locator: locator.clone(),
                last_modified: SystemTime::UNIX_EPOCH,
            })
            .collect())
    }

    async fn get(&self, name: &str) -> Result<String, CatalogError> {
        self.tracks
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        self.tracks
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }
}

/// Loader producing constant-level buffers of a configured length
#[derive(Default)]
pub struct FakeLoader {
    durations: Mutex<HashMap<String, f32>>,
    broken: Mutex<HashSet<String>>,
    loads: AtomicUsize,
}

impl FakeLoader {
    /// Durations in seconds keyed by catalog name
    pub fn with_tracks(tracks: &[(&str, f32)]) -> Self {
        let loader = Self::default();
        for (name, secs) in tracks {
            loader.add(&format!("mem://{}", name), *secs);
        }
        loader
    }

    pub fn add(&self, locator: &str, secs: f32) {
        self.durations.lock().insert(locator.to_string(), secs);
    }

    /// Make every load of catalog track `name` fail to decode
    pub fn break_track(&self, name: &str) {
        self.broken.lock().insert(format!("mem://{}", name));
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackLoader for FakeLoader {
    async fn load(&self, locator: &str) -> Result<AudioBuffer, AudioError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().contains(locator) {
            return Err(AudioError::DecodeError(format!("corrupt stream: {}", locator)));
        }
        let secs = self
            .durations
            .lock()
            .get(locator)
            .copied()
            .ok_or(AudioError::EmptySource)?;

        let samples = (secs * TEST_RATE as f32) as usize * 2;
        Ok(AudioBuffer::new(vec![0.5; samples], TEST_RATE, 2))
    }
}

#[derive(Default)]
struct SinkState {
    sources: Vec<ResourceSource>,
    subscribed: usize,
    destroyed: bool,
    fail_next: bool,
}

/// Output sink that holds sources until a test plays them out
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

/// Test-side view of a `FakeSink` after it has been handed to the engine
#[derive(Clone)]
pub struct SinkProbe {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn new() -> (Self, SinkProbe) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SinkProbe { state },
        )
    }
}

impl OutputSink for FakeSink {
    fn subscribe(&mut self, source: ResourceSource) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(PlaybackError::NotConnected);
        }
        if std::mem::take(&mut state.fail_next) {
            return Err(PlaybackError::Transport("voice socket closed".into()));
        }
        state.subscribed += 1;
        state.sources.push(source);
        Ok(())
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.sources.clear();
        state.destroyed = true;
    }

    fn is_bound(&self) -> bool {
        !self.state.lock().destroyed
    }
}

impl SinkProbe {
    pub fn subscribed(&self) -> usize {
        self.state.lock().subscribed
    }

    pub fn destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn fail_next_subscribe(&self) {
        self.state.lock().fail_next = true;
    }

    /// Play the source of `id` to its end so it reports idle.
    /// The source must not be paused.
    pub fn finish(&self, id: ResourceId) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.sources.iter().position(|s| s.id() == id) else {
            return false;
        };
        let mut source = state.sources.remove(index);
        source.by_ref().for_each(drop);
        true
    }
}

enum FakeStatusMode {
    Succeed(String),
    Pending,
}

struct FakeJobState {
    create_script: VecDeque<Result<String, JobApiError>>,
    status_script: VecDeque<Result<JobStatus, JobApiError>>,
    create_times: Vec<Instant>,
    variants: Vec<String>,
    create_calls: usize,
    status_calls: usize,
}

/// Scriptable job API. Once a script runs dry, creates succeed with fresh
/// ids and status follows the default mode.
pub struct FakeJobApi {
    mode: FakeStatusMode,
    state: Mutex<FakeJobState>,
}

impl FakeJobApi {
    fn with_mode(mode: FakeStatusMode) -> Self {
        Self {
            mode,
            state: Mutex::new(FakeJobState {
                create_script: VecDeque::new(),
                status_script: VecDeque::new(),
                create_times: Vec::new(),
                variants: Vec::new(),
                create_calls: 0,
                status_calls: 0,
            }),
        }
    }

    /// Jobs that complete on the first poll with `output`
    pub fn succeeding(output: impl Into<String>) -> Self {
        Self::with_mode(FakeStatusMode::Succeed(output.into()))
    }

    pub fn pending_forever() -> Self {
        Self::with_mode(FakeStatusMode::Pending)
    }

    pub fn script_create(&self, responses: Vec<Result<String, JobApiError>>) {
        self.state.lock().create_script.extend(responses);
    }

    pub fn script_status(&self, responses: Vec<Result<JobStatus, JobApiError>>) {
        self.state.lock().status_script.extend(responses);
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn create_times(&self) -> Vec<Instant> {
        self.state.lock().create_times.clone()
    }

    /// Model variant of every create request, in order
    pub fn variants(&self) -> Vec<String> {
        self.state.lock().variants.clone()
    }
}

#[async_trait]
impl GenerationJobApi for FakeJobApi {
    async fn create(&self, _version: &str, input: &Value) -> Result<String, JobApiError> {
        let mut state = self.state.lock();
        state.create_calls += 1;
        state.create_times.push(Instant::now());
        if let Some(variant) = input.get("model_version").and_then(Value::as_str) {
            state.variants.push(variant.to_string());
        }

        match state.create_script.pop_front() {
            Some(response) => response,
            None => Ok(format!("job-{}", state.create_calls)),
        }
    }

    async fn status(&self, _job_id: &str) -> Result<JobStatus, JobApiError> {
        let mut state = self.state.lock();
        state.status_calls += 1;

        match state.status_script.pop_front() {
            Some(response) => response,
            None => Ok(match &self.mode {
                FakeStatusMode::Succeed(output) => JobStatus::succeeded(output.clone()),
                FakeStatusMode::Pending => JobStatus::pending(),
            }),
        }
    }
}
