use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::audio::{AudioBuffer, AudioLevelAnalyzer};
use crate::error::PlaybackError;

use super::events::SessionSignal;
use super::source::ResourceSource;

/// Identifier of one playable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// Controls shared between the engine and the audio thread
#[derive(Debug)]
pub struct ResourceControl {
    gain_bits: AtomicU32,
    paused: AtomicBool,
    stopped: AtomicBool,
    position: AtomicUsize,
}

impl ResourceControl {
    pub fn new(gain: f32) -> Self {
        Self {
            gain_bits: AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            position: AtomicUsize::new(0),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Samples consumed by the output so far
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    pub(crate) fn set_position(&self, position: usize) {
        self.position.store(position, Ordering::Relaxed);
    }
}

/// Engine-side handle of a live resource
#[derive(Debug)]
pub struct AudioResource {
    id: ResourceId,
    control: Arc<ResourceControl>,
    duration: Duration,
    sample_rate: u32,
    channels: u16,
    created_at: Instant,
    loudness: f32,
}

impl AudioResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn control(&self) -> &Arc<ResourceControl> {
        &self.control
    }

    pub fn gain(&self) -> f32 {
        self.control.gain()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Integrated loudness of the underlying buffer (0.0 - 1.0)
    pub fn loudness(&self) -> f32 {
        self.loudness
    }

    /// Playback time actually rendered by the output
    pub fn elapsed(&self) -> Duration {
        let frames = self.control.position() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn stop(&self) {
        self.control.stop();
    }
}

/// Fade and gain settings for a new resource
#[derive(Debug, Clone, Copy)]
pub struct ResourceOptions {
    pub gain: f32,
    pub fade_in: Duration,
    pub fade_out: Duration,
}

/// Wraps decoded buffers into playable, gain-controllable resources
pub struct ResourceFactory {
    next_id: AtomicU64,
    analyzer: AudioLevelAnalyzer,
    idle_tx: UnboundedSender<SessionSignal>,
}

impl ResourceFactory {
    pub fn new(idle_tx: UnboundedSender<SessionSignal>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            analyzer: AudioLevelAnalyzer::new(),
            idle_tx,
        }
    }

    /// Build a resource handle plus the stream to hand to the output sink.
    ///
    /// Fades over a region that is already silent are dropped.
    pub fn create(
        &self,
        buffer: &AudioBuffer,
        options: ResourceOptions,
    ) -> Result<(AudioResource, ResourceSource), PlaybackError> {
        if buffer.is_empty() || buffer.sample_rate == 0 || buffer.channels == 0 {
            return Err(PlaybackError::ResourceCreation(
                "cannot build a resource from an empty buffer".into(),
            ));
        }

        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let total = buffer.samples.len();

        let mut fade_in = buffer.samples_for(options.fade_in).min(total / 2);
        let mut fade_out = buffer.samples_for(options.fade_out).min(total / 2);
        if fade_in > 0 && self.analyzer.is_silent(&buffer.samples[..fade_in]) {
            trace!(%id, "Head is silent, skipping fade-in");
            fade_in = 0;
        }
        if fade_out > 0 && self.analyzer.is_silent(&buffer.samples[total - fade_out..]) {
            trace!(%id, "Tail is silent, skipping fade-out");
            fade_out = 0;
        }

        let window = (buffer.sample_rate as usize / 10) * buffer.channels as usize;
        let loudness = self.analyzer.integrated_loudness(&buffer.samples, window);

        let control = Arc::new(ResourceControl::new(options.gain));
        let source = ResourceSource::new(
            id,
            Arc::clone(&buffer.samples),
            buffer.sample_rate,
            buffer.channels,
            fade_in,
            fade_out,
            Arc::clone(&control),
            self.idle_tx.clone(),
        );

        debug!(
            %id,
            gain = options.gain,
            fade_in_samples = fade_in,
            fade_out_samples = fade_out,
            loudness,
            "Resource created"
        );

        let resource = AudioResource {
            id,
            control,
            duration: buffer.duration(),
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
            created_at: Instant::now(),
            loudness,
        };

        Ok((resource, source))
    }
}

/// Set of resources currently owned by the engine
#[derive(Debug, Default)]
pub struct ActiveResources {
    resources: BTreeMap<ResourceId, AudioResource>,
}

impl ActiveResources {
    pub fn insert(&mut self, resource: AudioResource) {
        self.resources.insert(resource.id(), resource);
    }

    pub fn remove(&mut self, id: ResourceId) -> Option<AudioResource> {
        self.resources.remove(&id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&AudioResource> {
        self.resources.get(&id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioResource> {
        self.resources.values()
    }

    pub fn controls(&self) -> Vec<Arc<ResourceControl>> {
        self.resources
            .values()
            .map(|r| Arc::clone(r.control()))
            .collect()
    }

    pub fn pause_all(&self) {
        self.resources.values().for_each(|r| r.control().pause());
    }

    pub fn resume_all(&self) {
        self.resources.values().for_each(|r| r.control().resume());
    }

    /// Stop every resource and forget it
    pub fn stop_all(&mut self) -> usize {
        let count = self.resources.len();
        for (_, resource) in std::mem::take(&mut self.resources) {
            resource.stop();
        }
        count
    }
}

/// Animate every control linearly from its current gain to `target` over `ramp`
pub fn spawn_gain_ramp(
    controls: Vec<Arc<ResourceControl>>,
    target: f32,
    ramp: Duration,
    tick: Duration,
) -> JoinHandle<()> {
    let target = target.clamp(0.0, 1.0);
    let tick = tick.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let starts: Vec<f32> = controls.iter().map(|c| c.gain()).collect();
        let begin = Instant::now();
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let t = (begin.elapsed().as_secs_f32() / ramp.as_secs_f32()).min(1.0);
            for (control, start) in controls.iter().zip(&starts) {
                control.set_gain(start + (target - start) * t);
            }
            if t >= 1.0 {
                break;
            }
        }
        trace!(target, "Gain ramp complete");
    })
}
