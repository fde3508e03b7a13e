use std::sync::Arc;
use std::time::Duration;

use rodio::Source;
use tokio::sync::mpsc::UnboundedSender;

use super::events::SessionSignal;
use super::resource::{ResourceControl, ResourceId};

/// Playable stream for one resource: buffer playback through the fade
/// filter chain and the shared gain control.
///
/// Plays the buffer exactly once. When it runs out (or is stopped) it reports
/// `SessionSignal::ResourceIdle` once.
pub struct ResourceSource {
    id: ResourceId,
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    /// Current playback position (sample index)
    position: usize,
    total_samples: usize,
    /// Number of samples in the fade-in region (0 disables)
    fade_in_samples: usize,
    /// Number of samples in the fade-out region (0 disables)
    fade_out_samples: usize,
    control: Arc<ResourceControl>,
    idle_tx: Option<UnboundedSender<SessionSignal>>,
}

impl ResourceSource {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ResourceId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        channels: u16,
        fade_in_samples: usize,
        fade_out_samples: usize,
        control: Arc<ResourceControl>,
        idle_tx: UnboundedSender<SessionSignal>,
    ) -> Self {
        let total_samples = samples.len();
        Self {
            id,
            samples,
            sample_rate,
            channels,
            position: 0,
            total_samples,
            fade_in_samples: fade_in_samples.min(total_samples / 2),
            fade_out_samples: fade_out_samples.min(total_samples / 2),
            control,
            idle_tx: Some(idle_tx),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Equal-power fade-in: sin(t * pi/2)
    fn fade_in_gain(&self, position: usize) -> f32 {
        if position >= self.fade_in_samples {
            return 1.0;
        }
        let t = position as f32 / self.fade_in_samples as f32;
        (t * std::f32::consts::FRAC_PI_2).sin()
    }

    /// Equal-power fade-out: cos(t * pi/2)
    fn fade_out_gain(&self, position: usize) -> f32 {
        if self.fade_out_samples == 0 {
            return 1.0;
        }
        let fade_start = self.total_samples - self.fade_out_samples;
        if position < fade_start {
            return 1.0;
        }
        let t = (position - fade_start) as f32 / self.fade_out_samples as f32;
        (t * std::f32::consts::FRAC_PI_2).cos()
    }

    fn finish(&mut self) {
        if let Some(tx) = self.idle_tx.take() {
            let _ = tx.send(SessionSignal::ResourceIdle(self.id));
        }
    }
}

impl Source for ResourceSource {
    fn current_frame_len(&self) -> Option<usize> {
        // Pausing yields silence without advancing, so the length is open-ended
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let frames = self.total_samples / self.channels.max(1) as usize;
        Some(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64))
    }
}

impl Iterator for ResourceSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.control.is_stopped() || self.position >= self.total_samples {
            self.finish();
            return None;
        }

        if self.control.is_paused() {
            return Some(0.0);
        }

        let sample = self.samples[self.position];
        let gain = self.fade_in_gain(self.position)
            * self.fade_out_gain(self.position)
            * self.control.gain();

        self.position += 1;
        self.control.set_position(self.position);
        Some(sample * gain)
    }
}
