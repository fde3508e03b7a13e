use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::events::SessionSignal;
use super::resource::ResourceId;

struct PendingCrossfade {
    resource: ResourceId,
    handle: JoinHandle<()>,
}

/// Times the overlap between the live resource of a looping item and the
/// resource that replaces it.
///
/// At most one timer is pending; scheduling always cancels the previous one.
pub struct CrossfadeScheduler {
    fade: Duration,
    pending: Option<PendingCrossfade>,
    /// Incoming resource built for the current crossfade window
    armed: Option<ResourceId>,
}

impl CrossfadeScheduler {
    pub fn new(fade: Duration) -> Self {
        Self {
            fade,
            pending: None,
            armed: None,
        }
    }

    /// Fade window for an item of `duration` (never more than half of it)
    pub fn fade_for(&self, duration: Duration) -> Duration {
        self.fade.min(duration / 2)
    }

    /// Time from now until the crossfade point of an item that has already
    /// rendered `elapsed` of its `duration`
    pub fn delay_for(&self, duration: Duration, elapsed: Duration) -> Duration {
        duration
            .saturating_sub(self.fade_for(duration))
            .saturating_sub(elapsed)
    }

    /// Arm a timer that reports `CrossfadeDue` for `resource` after `delay`
    pub fn schedule(
        &mut self,
        resource: ResourceId,
        delay: Duration,
        signals: &UnboundedSender<SessionSignal>,
    ) {
        self.cancel();

        let tx = signals.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SessionSignal::CrossfadeDue { resource });
        });

        debug!(%resource, delay_ms = delay.as_millis() as u64, "Crossfade scheduled");
        self.pending = Some(PendingCrossfade {
            resource,
            handle,
        });
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                trace!(resource = %pending.resource, "Crossfade timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Accept a `CrossfadeDue` signal. Stale signals (cancelled or superseded
    /// timers) return false.
    pub fn take_due(&mut self, resource: ResourceId) -> bool {
        match &self.pending {
            Some(pending) if pending.resource == resource => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn arm(&mut self, incoming: ResourceId) {
        self.armed = Some(incoming);
    }

    pub fn armed(&self) -> Option<ResourceId> {
        self.armed
    }

    pub fn take_armed(&mut self) -> Option<ResourceId> {
        self.armed.take()
    }

    /// Cancel the timer and forget any armed resource
    pub fn reset(&mut self) {
        self.cancel();
        self.armed = None;
    }
}

impl Drop for CrossfadeScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
