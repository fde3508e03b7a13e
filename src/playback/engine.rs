use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};

use crate::app::{PlayItem, SessionSnapshot, Track, TrackOrigin};
use crate::audio::{AudioBuffer, TrackLoader};
use crate::config::EngineConfig;
use crate::error::{CacheError, CatalogError, EngineError, PlaybackError, Result};
use crate::library::{CachedArtifact, CatalogEntry, TrackCache, TrackCatalog};

use super::crossfade::CrossfadeScheduler;
use super::events::{PlayerEvent, SessionSignal};
use super::queue::QueueManager;
use super::resource::{
    spawn_gain_ramp, ActiveResources, AudioResource, ResourceFactory, ResourceId, ResourceOptions,
};
use super::session::{AdvanceCause, NextAction, PlaybackSession};
use super::sink::OutputSink;

/// Receiving ends handed to whoever drives the engine
pub struct EngineHandles {
    pub events: mpsc::UnboundedReceiver<PlayerEvent>,
    pub signals: mpsc::UnboundedReceiver<SessionSignal>,
    pub state: watch::Receiver<SessionSnapshot>,
}

/// Backoff timer between a failed item and the fallback to the next one
struct PendingRetry {
    token: u64,
    handle: JoinHandle<()>,
}

/// Owns the output binding, the live resources and the session state
pub struct PlaybackEngine {
    config: EngineConfig,
    catalog: Arc<dyn TrackCatalog>,
    loader: Arc<dyn TrackLoader>,
    track_cache: Option<Arc<TrackCache>>,
    factory: ResourceFactory,
    queue: QueueManager,
    sink: Option<Box<dyn OutputSink>>,
    session: Option<PlaybackSession>,
    next_epoch: u64,
    active: ActiveResources,
    crossfade: CrossfadeScheduler,
    /// Decoded buffer of the looping item, reused for each crossfade
    loop_buffer: Option<AudioBuffer>,
    volume_ramp: Option<JoinHandle<()>>,
    retry: Option<PendingRetry>,
    next_retry: u64,
    /// Gain for future resources and sessions, in [0, 1]
    volume: f32,
    events_tx: mpsc::UnboundedSender<PlayerEvent>,
    signals_tx: mpsc::UnboundedSender<SessionSignal>,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl PlaybackEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn TrackCatalog>,
        loader: Arc<dyn TrackLoader>,
        queue: QueueManager,
    ) -> (Self, EngineHandles) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionSnapshot::default());

        let volume = (config.default_volume / 100.0).clamp(0.0, 1.0);
        let engine = Self {
            crossfade: CrossfadeScheduler::new(config.crossfade),
            factory: ResourceFactory::new(signals_tx.clone()),
            config,
            catalog,
            loader,
            track_cache: None,
            queue,
            sink: None,
            session: None,
            next_epoch: 0,
            active: ActiveResources::default(),
            loop_buffer: None,
            volume_ramp: None,
            retry: None,
            next_retry: 0,
            volume,
            events_tx,
            signals_tx,
            state_tx,
        };

        (
            engine,
            EngineHandles {
                events,
                signals,
                state,
            },
        )
    }

    pub fn with_track_cache(mut self, cache: Arc<TrackCache>) -> Self {
        self.track_cache = Some(cache);
        self
    }

    fn emit(&self, event: PlayerEvent) {
        trace!(event = event.name(), "Emitting event");
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    fn require_session(&self) -> Result<&PlaybackSession> {
        self.session
            .as_ref()
            .ok_or_else(|| PlaybackError::NotConnected.into())
    }

    fn session_mut(&mut self) -> Result<&mut PlaybackSession> {
        self.session
            .as_mut()
            .ok_or_else(|| PlaybackError::NotConnected.into())
    }

    /// Bind to `sink`, tearing down any previous binding and its session.
    /// Returns the new session epoch.
    #[instrument(skip(self, sink))]
    pub fn join(&mut self, sink: Box<dyn OutputSink>) -> u64 {
        if self.sink.is_some() || self.session.is_some() {
            self.teardown();
        }

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.session = Some(PlaybackSession::new(epoch, self.volume));
        self.sink = Some(sink);

        info!(epoch, "Session joined");
        self.publish();
        epoch
    }

    /// Play a catalog track now, replacing whatever is live.
    ///
    /// A track that cannot be fetched or decoded is reported as a
    /// `PlayerError` and playback falls back to the next item.
    #[instrument(skip(self, track), fields(track = %track.name))]
    pub async fn play(&mut self, track: Track) -> Result<()> {
        self.play_item(PlayItem::catalog(track)).await
    }

    /// Play a catalog track looped via crossfade
    #[instrument(skip(self, track), fields(track = %track.name))]
    pub async fn play_loop(&mut self, track: Track) -> Result<()> {
        let mut item = PlayItem::catalog(track);
        item.looping = true;
        self.play_item(item).await
    }

    async fn play_item(&mut self, item: PlayItem) -> Result<()> {
        self.require_session()?;
        match self.start_item(&item).await {
            Ok(()) => Ok(()),
            Err(e) if !e.is_recoverable() => Err(e),
            Err(e) => {
                self.report_error(&e);
                self.recover(1);
                Ok(())
            }
        }
    }

    /// Resolve `key` through the track cache in the background and loop the
    /// result once it arrives
    #[instrument(skip(self))]
    pub fn play_generated(&mut self, key: &str, force_regen: bool) -> Result<()> {
        let epoch = self.require_session()?.epoch();
        let cache = self
            .track_cache
            .clone()
            .ok_or(PlaybackError::NoTrackCache)?;
        TrackCache::validate_key(key)?;

        info!(key, force_regen, epoch, "Resolving generated track");
        let tx = self.signals_tx.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let result = cache.get_or_generate(&key, force_regen).await;
            let _ = tx.send(SessionSignal::Generated { epoch, key, result });
        });
        Ok(())
    }

    /// Append to the manual queue, starting it when nothing is playing.
    /// Returns the queue position.
    #[instrument(skip(self, track), fields(track = %track.name))]
    pub async fn enqueue(&mut self, track: Track) -> Result<usize> {
        self.require_session()?;
        let position = self.queue.enqueue(track);
        debug!(position, "Track queued");

        if self.is_idle() {
            self.advance(AdvanceCause::Completed).await?;
        }
        self.publish();
        Ok(position)
    }

    /// Sequence from a stored playlist, starting it when nothing is playing
    #[instrument(skip(self))]
    pub async fn load_playlist(&mut self, name: &str) -> Result<usize> {
        self.require_session()?;
        let len = self.queue.activate(name).await?;

        if self.is_idle() {
            self.advance(AdvanceCause::Completed).await?;
        }
        self.publish();
        Ok(len)
    }

    /// Playing -> Paused; false in any other state
    pub fn pause(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.pause() {
            return false;
        }
        let current = session.current().map(|item| item.track.clone());

        self.active.pause_all();
        self.crossfade.cancel();
        info!("Playback paused");

        self.emit(PlayerEvent::StateUpdate {
            is_playing: false,
            current_track: current,
        });
        self.publish();
        true
    }

    /// Paused -> Playing; false in any other state
    pub fn resume(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.resume() {
            return false;
        }
        let current = session.current().cloned();
        let live = session.live();

        self.active.resume_all();

        // The crossfade point moved by however long we were paused
        let looping = current.as_ref().map(|item| item.looping).unwrap_or(false);
        if looping && self.crossfade.armed().is_none() {
            if let Some(resource) = live.and_then(|id| self.active.get(id)) {
                let delay = self
                    .crossfade
                    .delay_for(resource.duration(), resource.elapsed());
                let id = resource.id();
                self.crossfade.schedule(id, delay, &self.signals_tx);
            }
        }
        info!("Playback resumed");

        self.emit(PlayerEvent::StateUpdate {
            is_playing: true,
            current_track: current.map(|item| item.track),
        });
        self.publish();
        true
    }

    /// Stop the live resource and let completion handling pick what's next.
    /// Returns false when nothing is live.
    #[instrument(skip(self))]
    pub async fn skip(&mut self) -> Result<bool> {
        let Some(live) = self.session.as_ref().and_then(|s| s.live()) else {
            return Ok(false);
        };

        self.crossfade.cancel();
        if let Some(armed) = self.crossfade.take_armed() {
            if let Some(resource) = self.active.remove(armed) {
                resource.stop();
            }
        }
        if let Some(resource) = self.active.get(live) {
            resource.stop();
        }

        info!(resource = %live, "Skipping");
        self.on_resource_idle(live).await?;
        Ok(true)
    }

    /// Tear the session down: queue, timers, resources and sink.
    /// A pending failure backoff is cancelled, not waited out.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        self.teardown();
    }

    pub fn leave(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let had_session = self.session.is_some();

        self.crossfade.reset();
        self.cancel_retry();
        if let Some(ramp) = self.volume_ramp.take() {
            ramp.abort();
        }
        let stopped = self.active.stop_all();
        self.loop_buffer = None;
        self.queue.clear_context();
        if let Some(mut sink) = self.sink.take() {
            sink.destroy();
        }
        self.session = None;

        info!(stopped, "Session torn down");
        if had_session {
            self.emit(PlayerEvent::TrackEnded);
            self.emit(PlayerEvent::StateUpdate {
                is_playing: false,
                current_track: None,
            });
        }
        self.publish();
    }

    /// Set the volume (0-100), ramping live resources over `ramp`.
    /// Returns the applied level.
    pub fn set_volume(&mut self, level: f32, ramp: Duration) -> f32 {
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 100.0)
        };
        let gain = level / 100.0;

        self.volume = gain;
        if let Some(session) = self.session.as_mut() {
            session.set_volume(gain);
        }
        if let Some(previous) = self.volume_ramp.take() {
            previous.abort();
        }

        let controls = self.active.controls();
        if ramp.is_zero() || controls.is_empty() {
            controls.iter().for_each(|c| c.set_gain(gain));
        } else {
            self.volume_ramp = Some(spawn_gain_ramp(
                controls,
                gain,
                ramp,
                self.config.volume_ramp_tick,
            ));
        }

        debug!(level, ramp_ms = ramp.as_millis() as u64, "Volume set");
        self.publish();
        level
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = self.queue.toggle_shuffle();
        info!(enabled, "Shuffle toggled");
        self.emit(PlayerEvent::ShuffleToggled(enabled));
        self.publish();
        enabled
    }

    pub fn toggle_repeat(&mut self) -> bool {
        let enabled = self.queue.toggle_repeat();
        info!(enabled, "Repeat toggled");
        self.emit(PlayerEvent::RepeatToggled(enabled));
        self.publish();
        enabled
    }

    /// Look a track up in the catalog by name
    pub async fn find_track(&self, name: &str) -> Result<Track> {
        self.catalog
            .list()
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.to_track())
            .ok_or_else(|| CatalogError::NotFound(name.to_string()).into())
    }

    pub async fn list_tracks(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog.list().await?)
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut QueueManager {
        &mut self.queue
    }

    /// Dispatch a signal from the session loop
    pub async fn handle_signal(&mut self, signal: SessionSignal) -> Result<()> {
        match signal {
            SessionSignal::ResourceIdle(id) => self.on_resource_idle(id).await,
            SessionSignal::CrossfadeDue { resource } => self.on_crossfade_due(resource),
            SessionSignal::RetryDue { token, failures } => {
                self.on_retry_due(token, failures).await
            }
            SessionSignal::Generated { epoch, key, result } => {
                self.on_generated(epoch, key, result).await
            }
        }
    }

    async fn on_resource_idle(&mut self, id: ResourceId) -> Result<()> {
        if self.active.remove(id).is_none() {
            trace!(resource = %id, "Ignoring idle from retired resource");
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if session.live() != Some(id) {
            // An incoming crossfade resource that ended before promotion
            if self.crossfade.armed() == Some(id) {
                self.crossfade.take_armed();
            }
            return Ok(());
        }

        if let Some(incoming) = self.crossfade.take_armed() {
            if let Some(resource) = self.active.get(incoming) {
                session.promote(incoming);
                let delay = self
                    .crossfade
                    .delay_for(resource.duration(), resource.elapsed());
                self.crossfade.schedule(incoming, delay, &self.signals_tx);
                debug!(outgoing = %id, live = %incoming, "Loop crossfade complete");
                return Ok(());
            }
        }

        session.clear_live();
        self.crossfade.cancel();
        self.loop_buffer = None;
        debug!(resource = %id, "Resource finished");
        self.advance(AdvanceCause::Completed).await
    }

    /// Build the incoming resource for the next loop pass
    fn on_crossfade_due(&mut self, resource: ResourceId) -> Result<()> {
        if !self.crossfade.take_due(resource) {
            trace!(%resource, "Ignoring stale crossfade timer");
            return Ok(());
        }
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        if session.live() != Some(resource) || !session.state().is_playing() {
            return Ok(());
        }
        let Some(buffer) = self.loop_buffer.as_ref() else {
            return Ok(());
        };

        let fade = self.crossfade.fade_for(buffer.duration());
        let (incoming, source) = self.factory.create(
            buffer,
            ResourceOptions {
                gain: session.volume(),
                fade_in: fade,
                fade_out: fade,
            },
        )?;
        let sink = self.sink.as_mut().ok_or(PlaybackError::NotConnected)?;
        sink.subscribe(source)?;

        debug!(outgoing = %resource, incoming = %incoming.id(), fade_ms = fade.as_millis() as u64, "Crossfade started");
        self.crossfade.arm(incoming.id());
        self.active.insert(incoming);
        Ok(())
    }

    async fn on_generated(
        &mut self,
        epoch: u64,
        key: String,
        result: std::result::Result<CachedArtifact, CacheError>,
    ) -> Result<()> {
        let current = self.session.as_ref().map(|s| s.epoch());
        if current != Some(epoch) {
            debug!(key, epoch, ?current, "Discarding stale generation result");
            return Ok(());
        }

        match result {
            Ok(artifact) => {
                if artifact.rate_limited {
                    info!(key, "Generation was rate limited but succeeded");
                }
                self.play_item(PlayItem::generated(&key, artifact.path)).await
            }
            Err(e) => {
                self.report_error(&e.into());
                Ok(())
            }
        }
    }

    /// Run completion handling
    async fn advance(&mut self, cause: AdvanceCause) -> Result<()> {
        self.advance_from(cause, 0).await
    }

    /// Fall back after `failures` consecutive failed items, once the backoff
    /// timer fires
    fn recover(&mut self, failures: u32) {
        if failures >= self.config.max_consecutive_failures {
            self.give_up(failures);
            return;
        }

        self.cancel_retry();
        self.next_retry += 1;
        let token = self.next_retry;
        let delay = self.config.failure_backoff;
        let tx = self.signals_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SessionSignal::RetryDue { token, failures });
        });

        debug!(failures, delay_ms = delay.as_millis() as u64, "Fallback scheduled");
        self.retry = Some(PendingRetry { token, handle });
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.handle.abort();
            debug!("Fallback cancelled");
        }
    }

    async fn on_retry_due(&mut self, token: u64, failures: u32) -> Result<()> {
        match &self.retry {
            Some(retry) if retry.token == token => self.retry = None,
            _ => {
                trace!(token, "Ignoring stale fallback timer");
                return Ok(());
            }
        }
        self.advance_from(AdvanceCause::Failed, failures).await
    }

    async fn advance_from(&mut self, cause: AdvanceCause, failures: u32) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let transition = session.advance(&mut self.queue, cause);

        let item = match transition.next {
            NextAction::Idle => {
                info!("Nothing left to play");
                for event in transition.events {
                    self.emit(event);
                }
                self.publish();
                return Ok(());
            }
            NextAction::Play(item) | NextAction::Replay(item) => item,
        };

        match self.start_item(&item).await {
            Ok(()) => Ok(()),
            Err(e) if !e.is_recoverable() => Err(e),
            Err(e) => {
                self.report_error(&e);
                self.recover(failures + 1);
                Ok(())
            }
        }
    }

    fn give_up(&mut self, failures: u32) {
        warn!(failures, "Too many consecutive failures, going idle");
        if let Some(session) = self.session.as_mut() {
            session.go_idle();
        }
        self.emit(PlayerEvent::QueueEmpty);
        self.emit(PlayerEvent::TrackEnded);
        self.emit(PlayerEvent::StateUpdate {
            is_playing: false,
            current_track: None,
        });
        self.publish();
    }

    /// Stop whatever is live without completion handling
    fn retire_live(&mut self) {
        self.crossfade.reset();
        self.cancel_retry();
        self.loop_buffer = None;
        if let Some(session) = self.session.as_mut() {
            session.clear_live();
        }
        let retired = self.active.stop_all();
        if retired > 0 {
            debug!(retired, "Retired live resources");
        }
    }

    async fn load_item(&self, item: &PlayItem) -> Result<AudioBuffer> {
        let locator = match &item.origin {
            TrackOrigin::Catalog => self.catalog.get(&item.track.name).await?,
            TrackOrigin::Cached(path) => path.display().to_string(),
        };
        Ok(self.loader.load(&locator).await?)
    }

    /// Loading -> Playing for `item`, or Loading -> Idle on failure
    async fn start_item(&mut self, item: &PlayItem) -> Result<()> {
        self.retire_live();
        self.session_mut()?.begin_loading(item);
        self.publish();
        info!(track = %item.track.name, looping = item.looping, "Loading track");

        let result = self.bind_item(item).await;
        let session = self.session_mut()?;
        match result {
            Ok(id) => {
                session.mark_playing(item, id);
                info!(track = %item.track.display_name(), resource = %id, "Playback started");
            }
            Err(e) => {
                session.fail_loading();
                self.publish();
                return Err(e);
            }
        }

        let track = item.track.clone();
        self.emit(PlayerEvent::TrackStarted(track.clone()));
        self.emit(PlayerEvent::TrackChanged(track.clone()));
        self.emit(PlayerEvent::StateUpdate {
            is_playing: true,
            current_track: Some(track),
        });
        self.publish();
        Ok(())
    }

    /// Fetch, decode and subscribe `item`, arming the loop crossfade
    async fn bind_item(&mut self, item: &PlayItem) -> Result<ResourceId> {
        let buffer = self.load_item(item).await?;
        let gain = self.require_session()?.volume();

        let options = if item.looping {
            ResourceOptions {
                gain,
                fade_in: self.config.track_fade,
                fade_out: self.crossfade.fade_for(buffer.duration()),
            }
        } else {
            ResourceOptions {
                gain,
                fade_in: self.config.track_fade,
                fade_out: self.config.track_fade,
            }
        };

        let (resource, source) = self.factory.create(&buffer, options)?;
        let id = resource.id();
        let duration = resource.duration();
        let sink = self.sink.as_mut().ok_or(PlaybackError::NotConnected)?;
        sink.subscribe(source)?;
        self.active.insert(resource);

        if item.looping {
            let delay = self.crossfade.delay_for(duration, Duration::ZERO);
            self.crossfade.schedule(id, delay, &self.signals_tx);
            self.loop_buffer = Some(buffer);
        }
        Ok(id)
    }

    /// Log an error and publish it as a `PlayerError` event
    pub fn report_error(&self, error: &EngineError) {
        warn!(error = %error, "Player error");
        self.emit(PlayerEvent::PlayerError(error.to_string()));
    }

    pub fn is_idle(&self) -> bool {
        self.session.as_ref().map(|s| s.is_idle()).unwrap_or(true)
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    pub fn epoch(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.epoch())
    }

    pub fn live_resource(&self) -> Option<ResourceId> {
        self.session.as_ref().and_then(|s| s.live())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.sink.as_ref().map(|s| s.is_bound()).unwrap_or(false),
            state: self
                .session
                .as_ref()
                .map(|s| s.state().clone())
                .unwrap_or_default(),
            volume: self.session.as_ref().map(|s| s.volume()).unwrap_or(self.volume),
            shuffle: self.queue.is_shuffle(),
            repeat: self.queue.is_repeat(),
            active_playlist: self.queue.active_playlist().map(str::to_string),
            queued: self.queue.queue_len(),
        }
    }

    pub fn active_resources(&self) -> usize {
        self.active.len()
    }

    pub fn resources(&self) -> impl Iterator<Item = &AudioResource> {
        self.active.iter()
    }

    /// Crossfade, volume ramp and fallback timers still outstanding
    pub fn pending_timers(&self) -> usize {
        let ramp = self
            .volume_ramp
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        usize::from(self.crossfade.is_pending())
            + usize::from(ramp)
            + usize::from(self.retry.is_some())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        debug!("Dropping playback engine");
        self.cancel_retry();
        if let Some(ramp) = self.volume_ramp.take() {
            ramp.abort();
        }
        self.active.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::PlayerState;
    use crate::library::MemoryPlaylistStore;
    use crate::test_utils::{
        drain_events, test_engine_config, track, FakeCatalog, FakeLoader, FakeSink, SinkProbe,
    };
    use tokio::time::Instant;

    struct Harness {
        engine: PlaybackEngine,
        handles: EngineHandles,
        probe: SinkProbe,
        loader: Arc<FakeLoader>,
    }

    impl Harness {
        fn events(&mut self) -> Vec<PlayerEvent> {
            drain_events(&mut self.handles.events)
        }

        fn live(&self) -> ResourceId {
            self.engine.live_resource().expect("a live resource")
        }

        fn current(&self) -> Option<String> {
            self.engine
                .snapshot()
                .current_track()
                .map(|t| t.name.clone())
        }

        /// Play the live resource to its end and feed the idle signal back
        async fn finish_live(&mut self) {
            let id = self.live();
            self.finish(id).await;
        }

        async fn finish(&mut self, id: ResourceId) {
            assert!(self.probe.finish(id), "resource {} not subscribed", id);
            self.pump().await;
        }

        /// Deliver every queued signal to the engine
        async fn pump(&mut self) {
            while let Ok(signal) = self.handles.signals.try_recv() {
                self.engine.handle_signal(signal).await.unwrap();
            }
        }

        /// Wait for the next signal (letting timers run) and deliver it
        async fn next_signal(&mut self) {
            let signal = self.handles.signals.recv().await.expect("signal channel open");
            self.engine.handle_signal(signal).await.unwrap();
        }
    }

    fn harness(tracks: &[(&str, f32)]) -> Harness {
        harness_with(test_engine_config(), tracks)
    }

    fn harness_with(config: EngineConfig, tracks: &[(&str, f32)]) -> Harness {
        let names: Vec<&str> = tracks.iter().map(|(n, _)| *n).collect();
        let catalog = Arc::new(FakeCatalog::new(&names));
        let loader = Arc::new(FakeLoader::with_tracks(tracks));
        let queue = QueueManager::with_seed(Arc::new(MemoryPlaylistStore::new()), "test", 11);

        let (mut engine, handles) = PlaybackEngine::new(
            config,
            catalog,
            Arc::clone(&loader) as Arc<dyn TrackLoader>,
            queue,
        );
        let (sink, probe) = FakeSink::new();
        engine.join(Box::new(sink));

        Harness {
            engine,
            handles,
            probe,
            loader,
        }
    }

    #[tokio::test]
    async fn test_requires_join() {
        let catalog = Arc::new(FakeCatalog::new(&["a"]));
        let loader = Arc::new(FakeLoader::with_tracks(&[("a", 1.0)]));
        let queue = QueueManager::new(Arc::new(MemoryPlaylistStore::new()), "test");
        let (mut engine, _handles) = PlaybackEngine::new(test_engine_config(), catalog, loader, queue);

        let result = engine.play(track("a")).await;
        assert!(matches!(
            result,
            Err(EngineError::Playback(PlaybackError::NotConnected))
        ));
        assert!(!engine.pause());
    }

    #[tokio::test]
    async fn test_play_emits_lifecycle_events() {
        let mut h = harness(&[("a", 2.0)]);
        h.events();

        h.engine.play(track("a")).await.unwrap();

        assert_eq!(
            h.events(),
            vec![
                PlayerEvent::TrackStarted(track("a")),
                PlayerEvent::TrackChanged(track("a")),
                PlayerEvent::StateUpdate {
                    is_playing: true,
                    current_track: Some(track("a")),
                },
            ]
        );
        assert_eq!(h.engine.active_resources(), 1);
        assert_eq!(h.probe.subscribed(), 1);
        assert!(h.handles.state.borrow().is_playing());
    }

    #[tokio::test]
    async fn test_playing_new_item_retires_current_silently() {
        let mut h = harness(&[("a", 2.0), ("b", 2.0)]);
        h.engine.play(track("a")).await.unwrap();
        let first = h.live();

        h.engine.play(track("b")).await.unwrap();
        assert_eq!(h.current().as_deref(), Some("b"));
        assert_eq!(h.engine.active_resources(), 1);

        // The retired resource's idle signal must not trigger completion
        h.finish(first).await;
        h.events();
        assert_eq!(h.current().as_deref(), Some("b"));
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn test_manual_queue_plays_in_order() {
        let mut h = harness(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        h.engine.play(track("a")).await.unwrap();
        assert_eq!(h.engine.enqueue(track("b")).await.unwrap(), 1);
        assert_eq!(h.engine.enqueue(track("c")).await.unwrap(), 2);

        h.finish_live().await;
        assert_eq!(h.current().as_deref(), Some("b"));
        h.finish_live().await;
        assert_eq!(h.current().as_deref(), Some("c"));
        h.events();

        h.finish_live().await;
        let events = h.events();
        assert!(events.contains(&PlayerEvent::QueueEmpty));
        assert!(events.contains(&PlayerEvent::TrackEnded));
        assert!(h.engine.is_idle());
        assert_eq!(h.engine.active_resources(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_while_idle_starts_playback() {
        let mut h = harness(&[("a", 1.0)]);
        h.engine.enqueue(track("a")).await.unwrap();
        assert_eq!(h.current().as_deref(), Some("a"));
        assert_eq!(h.engine.queue().queue_len(), 0);
    }

    #[tokio::test]
    async fn test_repeat_replays_current_track() {
        let mut h = harness(&[("a", 1.0)]);
        h.engine.play(track("a")).await.unwrap();
        assert!(h.engine.toggle_repeat());

        for _ in 0..3 {
            let before = h.live();
            h.finish_live().await;
            assert_eq!(h.current().as_deref(), Some("a"));
            assert_ne!(h.live(), before);
        }

        assert!(!h.engine.toggle_repeat());
        h.finish_live().await;
        assert!(h.engine.is_idle());
    }

    #[tokio::test]
    async fn test_playlist_sequence_wraps() {
        let mut h = harness(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let queue = h.engine.queue_mut();
        queue.create_playlist("tavern").await.unwrap();
        for name in ["a", "b", "c"] {
            queue.add_to_playlist("tavern", track(name)).await.unwrap();
        }

        assert_eq!(h.engine.load_playlist("tavern").await.unwrap(), 3);
        let mut order = vec![h.current().unwrap()];
        for _ in 0..5 {
            h.finish_live().await;
            order.push(h.current().unwrap());
        }
        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_track_falls_back_to_next() {
        let mut h = harness(&[("broken", 1.0), ("good", 1.0)]);
        h.loader.break_track("broken");
        h.engine.queue_mut().enqueue(track("good"));
        h.events();

        let start = Instant::now();
        h.engine.play(track("broken")).await.unwrap();
        assert!(matches!(h.events().first(), Some(PlayerEvent::PlayerError(_))));
        assert!(h.engine.is_idle());
        assert_eq!(h.engine.pending_timers(), 1);

        h.next_signal().await;

        let events = h.events();
        assert!(events.contains(&PlayerEvent::TrackStarted(track("good"))));
        assert_eq!(h.current().as_deref(), Some("good"));
        assert!(start.elapsed() >= test_engine_config().failure_backoff);
        assert_eq!(h.engine.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_fallback() {
        let mut h = harness(&[("broken", 1.0), ("good", 1.0)]);
        h.loader.break_track("broken");
        h.engine.queue_mut().enqueue(track("good"));

        let start = Instant::now();
        h.engine.play(track("broken")).await.unwrap();
        h.engine.stop();

        // Returns without waiting out the backoff
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(h.engine.pending_timers(), 0);

        tokio::time::sleep(test_engine_config().failure_backoff * 3).await;
        h.pump().await;
        assert!(!h.engine.is_joined());
        assert_eq!(h.loader.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_item_supersedes_pending_fallback() {
        let mut h = harness(&[("broken", 1.0), ("good", 1.0), ("other", 1.0)]);
        h.loader.break_track("broken");
        h.engine.queue_mut().enqueue(track("other"));

        h.engine.play(track("broken")).await.unwrap();
        h.engine.play(track("good")).await.unwrap();
        assert_eq!(h.engine.pending_timers(), 0);

        tokio::time::sleep(test_engine_config().failure_backoff * 3).await;
        h.pump().await;
        assert_eq!(h.current().as_deref(), Some("good"));
        assert_eq!(h.engine.queue().queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_broken_playlist_gives_up() {
        let mut h = harness(&[("x", 1.0), ("y", 1.0), ("z", 1.0)]);
        for name in ["x", "y", "z"] {
            h.loader.break_track(name);
        }
        let queue = h.engine.queue_mut();
        queue.create_playlist("cursed").await.unwrap();
        for name in ["x", "y", "z"] {
            queue.add_to_playlist("cursed", track(name)).await.unwrap();
        }
        h.events();

        h.engine.load_playlist("cursed").await.unwrap();
        while h.engine.pending_timers() > 0 {
            h.next_signal().await;
        }

        let events = h.events();
        let errors = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::PlayerError(_)))
            .count();
        assert_eq!(errors, 5);
        assert!(events.contains(&PlayerEvent::QueueEmpty));
        assert!(events.contains(&PlayerEvent::TrackEnded));
        assert!(h.engine.is_idle());
        assert_eq!(h.loader.loads(), 5);
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let mut h = harness(&[("a", 1.0)]);
        h.probe.fail_next_subscribe();

        let err = h.engine.play(track("a")).await.unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(h.engine.active_resources(), 0);
        assert!(matches!(h.engine.snapshot().state, PlayerState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_no_resources_or_timers() {
        let mut h = harness(&[("a", 10.0)]);
        h.engine.play_loop(track("a")).await.unwrap();
        h.engine.enqueue(track("a")).await.unwrap();
        h.engine.set_volume(80.0, Duration::from_secs(2));
        assert_eq!(h.engine.pending_timers(), 2);
        h.events();

        h.engine.stop();

        assert_eq!(h.engine.active_resources(), 0);
        assert_eq!(h.engine.pending_timers(), 0);
        assert!(h.probe.destroyed());
        assert!(!h.engine.is_joined());
        assert_eq!(h.engine.queue().queue_len(), 0);
        assert!(h.events().contains(&PlayerEvent::TrackEnded));
        assert!(!h.handles.state.borrow().connected);

        // Nothing fires later
        tokio::time::sleep(Duration::from_secs(20)).await;
        h.pump().await;
        assert_eq!(h.engine.active_resources(), 0);
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let mut h = harness(&[("a", 1.0)]);
        h.engine.play(track("a")).await.unwrap();
        let live = h.live();
        let gain = |h: &Harness| {
            h.engine
                .resources()
                .find(|r| r.id() == live)
                .map(|r| r.gain())
                .unwrap()
        };

        for (input, applied) in [(150.0, 100.0), (-5.0, 0.0), (37.0, 37.0), (f32::NAN, 0.0)] {
            let level = h.engine.set_volume(input, Duration::ZERO);
            assert_eq!(level, applied);
            assert!((gain(&h) - applied / 100.0).abs() < 1e-6);
        }
        assert!((h.engine.snapshot().volume - 0.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_ramp_animates_gain() {
        let mut h = harness(&[("a", 10.0)]);
        h.engine.play(track("a")).await.unwrap();
        let control = Arc::clone(h.engine.resources().next().unwrap().control());
        assert!((control.gain() - 0.5).abs() < 1e-6);

        h.engine.set_volume(100.0, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(505)).await;
        assert!((control.gain() - 0.75).abs() < 0.05);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((control.gain() - 1.0).abs() < 1e-6);
        assert_eq!(h.engine.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_builds_next_pass_at_duration_minus_fade() {
        let mut config = test_engine_config();
        config.crossfade = Duration::from_secs(2);
        let mut h = harness_with(config, &[("a", 10.0)]);

        let start = Instant::now();
        h.engine.play_loop(track("a")).await.unwrap();
        let outgoing = h.live();
        assert_eq!(h.engine.pending_timers(), 1);

        let signal = h.handles.signals.recv().await.unwrap();
        assert!(matches!(signal, SessionSignal::CrossfadeDue { .. }));
        h.engine.handle_signal(signal).await.unwrap();

        assert_eq!(h.engine.active_resources(), 2);
        let incoming = h
            .engine
            .resources()
            .find(|r| r.id() != outgoing)
            .unwrap();
        let offset = incoming.created_at() - start;
        let eps = Duration::from_millis(50);
        assert!(offset + eps >= Duration::from_secs(8) && offset <= Duration::from_secs(8) + eps);
        let incoming = incoming.id();

        // Outgoing ends: the incoming pass is promoted and the next crossfade armed
        h.finish(outgoing).await;
        assert_eq!(h.live(), incoming);
        assert_eq!(h.engine.active_resources(), 1);
        assert_eq!(h.engine.pending_timers(), 1);
        assert!(h.events().iter().all(|e| !matches!(e, PlayerEvent::TrackEnded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_transitions() {
        let mut h = harness(&[("a", 10.0)]);
        assert!(!h.engine.pause());
        assert!(!h.engine.resume());

        h.engine.play_loop(track("a")).await.unwrap();
        assert!(!h.engine.resume());
        assert!(h.engine.pause());
        assert!(!h.engine.pause());
        assert_eq!(h.engine.pending_timers(), 0);
        assert!(h.engine.resources().all(|r| r.control().is_paused()));

        assert!(h.engine.resume());
        assert_eq!(h.engine.pending_timers(), 1);
        assert!(h.engine.resources().all(|r| !r.control().is_paused()));
    }

    #[tokio::test]
    async fn test_skip_lets_completion_decide() {
        let mut h = harness(&[("a", 5.0), ("b", 5.0)]);
        h.engine.play(track("a")).await.unwrap();
        h.engine.enqueue(track("b")).await.unwrap();
        let first = h.live();

        assert!(h.engine.skip().await.unwrap());
        assert_eq!(h.current().as_deref(), Some("b"));

        // The stopped resource reports idle later; it must be ignored
        h.pump().await;
        h.probe.finish(first);
        h.pump().await;
        assert_eq!(h.current().as_deref(), Some("b"));

        assert!(h.engine.skip().await.unwrap());
        assert!(h.engine.is_idle());
        assert!(!h.engine.skip().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_generation_result_is_discarded() {
        let mut h = harness(&[]);
        let stale_epoch = h.engine.epoch().unwrap();
        h.engine.stop();
        let (sink, probe) = FakeSink::new();
        let epoch = h.engine.join(Box::new(sink));
        h.probe = probe;
        assert!(epoch > stale_epoch);

        let path = std::path::PathBuf::from("/cache/battle.mp3");
        h.loader.add(&path.display().to_string(), 6.0);
        let artifact = CachedArtifact {
            key: "battle".into(),
            path: path.clone(),
            regenerated: true,
            rate_limited: false,
        };

        h.engine
            .handle_signal(SessionSignal::Generated {
                epoch: stale_epoch,
                key: "battle".into(),
                result: Ok(artifact.clone()),
            })
            .await
            .unwrap();
        assert_eq!(h.engine.active_resources(), 0);

        h.engine
            .handle_signal(SessionSignal::Generated {
                epoch,
                key: "battle".into(),
                result: Ok(artifact),
            })
            .await
            .unwrap();
        assert_eq!(h.current().as_deref(), Some("battle"));
        assert_eq!(h.engine.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_generation_error_is_reported() {
        let mut h = harness(&[]);
        let epoch = h.engine.epoch().unwrap();
        h.events();

        h.engine
            .handle_signal(SessionSignal::Generated {
                epoch,
                key: "battle".into(),
                result: Err(CacheError::InvalidKey("battle".into())),
            })
            .await
            .unwrap();
        assert!(matches!(h.events()[..], [PlayerEvent::PlayerError(_)]));
    }

    #[tokio::test]
    async fn test_play_generated_validates_before_spawning() {
        let mut h = harness(&[]);
        assert!(matches!(
            h.engine.play_generated("battle", false),
            Err(EngineError::Playback(PlaybackError::NoTrackCache))
        ));
    }

    #[tokio::test]
    async fn test_toggles_emit_events() {
        let mut h = harness(&[]);
        h.events();
        assert!(h.engine.toggle_shuffle());
        assert!(h.engine.toggle_repeat());
        assert_eq!(
            h.events(),
            vec![PlayerEvent::ShuffleToggled(true), PlayerEvent::RepeatToggled(true)]
        );
        let snapshot = h.engine.snapshot();
        assert!(snapshot.shuffle && snapshot.repeat);
    }

    #[tokio::test]
    async fn test_find_track_uses_catalog() {
        let h = harness(&[("lute.mp3", 1.0)]);
        assert_eq!(h.engine.find_track("lute.mp3").await.unwrap().name, "lute.mp3");
        assert!(h.engine.find_track("missing.mp3").await.is_err());
    }
}
