use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::app::SessionSnapshot;
use crate::error::{EngineError, PlaybackError, Result};
use crate::playback::{OutputSink, PlaybackEngine, SessionSignal};

use super::channels::{EngineCommand, SessionRequest};

/// Opens a fresh output binding for `join`
pub type SinkFactory = Box<dyn FnMut() -> std::result::Result<Box<dyn OutputSink>, PlaybackError>>;

/// Cooperative driver for one engine.
///
/// Commands, resource signals, timer signals and generation results are
/// handled one at a time, so engine mutations never interleave.
pub struct SessionTask {
    engine: PlaybackEngine,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    requests: mpsc::Receiver<SessionRequest>,
    sink_factory: SinkFactory,
}

impl SessionTask {
    pub fn new(
        engine: PlaybackEngine,
        signals: mpsc::UnboundedReceiver<SessionSignal>,
        requests: mpsc::Receiver<SessionRequest>,
        sink_factory: SinkFactory,
    ) -> Self {
        Self {
            engine,
            signals,
            requests,
            sink_factory,
        }
    }

    /// Run until `quit` or until every request sender is gone
    #[instrument(skip(self), name = "session")]
    pub async fn run(mut self) {
        info!("Session driver starting");

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        debug!("Command channel closed");
                        break;
                    };
                    if self.handle_request(request).await.is_break() {
                        break;
                    }
                }

                Some(signal) = self.signals.recv() => {
                    if let Err(e) = self.engine.handle_signal(signal).await {
                        self.fail(&e);
                    }
                }
            }
        }

        self.engine.leave();
        info!("Session driver shutting down");
    }

    async fn handle_request(&mut self, request: SessionRequest) -> ControlFlow<()> {
        let SessionRequest { command, reply } = request;
        let quit = command == EngineCommand::Quit;

        let result = self.execute(command).await;
        let reply_text = result.map_err(|e| {
            self.fail(&e);
            e.to_string()
        });
        if let Some(reply) = reply {
            let _ = reply.send(reply_text);
        }

        if quit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Report an error and tear the session down when it cannot continue
    fn fail(&mut self, e: &EngineError) {
        self.engine.report_error(e);
        if !e.is_recoverable() {
            error!(error = %e, "Unrecoverable session error, leaving");
            self.engine.leave();
        }
    }

    async fn execute(&mut self, command: EngineCommand) -> Result<String> {
        debug!(?command, "Executing command");
        let engine = &mut self.engine;

        let reply = match command {
            EngineCommand::Join => {
                let sink = (self.sink_factory)()?;
                let epoch = engine.join(sink);
                format!("joined (session {})", epoch)
            }
            EngineCommand::Leave => {
                engine.leave();
                "left".to_string()
            }
            EngineCommand::Play { name, looping } => {
                let track = engine.find_track(&name).await?;
                if looping {
                    engine.play_loop(track).await?;
                } else {
                    engine.play(track).await?;
                }
                describe(&engine.snapshot())
            }
            EngineCommand::Enqueue(name) => {
                let track = engine.find_track(&name).await?;
                let position = engine.enqueue(track).await?;
                format!("queued at position {}", position)
            }
            EngineCommand::Generate { key, force } => {
                engine.play_generated(&key, force)?;
                format!("generating {:?}", key)
            }
            EngineCommand::Pause => toggled(engine.pause(), "paused", "not playing"),
            EngineCommand::Resume => toggled(engine.resume(), "resumed", "not paused"),
            EngineCommand::Skip => toggled(engine.skip().await?, "skipped", "nothing to skip"),
            EngineCommand::Stop => {
                engine.stop();
                "stopped".to_string()
            }
            EngineCommand::Volume { level, ramp_ms } => {
                let level = engine.set_volume(level, Duration::from_millis(ramp_ms));
                format!("volume {:.0}", level)
            }
            EngineCommand::Shuffle => toggled(engine.toggle_shuffle(), "shuffle on", "shuffle off"),
            EngineCommand::Repeat => toggled(engine.toggle_repeat(), "repeat on", "repeat off"),
            EngineCommand::Tracks => {
                let names: Vec<String> = engine
                    .list_tracks()
                    .await?
                    .into_iter()
                    .map(|entry| entry.name)
                    .collect();
                listing(names)
            }
            EngineCommand::CreatePlaylist(name) => {
                let playlist = engine.queue_mut().create_playlist(&name).await?;
                format!("created playlist {:?}", playlist.name)
            }
            EngineCommand::AddToPlaylist { playlist, track } => {
                let track = engine.find_track(&track).await?;
                let len = engine.queue_mut().add_to_playlist(&playlist, track).await?;
                format!("{:?} now has {} tracks", playlist, len)
            }
            EngineCommand::RemoveFromPlaylist { playlist, track } => {
                let removed = engine
                    .queue_mut()
                    .remove_from_playlist(&playlist, &track)
                    .await?;
                format!("removed {:?} from {:?}", removed.name, playlist)
            }
            EngineCommand::DeletePlaylist(name) => {
                engine.queue_mut().delete_playlist(&name).await?;
                format!("deleted playlist {:?}", name)
            }
            EngineCommand::ShowPlaylist(name) => {
                let playlist = engine.queue_mut().get_playlist(&name).await?;
                listing(playlist.tracks.into_iter().map(|t| t.name).collect())
            }
            EngineCommand::ListPlaylists => listing(engine.queue().list_playlists().await?),
            EngineCommand::LoadPlaylist(name) => {
                let len = engine.load_playlist(&name).await?;
                format!("playing {:?} ({} tracks)", name, len)
            }
            EngineCommand::Status => describe(&engine.snapshot()),
            EngineCommand::Quit => {
                info!("Quit requested");
                "bye".to_string()
            }
        };
        Ok(reply)
    }
}

fn toggled(on: bool, yes: &str, no: &str) -> String {
    let text = if on { yes } else { no };
    text.to_string()
}

fn listing(names: Vec<String>) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join("\n")
    }
}

fn describe(snapshot: &SessionSnapshot) -> String {
    let mut line = snapshot.state.status_text().to_string();
    if let Some(track) = snapshot.current_track() {
        line.push_str(&format!(" {}", track.display_name()));
    }
    line.push_str(&format!(" | volume {:.0}", snapshot.volume * 100.0));
    if snapshot.shuffle {
        line.push_str(" | shuffle");
    }
    if snapshot.repeat {
        line.push_str(" | repeat");
    }
    if let Some(playlist) = &snapshot.active_playlist {
        line.push_str(&format!(" | playlist {}", playlist));
    }
    if snapshot.queued > 0 {
        line.push_str(&format!(" | {} queued", snapshot.queued));
    }
    if !snapshot.connected {
        line.push_str(" | not joined");
    }
    line
}
