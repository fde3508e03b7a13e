use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::playback::PlayerEvent;

use super::channels::{EngineCommand, SessionRequest};

/// Forward newline-delimited commands from `reader` to the session driver,
/// writing each reply to `writer`. EOF sends `quit`.
pub async fn read_commands<R, W>(reader: R, mut writer: W, requests: mpsc::Sender<SessionRequest>)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read command input");
                break;
            }
        };

        let command = match EngineCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                let _ = writer.write_all(format!("error: {}\n", e).as_bytes()).await;
                continue;
            }
        };

        let quit = command == EngineCommand::Quit;
        let (request, reply) = SessionRequest::new(command);
        if requests.send(request).await.is_err() {
            debug!("Session driver gone, stopping input");
            return;
        }

        let text = match reply.await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => format!("error: {}", e),
            Err(_) => return,
        };
        let _ = writer.write_all(format!("{}\n", text).as_bytes()).await;
        let _ = writer.flush().await;

        if quit {
            return;
        }
    }

    debug!("Command input closed");
    let _ = requests
        .send(SessionRequest::detached(EngineCommand::Quit))
        .await;
}

/// Log every player event until the engine goes away
pub async fn log_events(mut events: mpsc::UnboundedReceiver<PlayerEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            PlayerEvent::TrackStarted(track) | PlayerEvent::TrackChanged(track) => {
                info!(event = event.name(), track = %track.display_name());
            }
            PlayerEvent::StateUpdate {
                is_playing,
                current_track,
            } => {
                debug!(
                    event = event.name(),
                    is_playing,
                    track = ?current_track.as_ref().map(|t| t.name.as_str())
                );
            }
            PlayerEvent::ShuffleToggled(on) | PlayerEvent::RepeatToggled(on) => {
                info!(event = event.name(), enabled = on);
            }
            PlayerEvent::PlayerError(message) => {
                warn!(event = event.name(), %message);
            }
            PlayerEvent::TrackEnded | PlayerEvent::QueueEmpty => {
                info!(event = event.name());
            }
        }
    }
}
