use tokio::sync::{mpsc, oneshot};

use crate::error::CommandError;

/// Commands accepted by the session driver
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Bind to the output device and start a session
    Join,
    Leave,
    Play { name: String, looping: bool },
    Enqueue(String),
    Generate { key: String, force: bool },
    Pause,
    Resume,
    Skip,
    Stop,
    Volume { level: f32, ramp_ms: u64 },
    Shuffle,
    Repeat,
    Tracks,
    CreatePlaylist(String),
    AddToPlaylist { playlist: String, track: String },
    RemoveFromPlaylist { playlist: String, track: String },
    DeletePlaylist(String),
    ShowPlaylist(String),
    ListPlaylists,
    LoadPlaylist(String),
    Status,
    Quit,
}

fn rest(
    words: &[&str],
    command: &'static str,
    argument: &'static str,
) -> Result<String, CommandError> {
    if words.is_empty() {
        return Err(CommandError::MissingArgument { command, argument });
    }
    Ok(words.join(" "))
}

impl EngineCommand {
    /// Parse one input line. Blank lines and `#` comments yield `None`.
    ///
    /// Track names may contain spaces and always come last; playlist names
    /// in `playlist add|remove` are a single word.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let (head, args) = (words[0].to_ascii_lowercase(), &words[1..]);

        let command = match head.as_str() {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "play" => Self::Play {
                name: rest(args, "play", "a track name")?,
                looping: false,
            },
            "loop" => Self::Play {
                name: rest(args, "loop", "a track name")?,
                looping: true,
            },
            "enqueue" | "queue" => Self::Enqueue(rest(args, "enqueue", "a track name")?),
            "generate" | "mood" => {
                let force = args.contains(&"--force");
                let key = args
                    .iter()
                    .find(|a| !a.starts_with("--"))
                    .ok_or(CommandError::MissingArgument {
                        command: "generate",
                        argument: "a mood key",
                    })?;
                Self::Generate {
                    key: key.to_string(),
                    force,
                }
            }
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "skip" | "next" => Self::Skip,
            "stop" => Self::Stop,
            "volume" | "vol" => {
                let level = args.first().ok_or(CommandError::MissingArgument {
                    command: "volume",
                    argument: "a level",
                })?;
                let level = level
                    .parse::<f32>()
                    .map_err(|_| CommandError::InvalidNumber(level.to_string()))?;
                let ramp_ms = match args.get(1) {
                    Some(ms) => ms
                        .parse::<u64>()
                        .map_err(|_| CommandError::InvalidNumber(ms.to_string()))?,
                    None => 0,
                };
                Self::Volume { level, ramp_ms }
            }
            "shuffle" => Self::Shuffle,
            "repeat" => Self::Repeat,
            "tracks" => Self::Tracks,
            "playlist" | "pl" => Self::parse_playlist(args)?,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    fn parse_playlist(args: &[&str]) -> Result<Self, CommandError> {
        let Some((action, args)) = args.split_first() else {
            return Ok(Self::ListPlaylists);
        };

        let command = match action.to_ascii_lowercase().as_str() {
            "list" => Self::ListPlaylists,
            "create" => Self::CreatePlaylist(rest(args, "playlist create", "a name")?),
            "delete" => Self::DeletePlaylist(rest(args, "playlist delete", "a name")?),
            "show" => Self::ShowPlaylist(rest(args, "playlist show", "a name")?),
            "load" => Self::LoadPlaylist(rest(args, "playlist load", "a name")?),
            "add" | "remove" => {
                let (playlist, track) = args.split_first().ok_or(CommandError::MissingArgument {
                    command: "playlist add/remove",
                    argument: "a playlist",
                })?;
                let track = rest(track, "playlist add/remove", "a track name")?;
                let playlist = playlist.to_string();
                if action.eq_ignore_ascii_case("add") {
                    Self::AddToPlaylist { playlist, track }
                } else {
                    Self::RemoveFromPlaylist { playlist, track }
                }
            }
            other => return Err(CommandError::Unknown(format!("playlist {}", other))),
        };
        Ok(command)
    }
}

/// Text reply to a command, or the error it failed with
pub type CommandReply = Result<String, String>;

/// A command plus the channel its reply goes back on
#[derive(Debug)]
pub struct SessionRequest {
    pub command: EngineCommand,
    pub reply: Option<oneshot::Sender<CommandReply>>,
}

impl SessionRequest {
    pub fn new(command: EngineCommand) -> (Self, oneshot::Receiver<CommandReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Request nobody waits on
    pub fn detached(command: EngineCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }
}

/// Channel bundle for communication with the session driver
pub struct Channels {
    pub cmd_tx: mpsc::Sender<SessionRequest>,
    pub cmd_rx: mpsc::Receiver<SessionRequest>,
}

impl Channels {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        Self { cmd_tx, cmd_rx }
    }

    pub fn split(self) -> (mpsc::Sender<SessionRequest>, mpsc::Receiver<SessionRequest>) {
        (self.cmd_tx, self.cmd_rx)
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}
