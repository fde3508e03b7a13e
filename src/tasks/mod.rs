mod channels;
mod input;
mod session;

pub use channels::{Channels, CommandReply, EngineCommand, SessionRequest};
pub use input::{log_events, read_commands};
pub use session::{SessionTask, SinkFactory};
